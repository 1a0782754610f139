//! Block surgery shared by the fast-path transformers.

use arbor_ir::{BlockRef, IrContext, NodeRef, TreeTopRef, split_block};
use tracing::trace;

/// Split `block` at `split_point` for a fast-path branch to `target`.
///
/// The new fall-through block is an extension of `block`, inherits its exit
/// manifest and successors, and `block` gains an edge to `target`. No
/// manifests are synthesised: the branch that ends `block` must already
/// carry its own. The CFG structure must have been invalidated by the
/// caller.
pub fn split_for_fastpath(
    ctx: &mut IrContext,
    block: BlockRef,
    split_point: TreeTopRef,
    target: BlockRef,
) -> BlockRef {
    let new_block = split_block(ctx, block, split_point);
    ctx.set_is_extension(new_block, true);
    ctx.cfg.add_edge(block, target);
    new_block
}

/// Move `tt` to the end of `block`, together with every later statement of
/// the block that stores `node`'s value.
///
/// After a post-RA split right behind `tt`, the stores that un-common
/// `node` follow `tt`; moving them as a group keeps `tt` and the stores
/// together as the final statements of the block.
pub fn move_node_to_end_of_block(
    ctx: &mut IrContext,
    block: BlockRef,
    tt: TreeTopRef,
    node: NodeRef,
) {
    let exit = ctx.block(block).exit;
    let Some(mut cursor) = ctx.next_tree_top(tt).filter(|&next| next != exit) else {
        return;
    };
    trace!(%tt, %node, %block, "moving call tree top to the end of the block");

    ctx.unlink(tt);
    let mut group = vec![tt];
    while cursor != exit {
        let Some(next) = ctx.next_tree_top(cursor) else {
            unreachable!("{block}'s statements end at its exit marker");
        };
        let stmt = ctx.node(ctx.tt_node(cursor));
        if stmt.opcode.is_store() && stmt.children.first() == Some(&node) {
            trace!(tt = %cursor, "moving store of the call result");
            ctx.unlink(cursor);
            group.push(cursor);
        }
        cursor = next;
    }
    for moved in group {
        ctx.insert_before(exit, moved);
    }
}
