//! Pre-order traversal of a method body's trees.

use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::context::IrContext;
use crate::refs::{NodeRef, TreeTopRef};

/// Controls whether to descend into children during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Continue walking and descend into the node's children and manifest.
    Advance,
    /// Skip the children of the current node.
    Skip,
}

/// Walk every node of the method once, in pre-order.
///
/// Tree tops are visited in list order. For each root the callback sees the
/// node, then its children left to right, then the nodes named by its
/// manifest. A commoned node is reported only at its first occurrence; the
/// callback also receives the tree top whose tree contains that occurrence.
pub fn walk_trees<B>(
    ctx: &IrContext,
    f: &mut dyn FnMut(NodeRef, TreeTopRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    let mut visited = HashSet::new();
    for tt in ctx.tree_tops() {
        walk_node(ctx, ctx.tt_node(tt), tt, &mut visited, f)?;
    }
    ControlFlow::Continue(())
}

/// Walk the tree rooted at `node`, skipping nodes already in `visited`.
pub fn walk_node<B>(
    ctx: &IrContext,
    node: NodeRef,
    tt: TreeTopRef,
    visited: &mut HashSet<NodeRef>,
    f: &mut dyn FnMut(NodeRef, TreeTopRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    if !visited.insert(node) {
        return ControlFlow::Continue(());
    }
    match f(node, tt) {
        ControlFlow::Break(b) => return ControlFlow::Break(b),
        ControlFlow::Continue(WalkAction::Skip) => return ControlFlow::Continue(()),
        ControlFlow::Continue(WalkAction::Advance) => {}
    }
    let data = ctx.node(node);
    for &child in &data.children {
        walk_node(ctx, child, tt, visited, f)?;
    }
    if let Some(manifest) = data.manifest {
        for entry in &ctx.manifest(manifest).entries {
            walk_node(ctx, entry.node(), tt, visited, f)?;
        }
    }
    ControlFlow::Continue(())
}
