//! Null check guard for array store checks.
//!
//! ```text
//! ArrayStoreCHK(awrtbari(aladd(array, index), value, array))
//! ```
//!
//! becomes
//!
//! ```text
//! block_A:    treetop(array)
//!             treetop(value)
//!             if (component_class(array).flags & VT) == 0  -> block_C
//! extension:  NULLCHK(PassThrough(value))
//! block_C:    ArrayStoreCHK(...)
//! ```
//!
//! so only stores into arrays of value types reject null before the
//! ordinary check runs.

use arbor_ir::{IrContext, NodeDataBuilder, NodeRef, Opcode, TreeTopRef, split_block, split_block_post_ra};
use tracing::{debug, trace};

use super::reg_deps::copy_and_attach_manifest;
use super::{LoweringSession, Transformer};
use crate::errors::LoweringError;

/// Guards `ArrayStoreCHK`s of possibly-null values with a value-type null check.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArrayStoreCheckLowering;

impl Transformer for ArrayStoreCheckLowering {
    fn matches(&self, ctx: &IrContext, node: NodeRef) -> bool {
        let data = ctx.node(node);
        data.opcode == Opcode::ArrayStoreChk
            && data.children.first().is_some_and(|&store| {
                let store = ctx.node(store);
                store.opcode == Opcode::AWrtBarI && store.children.len() == 3
            })
    }

    fn lower(
        &self,
        ctx: &mut IrContext,
        session: &mut LoweringSession<'_>,
        node: NodeRef,
        tt: TreeTopRef,
    ) -> Result<(), LoweringError> {
        let store = ctx.child(node, 0);
        let source = ctx.child(store, 1);
        let dest = ctx.child(store, 2);

        if ctx.node(source).non_null {
            trace!(%node, %source, "stored value is non-null; array store check left alone");
            session.stats.skipped_non_null += 1;
            return Ok(());
        }

        ctx.cfg.invalidate_structure();
        let prev_block = ctx.enclosing_block(tt);
        if !session.allow(&format!(
            "guarding ArrayStoreCHK {node} in {prev_block} with a value-type null check"
        )) {
            return Ok(());
        }

        for value in [dest, source] {
            let treetop = ctx.create_node(NodeDataBuilder::new(Opcode::Treetop).child(value).build());
            ctx.insert_tree_before(tt, treetop);
        }

        let check_block = split_block_post_ra(ctx, prev_block, tt);

        let vft_sym = ctx.symbols.find_or_create_vft();
        let component_sym = ctx.symbols.find_or_create_array_component_type();
        let flags_sym = ctx.symbols.find_or_create_class_flags();
        let vft = ctx.create_node(NodeDataBuilder::new(Opcode::ALoadI).child(dest).symbol(vft_sym).build());
        let component = ctx.create_node(
            NodeDataBuilder::new(Opcode::ALoadI)
                .child(vft)
                .symbol(component_sym)
                .build(),
        );
        let flags = ctx.create_node(
            NodeDataBuilder::new(Opcode::ILoadI)
                .child(component)
                .symbol(flags_sym)
                .build(),
        );
        let flag = ctx.iconst(session.object_model.value_type_class_flag as i32);
        let is_value_type = ctx.create_node(NodeDataBuilder::new(Opcode::IAnd).child(flags).child(flag).build());
        let zero = ctx.iconst(0);
        let if_node = ctx.create_node(
            NodeDataBuilder::new(Opcode::IfICmpEq)
                .child(is_value_type)
                .child(zero)
                .branch_target(check_block)
                .build(),
        );

        // Both the branch and the fall-through through the null check reach
        // the check block, which expects the split's exit manifest.
        let exit_deps = ctx.exit_manifest(prev_block);
        copy_and_attach_manifest(ctx, if_node, exit_deps, None);
        ctx.block_append(prev_block, if_node);

        let null_check_sym = ctx.symbols.find_or_create_null_check();
        let pass_through = ctx.create_node(NodeDataBuilder::new(Opcode::PassThrough).child(source).build());
        let null_check = ctx.create_node(
            NodeDataBuilder::new(Opcode::NullChk)
                .child(pass_through)
                .symbol(null_check_sym)
                .build(),
        );
        let null_check_tt = ctx.block_append(prev_block, null_check);

        let null_check_block = split_block(ctx, prev_block, null_check_tt);
        ctx.set_is_extension(null_check_block, true);
        ctx.cfg.add_edge(prev_block, check_block);

        session.stats.array_store_checks_lowered += 1;
        debug!(%node, %prev_block, %null_check_block, %check_block, "array store check lowered");
        Ok(())
    }
}
