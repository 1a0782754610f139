//! Inlined fast path for reference-equality calls.
//!
//! `treetop(icall @object_equality(lhs, rhs))` becomes a chain of checks in
//! consecutive extension blocks, each branching to a merge block that
//! receives the result in the register or slot the call's value was
//! un-commoned into:
//!
//! ```text
//! block_A:      result = 1; if lhs == rhs            -> merge
//! extension:    result = 0; if lhs == null           -> merge
//! extension:                if rhs == null           -> merge
//! extension:                if !is_value_type(lhs)   -> merge
//! extension:                if !is_value_type(rhs)   -> merge
//! extension:    result = icall @acmp_helper(lhs, rhs)
//! merge:        ... uses result
//! ```
//!
//! Two distinct references are unequal unless both are value types, so
//! only that case reaches the helper.

use arbor_ir::{
    BlockRef, FreshDef, GlobalRegister, IrContext, NodeDataBuilder, NodeRef, NonHelperSymbol,
    Opcode, TreeTopRef, split_block_post_ra,
};
use tracing::debug;

use super::fastpath::{move_node_to_end_of_block, split_for_fastpath};
use super::reg_deps::copy_and_attach_manifest;
use super::{LoweringSession, Transformer};
use crate::errors::LoweringError;

/// Rebinds reference-equality calls to the runtime helper and, when
/// `fastpath` is set, inlines the fast-path chain in front of the call.
#[derive(Clone, Copy, Debug)]
pub struct EqualityCallLowering {
    fastpath: bool,
}

impl EqualityCallLowering {
    pub fn new(fastpath: bool) -> Self {
        Self { fastpath }
    }
}

impl Transformer for EqualityCallLowering {
    fn matches(&self, ctx: &IrContext, node: NodeRef) -> bool {
        let data = ctx.node(node);
        data.opcode.is_call()
            && data.children.len() == 2
            && data.symbol.is_some_and(|sym| {
                ctx.symbols
                    .is_non_helper(sym, NonHelperSymbol::ObjectEqualityComparison)
            })
    }

    fn lower(
        &self,
        ctx: &mut IrContext,
        session: &mut LoweringSession<'_>,
        node: NodeRef,
        tt: TreeTopRef,
    ) -> Result<(), LoweringError> {
        let helper = ctx.symbols.find_or_create_object_equality_helper();
        ctx.node_mut(node).symbol = Some(helper);
        session.stats.rebound_calls += 1;
        debug!(%node, "rebound equality call to the runtime helper");

        if !self.fastpath {
            return Ok(());
        }
        if fastpath_equality_call(ctx, session, node, tt)? {
            session.stats.equality_calls_lowered += 1;
        }
        Ok(())
    }
}

/// Where the provisional result of the fast path is stored.
#[derive(Clone, Copy)]
enum ResultHome {
    Register(GlobalRegister),
    Slot,
}

/// Insert the fast-path chain for the equality call `node` anchored at
/// `tt`. Returns `false` when the gate stopped it part way.
fn fastpath_equality_call(
    ctx: &mut IrContext,
    session: &mut LoweringSession<'_>,
    node: NodeRef,
    tt: TreeTopRef,
) -> Result<bool, LoweringError> {
    ctx.cfg.invalidate_structure();

    if !session.allow("anchoring equality helper call and its arguments") {
        return Ok(false);
    }

    // The chain branches around the whole statement at `tt`, so a call
    // feeding a store, a return or a branch is evaluated under its own
    // treetop first and the statement moves behind the split.
    let tt = if is_treetop_of(ctx, tt, node) {
        tt
    } else {
        let treetop = ctx.create_node(NodeDataBuilder::new(Opcode::Treetop).child(node).build());
        debug!(%node, statement = %tt, "anchoring equality call ahead of its statement");
        ctx.insert_tree_before(tt, treetop)
    };

    // Anchoring the call after the split point forces its result into a
    // global register or a temporary slot.
    let treetop = ctx.create_node(NodeDataBuilder::new(Opcode::Treetop).child(node).build());
    let anchored_call_tt = ctx.insert_tree_after(tt, treetop);

    let lhs = ctx.child(node, 0);
    let rhs = ctx.child(node, 1);
    for arg in [lhs, rhs] {
        let treetop = ctx.create_node(NodeDataBuilder::new(Opcode::Treetop).child(arg).build());
        ctx.insert_tree_before(tt, treetop);
    }
    debug!(%node, %lhs, %rhs, "anchored equality call and arguments");

    let mut call_block = ctx.enclosing_block(tt);
    if !session.allow(&format!("splitting {call_block} after equality call {node}")) {
        return Ok(false);
    }
    let merge = split_block_post_ra(ctx, call_block, anchored_call_tt);
    debug!(%node, %call_block, %merge, "split after equality call");

    // Un-commoning may have appended stores after the call; the call and the
    // stores of its result have to end the block for the final split.
    move_node_to_end_of_block(ctx, call_block, tt, node);

    if !session.allow("inserting fast path for lhs == rhs") {
        return Ok(false);
    }

    let anchored = ctx.child(ctx.tt_node(anchored_call_tt), 0);
    let anchored_data = ctx.node(anchored);
    let home = match (anchored_data.opcode, anchored_data.register) {
        (Opcode::IRegLoad, Some(reg)) => ResultHome::Register(reg),
        (Opcode::ILoad, _) => ResultHome::Slot,
        (opcode, _) => {
            return Err(LoweringError::UnexpectedAnchoredOpcode {
                node: anchored,
                opcode,
            });
        }
    };

    let const1 = ctx.iconst(1);
    let store = match home {
        ResultHome::Register(reg) => {
            debug!(register = %reg, "fast path result goes to a register");
            NodeDataBuilder::new(Opcode::IRegStore)
                .child(const1)
                .register(reg)
                .build()
        }
        ResultHome::Slot => {
            let mut builder = NodeDataBuilder::new(Opcode::IStore).child(const1);
            if let Some(sym) = ctx.node(anchored).symbol {
                builder = builder.symbol(sym);
            }
            debug!("fast path result goes to a slot");
            builder.build()
        }
    };
    let store = ctx.create_node(store);
    ctx.insert_tree_before(tt, store);
    let result_def = |value: NodeRef| match home {
        ResultHome::Register(reg) => Some(FreshDef::new(reg, value)),
        ResultHome::Slot => None,
    };

    // Each branch targets the merge block, which expects what the call
    // block's exit manifest describes. `exit_deps` tracks the most recent
    // copy so the result substitution carries down the chain.
    let mut exit_deps = ctx.exit_manifest(call_block);

    let identity = branch(ctx, Opcode::IfACmpEq, lhs, rhs, merge);
    exit_deps = copy_and_attach_manifest(ctx, identity, exit_deps, result_def(const1));
    call_block = insert_check(ctx, call_block, tt, identity, merge);

    if !session.allow("inserting fast path for lhs == null") {
        return Ok(false);
    }

    let store0 = ctx.duplicate_tree(store);
    let const0 = ctx.child(store0, 0);
    ctx.node_mut(const0).constant = 0;
    ctx.insert_tree_before(tt, store0);

    let null = ctx.aconst(0);
    let lhs_null = branch(ctx, Opcode::IfACmpEq, lhs, null, merge);
    exit_deps = copy_and_attach_manifest(ctx, lhs_null, exit_deps, result_def(const0));
    call_block = insert_check(ctx, call_block, tt, lhs_null, merge);

    if !session.allow("inserting fast path for rhs == null") {
        return Ok(false);
    }

    let rhs_null = branch(ctx, Opcode::IfACmpEq, rhs, null, merge);
    copy_and_attach_manifest(ctx, rhs_null, exit_deps, None);
    call_block = insert_check(ctx, call_block, tt, rhs_null, merge);

    if !session.allow("inserting fast path for lhs is not a value type") {
        return Ok(false);
    }

    let flag = ctx.iconst(session.object_model.value_type_class_flag as i32);
    let lhs_is_vt = value_type_test(ctx, lhs, flag);
    let lhs_check = branch(ctx, Opcode::IfICmpEq, lhs_is_vt, const0, merge);
    copy_and_attach_manifest(ctx, lhs_check, exit_deps, None);
    call_block = insert_check(ctx, call_block, tt, lhs_check, merge);

    if !session.allow("inserting fast path for rhs is not a value type") {
        return Ok(false);
    }

    let rhs_is_vt = value_type_test(ctx, rhs, flag);
    let rhs_check = branch(ctx, Opcode::IfICmpEq, rhs_is_vt, const0, merge);
    copy_and_attach_manifest(ctx, rhs_check, exit_deps, None);
    call_block = insert_check(ctx, call_block, tt, rhs_check, merge);

    debug!(%node, %call_block, %merge, "equality call lowered");
    Ok(true)
}

fn is_treetop_of(ctx: &IrContext, tt: TreeTopRef, node: NodeRef) -> bool {
    let root = ctx.node(ctx.tt_node(tt));
    root.opcode == Opcode::Treetop && root.children.first() == Some(&node)
}

fn branch(ctx: &mut IrContext, opcode: Opcode, a: NodeRef, b: NodeRef, target: BlockRef) -> NodeRef {
    ctx.create_node(
        NodeDataBuilder::new(opcode)
            .child(a)
            .child(b)
            .branch_target(target)
            .build(),
    )
}

/// Place `check` before the call at `tt` and split the call off into a new
/// extension block, which is returned.
fn insert_check(
    ctx: &mut IrContext,
    call_block: BlockRef,
    tt: TreeTopRef,
    check: NodeRef,
    merge: BlockRef,
) -> BlockRef {
    ctx.insert_tree_before(tt, check);
    let next = split_for_fastpath(ctx, call_block, tt, merge);
    debug!(%check, block = %call_block, next_block = %next, "inserted fast-path check");
    next
}

/// `iand(iloadi @class_flags(aloadi @vft(object)), flag)`
fn value_type_test(ctx: &mut IrContext, object: NodeRef, flag: NodeRef) -> NodeRef {
    let vft_sym = ctx.symbols.find_or_create_vft();
    let flags_sym = ctx.symbols.find_or_create_class_flags();
    let vft = ctx.create_node(
        NodeDataBuilder::new(Opcode::ALoadI)
            .child(object)
            .symbol(vft_sym)
            .build(),
    );
    let flags = ctx.create_node(
        NodeDataBuilder::new(Opcode::ILoadI)
            .child(vft)
            .symbol(flags_sym)
            .build(),
    );
    ctx.create_node(NodeDataBuilder::new(Opcode::IAnd).child(flags).child(flag).build())
}
