//! Post-register-allocation tree lowering.
//!
//! Runs after global register allocation and before any pass that is
//! sensitive to control-flow shape. Two kinds of node are lowered into
//! explicit control flow:
//!
//! - calls to the reference-equality non-helper are rebound to the runtime
//!   helper and guarded by an inlined fast-path chain
//!   ([`EqualityCallLowering`]);
//! - `ArrayStoreCHK`s whose stored value may be null get a null check that
//!   only runs for value-type component classes ([`ArrayStoreCheckLowering`]).
//!
//! Matches are collected during one read-only pre-order walk and applied in
//! walk order afterwards, so edits never disturb the traversal.
//!
//! Every new edge is given a register-dependency manifest copied from the
//! block boundary it bypasses (see [`reg_deps`]), so values living in global
//! registers reach the branch targets on every path.

mod array_store_check;
mod equality;
pub mod fastpath;
pub mod reg_deps;

#[cfg(test)]
mod tests;

use std::ops::ControlFlow;

use arbor_ir::{IrContext, NodeRef, ObjectModel, TreeTopRef, WalkAction, walk_trees};
use tracing::{debug, trace};

use crate::config::LoweringConfig;
use crate::errors::LoweringError;
use crate::gate::{AllowAll, TransformationGate};

pub use array_store_check::ArrayStoreCheckLowering;
pub use equality::EqualityCallLowering;

/// Name passed to the transformation gate.
pub const PASS_NAME: &str = "tree-lowering";

/// What one run of the pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoweringStats {
    /// Equality calls rebound from the non-helper to the runtime helper.
    pub rebound_calls: usize,
    /// Equality calls that received the complete fast-path chain.
    pub equality_calls_lowered: usize,
    pub array_store_checks_lowered: usize,
    /// Array store checks left alone because the stored value is non-null.
    pub skipped_non_null: usize,
    /// Steps declined by the transformation gate.
    pub vetoed: usize,
}

/// State shared by all transformers during one run.
pub struct LoweringSession<'a> {
    pub gate: &'a mut dyn TransformationGate,
    pub object_model: ObjectModel,
    pub stats: LoweringStats,
}

impl LoweringSession<'_> {
    /// Ask the gate whether the next step may be performed.
    pub fn allow(&mut self, description: &str) -> bool {
        let allowed = self.gate.perform_transformation(PASS_NAME, description);
        if !allowed {
            self.stats.vetoed += 1;
        }
        allowed
    }
}

/// A lowering rule: a predicate on nodes and the rewrite applied to matches.
pub trait Transformer {
    /// Whether `node` is a match site. Must not depend on earlier rewrites of
    /// the same run.
    fn matches(&self, ctx: &IrContext, node: NodeRef) -> bool;

    /// Rewrite the match `node`, found in the tree anchored at `tt`.
    fn lower(
        &self,
        ctx: &mut IrContext,
        session: &mut LoweringSession<'_>,
        node: NodeRef,
        tt: TreeTopRef,
    ) -> Result<(), LoweringError>;

    /// Optional: return a human-readable name for debugging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A queued match.
#[derive(Clone, Copy, Debug)]
struct WorkItem {
    /// Index of the matching transformer.
    rule: usize,
    node: NodeRef,
    tt: TreeTopRef,
}

/// The lowering driver.
pub struct TreeLowering {
    config: LoweringConfig,
    transformers: Vec<Box<dyn Transformer>>,
}

impl Default for TreeLowering {
    fn default() -> Self {
        Self::new(LoweringConfig::default())
    }
}

impl TreeLowering {
    /// Driver with the equality and array-store rules, tried in that order.
    pub fn new(config: LoweringConfig) -> Self {
        Self::without_transformers(config)
            .add_transformer(EqualityCallLowering::new(!config.disable_equality_fastpath))
            .add_transformer(ArrayStoreCheckLowering)
    }

    /// Driver without any rules.
    pub fn without_transformers(config: LoweringConfig) -> Self {
        Self {
            config,
            transformers: Vec::new(),
        }
    }

    /// Add a rule after the existing ones.
    pub fn add_transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    /// Lower `ctx` with every step allowed.
    pub fn perform(&self, ctx: &mut IrContext) -> Result<LoweringStats, LoweringError> {
        self.perform_with_gate(ctx, &mut AllowAll)
    }

    /// Lower `ctx`, consulting `gate` before each step.
    pub fn perform_with_gate(
        &self,
        ctx: &mut IrContext,
        gate: &mut dyn TransformationGate,
    ) -> Result<LoweringStats, LoweringError> {
        let object_model = self.config.object_model;
        if !object_model.are_value_types_enabled() {
            debug!(method = %ctx.name, "value types disabled; nothing to lower");
            return Ok(LoweringStats::default());
        }

        let queue = self.collect_work(ctx, &object_model);
        debug!(method = %ctx.name, matches = queue.len(), "tree lowering");

        let mut session = LoweringSession {
            gate,
            object_model,
            stats: LoweringStats::default(),
        };
        for WorkItem { rule, node, tt } in queue {
            let transformer = &self.transformers[rule];
            trace!(transformer = transformer.name(), %node, %tt, "lowering match");
            transformer.lower(ctx, &mut session, node, tt)?;
        }
        Ok(session.stats)
    }

    /// Walk the method once and queue every match in pre-order.
    fn collect_work(&self, ctx: &IrContext, object_model: &ObjectModel) -> Vec<WorkItem> {
        let mut queue = Vec::new();
        let _ = walk_trees::<()>(ctx, &mut |node, tt| {
            if !object_model.are_value_types_enabled() {
                return ControlFlow::Continue(WalkAction::Skip);
            }
            // Values first seen in a block boundary manifest are not
            // statements that can be split around.
            if ctx.opcode(ctx.tt_node(tt)).is_block_marker() {
                return ControlFlow::Continue(WalkAction::Advance);
            }
            if let Some(rule) = self.transformers.iter().position(|t| t.matches(ctx, node)) {
                queue.push(WorkItem { rule, node, tt });
            }
            ControlFlow::Continue(WalkAction::Advance)
        });
        queue
    }
}
