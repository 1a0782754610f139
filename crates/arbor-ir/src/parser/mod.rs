//! Text format parser.
//!
//! Parses the format produced by [`crate::printer`] into an [`IrContext`].
//!
//! # Two-stage parsing
//!
//! 1. **Raw parse**: winnow combinators in [`raw`] parse text into `Raw*`
//!    structures.
//! 2. **IR build**: `IrBuilder` resolves node numbers, block labels, opcodes
//!    and symbol names into arena entities, then derives the CFG edges.

pub(crate) mod raw;

use std::collections::HashMap;

use derive_more::{Display, Error};
use winnow::prelude::*;

use crate::context::{IrContext, NodeDataBuilder};
use crate::manifest::{FreshDef, GlobalRegister, RegDep};
use crate::opcode::{DataType, Opcode};
use crate::refs::{BlockRef, NodeRef};
use crate::symbol::Symbol;
use raw::{RawBlock, RawEntry, RawMethod, RawNode, RawOperand};

/// Parse error for the IR text format.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("parse error at offset {offset}: {message}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    fn build(message: String) -> Self {
        Self { message, offset: 0 }
    }
}

// ============================================================================
// IrBuilder (Raw -> IR)
// ============================================================================

struct IrBuilder {
    ctx: IrContext,
    /// Maps node number (without %) -> NodeRef
    node_map: HashMap<u32, NodeRef>,
    /// Maps block label number -> BlockRef
    block_map: HashMap<u32, BlockRef>,
}

impl IrBuilder {
    fn new(raw: &RawMethod<'_>) -> Self {
        Self {
            ctx: IrContext::new(Symbol::intern(raw.name), raw.registers),
            node_map: HashMap::new(),
            block_map: HashMap::new(),
        }
    }

    fn build_method(mut self, raw: &RawMethod<'_>) -> Result<IrContext, ParseError> {
        // Blocks are created in label order so that printing a parsed body
        // reproduces its labels.
        let mut labels: Vec<u32> = raw.blocks.iter().map(|b| b.label).collect();
        labels.sort_unstable();
        for pair in labels.windows(2) {
            if pair[0] == pair[1] {
                return Err(ParseError::build(format!(
                    "duplicate block label 'block_{}'",
                    pair[0]
                )));
            }
        }
        for label in labels {
            let block = self.ctx.create_block();
            self.block_map.insert(label, block);
        }

        for raw_block in &raw.blocks {
            self.build_block(raw_block)?;
        }

        self.ctx.recompute_edges();
        Ok(self.ctx)
    }

    fn build_block(&mut self, raw: &RawBlock<'_>) -> Result<(), ParseError> {
        let block = self.block_map[&raw.label];
        self.ctx.append_block(block);
        self.ctx.set_is_extension(block, raw.extension);

        if !raw.entry.is_empty() {
            let entries = self.build_entries(&raw.entry)?;
            let manifest = self.ctx.create_manifest(entries);
            let entry = self.ctx.entry_node(block);
            self.ctx.attach_manifest(entry, manifest);
        }

        for statement in &raw.statements {
            let node = self.build_node(statement)?;
            self.ctx.block_append(block, node);
        }

        if let Some(exit) = &raw.exit {
            let entries = self.build_entries(exit)?;
            let manifest = self.ctx.create_manifest(entries);
            let exit = self.ctx.exit_node(block);
            self.ctx.attach_manifest(exit, manifest);
        }
        Ok(())
    }

    fn build_operand(&mut self, raw: &RawOperand<'_>) -> Result<NodeRef, ParseError> {
        match raw {
            RawOperand::Ref(number) => self
                .node_map
                .get(number)
                .copied()
                .ok_or_else(|| ParseError::build(format!("undefined node '%{number}'"))),
            RawOperand::Def(number, node) => {
                if self.node_map.contains_key(number) {
                    return Err(ParseError::build(format!("node '%{number}' defined twice")));
                }
                let node = self.build_node(node)?;
                self.node_map.insert(*number, node);
                Ok(node)
            }
        }
    }

    fn build_node(&mut self, raw: &RawNode<'_>) -> Result<NodeRef, ParseError> {
        let opcode = Opcode::from_name(raw.opcode)
            .filter(|op| !op.is_block_marker())
            .ok_or_else(|| ParseError::build(format!("unknown opcode '{}'", raw.opcode)))?;

        let mut builder = NodeDataBuilder::new(opcode);
        for child in &raw.children {
            let child = self.build_operand(child)?;
            builder = builder.child(child);
        }
        if let Some(name) = raw.symbol {
            let slot_type = match opcode {
                Opcode::IStore => DataType::Int32,
                Opcode::AStore => DataType::Address,
                other => other.data_type(),
            };
            let sym = self.ctx.symbols.resolve_name(name, opcode.is_call(), slot_type);
            builder = builder.symbol(sym);
        }
        if let Some(constant) = raw.constant {
            builder = builder.constant(constant);
        }
        if let Some(reg) = raw.register {
            builder = builder.register(GlobalRegister(reg));
        }
        if let Some(label) = raw.target {
            let target = self
                .block_map
                .get(&label)
                .copied()
                .ok_or_else(|| ParseError::build(format!("undefined block 'block_{label}'")))?;
            builder = builder.branch_target(target);
        }
        builder = builder.non_null(raw.non_null);

        let node = self.ctx.create_node(builder.build());

        if let Some(manifest) = &raw.manifest {
            let entries = self.build_entries(manifest)?;
            let manifest = self.ctx.create_manifest(entries);
            self.ctx.attach_manifest(node, manifest);
        }
        Ok(node)
    }

    fn build_entries(&mut self, raw: &[RawEntry<'_>]) -> Result<Vec<RegDep>, ParseError> {
        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let dep = match entry {
                RawEntry::Plain(operand) => {
                    let node = self.build_operand(operand)?;
                    self.carried(node, None)?
                }
                RawEntry::Carried(reg, operand) => {
                    let node = self.build_operand(operand)?;
                    self.carried(node, Some(GlobalRegister(*reg)))?
                }
                RawEntry::Pass(reg, operand) => {
                    let node = self.build_operand(operand)?;
                    RegDep::Fresh(FreshDef::new(GlobalRegister(*reg), node))
                }
            };
            entries.push(dep);
        }
        Ok(entries)
    }

    fn carried(
        &self,
        node: NodeRef,
        expected: Option<GlobalRegister>,
    ) -> Result<RegDep, ParseError> {
        let data = self.ctx.node(node);
        if !data.opcode.is_reg_load() {
            return Err(ParseError::build(format!(
                "carried register dependency must be a register load, found '{}'",
                data.opcode
            )));
        }
        match (data.register, expected) {
            (None, _) => Err(ParseError::build(format!(
                "register load '{}' has no register",
                data.opcode
            ))),
            (Some(actual), Some(expected)) if actual != expected => {
                Err(ParseError::build(format!(
                    "register dependency {expected} names a load of {actual}"
                )))
            }
            _ => Ok(RegDep::Carried(node)),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Parse one method body.
pub fn parse_method(input: &str) -> Result<IrContext, ParseError> {
    let mut remaining = input;
    let raw_method = raw::raw_method
        .parse_next(&mut remaining)
        .map_err(|e| ParseError {
            message: format!("parse error: {}", e),
            offset: input.len() - remaining.len(),
        })?;

    if !remaining.is_empty() {
        return Err(ParseError {
            message: "trailing input after method".to_string(),
            offset: input.len() - remaining.len(),
        });
    }

    IrBuilder::new(&raw_method).build_method(&raw_method)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_method;

    fn assert_roundtrip(input: &str) {
        let ctx = parse_method(input).unwrap_or_else(|e| panic!("{e}\n\nInput:\n{input}"));
        let printed = print_method(&ctx);
        assert_eq!(printed, input, "Round-trip mismatch");
    }

    #[test]
    fn roundtrip_equality_call() {
        assert_roundtrip(
            "method @equals registers=2 {
  block_0 {
    treetop(%0 = icall @object_equality(%1 = aload @lhs, %2 = aload @rhs))
    ireturn(%0)
  }
}",
        );
    }

    #[test]
    fn roundtrip_manifests_and_extension() {
        assert_roundtrip(
            "method @m registers=3 {
  block_0 {
    in { %0 = aRegLoad $0 nonnull, %1 = iRegLoad $2 }
    iRegStore $1(%2 = iconst #1)
    ifacmpeq(%0, %3 = aconst #0) -> block_2 { $0: %0, $1: pass(%2), $2: %1 }
  }
  block_1 extension {
    out { $0: %0, $1: pass(%4 = iconst #0), $2: %1 }
  }
  block_2 {
    in { %5 = aRegLoad $0, %6 = iRegLoad $1, %7 = iRegLoad $2 }
    ireturn(%6)
  }
}",
        );
    }

    #[test]
    fn labels_are_ranked_and_edges_derived() {
        let ctx = parse_method(
            "method @m registers=0 {
  block_5 {
    goto -> block_9
  }
  block_9 {
    return
  }
}",
        )
        .expect("parse");
        let blocks = ctx.blocks_in_order();
        assert_eq!(blocks.len(), 2);
        assert_eq!(ctx.cfg.successors(blocks[0]), &[blocks[1]]);
        assert!(print_method(&ctx).contains("goto -> block_1"));
    }

    #[test]
    fn rejects_undefined_nodes() {
        let err = parse_method(
            "method @m registers=0 {
  block_0 {
    ireturn(%4)
  }
}",
        )
        .expect_err("undefined node");
        assert!(err.message.contains("undefined node '%4'"), "{err}");
    }

    #[test]
    fn rejects_carried_non_load() {
        let err = parse_method(
            "method @m registers=1 {
  block_0 {
    treetop(%0 = iconst #1)
    out { $0: %0 }
  }
}",
        )
        .expect_err("carried constant");
        assert!(err.message.contains("must be a register load"), "{err}");
    }

    #[test]
    fn rejects_trailing_input() {
        let err = parse_method("method @m registers=0 {\n}\nextra").expect_err("trailing");
        assert_eq!(err.message, "trailing input after method");
    }

    #[test]
    fn symbols_resolve_by_slot_type() {
        let ctx = parse_method(
            "method @m registers=0 {
  block_0 {
    istore @x(%0 = iconst #3)
    ireturn(%1 = iload @x)
  }
}",
        )
        .expect("parse");
        let block = ctx.entry_block().expect("entry block");
        let tts = ctx.block_tree_tops(block);
        let store = ctx.tt_node(tts[0]);
        let ret = ctx.tt_node(tts[1]);
        let load = ctx.child(ret, 0);
        assert_eq!(ctx.node(store).symbol, ctx.node(load).symbol);
    }
}
