//! Text format printer.
//!
//! ```text
//! method @equals registers=2 {
//!   block_0 {
//!     treetop(%0 = icall @object_equality(%1 = aload @lhs, %2 = aload @rhs))
//!     ireturn(%0)
//!   }
//! }
//! ```
//!
//! Nodes are numbered in print order. The first occurrence of a node prints
//! its definition (`%N = opcode ...`), later occurrences print `%N` only.
//! Tree-top roots are never referenced elsewhere and print without a name.

use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::context::IrContext;
use crate::manifest::RegDep;
use crate::opcode::Opcode;
use crate::refs::{BlockRef, ManifestRef, NodeRef};

/// Print state for node numbering.
struct PrintState<'a> {
    ctx: &'a IrContext,
    node_names: HashMap<NodeRef, usize>,
    next_node_num: usize,
}

impl<'a> PrintState<'a> {
    fn new(ctx: &'a IrContext) -> Self {
        Self {
            ctx,
            node_names: HashMap::new(),
            next_node_num: 0,
        }
    }

    /// Name of an already printed node, or `None` on first occurrence.
    fn existing_name(&self, node: NodeRef) -> Option<usize> {
        self.node_names.get(&node).copied()
    }

    fn assign_node_name(&mut self, node: NodeRef) -> usize {
        let num = self.next_node_num;
        self.next_node_num += 1;
        self.node_names.insert(node, num);
        num
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Print a whole method body as IR text.
pub fn print_method(ctx: &IrContext) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    write_method(&mut state, &mut out).expect("fmt::Write to String never fails");
    out
}

/// Print one tree in isolation, numbering from zero.
pub fn print_tree(ctx: &IrContext, node: NodeRef) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    write_root(&mut state, &mut out, node).expect("fmt::Write to String never fails");
    out
}

// ============================================================================
// Writers
// ============================================================================

fn write_method(state: &mut PrintState<'_>, out: &mut String) -> fmt::Result {
    let ctx = state.ctx;
    writeln!(
        out,
        "method @{} registers={} {{",
        ctx.name, ctx.global_register_count
    )?;
    for block in ctx.blocks_in_order() {
        write_block(state, out, block)?;
    }
    write!(out, "}}")
}

fn write_block(state: &mut PrintState<'_>, out: &mut String, block: BlockRef) -> fmt::Result {
    let ctx = state.ctx;
    write!(out, "  {block}")?;
    if ctx.is_extension(block) {
        write!(out, " extension")?;
    }
    writeln!(out, " {{")?;

    if let Some(manifest) = ctx.entry_manifest(block) {
        write!(out, "    in {{ ")?;
        for (i, entry) in ctx.manifest(manifest).entries.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            match entry {
                RegDep::Carried(node) => write_operand(state, out, *node)?,
                fresh @ RegDep::Fresh(_) => write_entry(state, out, fresh)?,
            }
        }
        writeln!(out, " }}")?;
    }

    for tt in ctx.block_tree_tops(block) {
        write!(out, "    ")?;
        write_root(state, out, ctx.tt_node(tt))?;
        writeln!(out)?;
    }

    if let Some(manifest) = ctx.exit_manifest(block) {
        write!(out, "    out ")?;
        write_manifest(state, out, manifest)?;
        writeln!(out)?;
    }
    writeln!(out, "  }}")
}

fn write_root(state: &mut PrintState<'_>, out: &mut String, node: NodeRef) -> fmt::Result {
    write_node_body(state, out, node)
}

/// Print a node at a use site: its name, or its definition on first occurrence.
fn write_operand(state: &mut PrintState<'_>, out: &mut String, node: NodeRef) -> fmt::Result {
    if let Some(num) = state.existing_name(node) {
        return write!(out, "%{num}");
    }
    let num = state.assign_node_name(node);
    write!(out, "%{num} = ")?;
    write_node_body(state, out, node)
}

fn write_node_body(state: &mut PrintState<'_>, out: &mut String, node: NodeRef) -> fmt::Result {
    let ctx = state.ctx;
    let data = ctx.node(node);
    write!(out, "{}", data.opcode)?;
    if let Some(sym) = data.symbol {
        write!(out, " @{}", ctx.symbols.name(sym))?;
    }
    if matches!(data.opcode, Opcode::IConst | Opcode::AConst) {
        write!(out, " #{}", data.constant)?;
    }
    if let Some(reg) = data.register {
        write!(out, " {reg}")?;
    }
    if data.non_null {
        write!(out, " nonnull")?;
    }
    if !data.children.is_empty() {
        write!(out, "(")?;
        for (i, &child) in data.children.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write_operand(state, out, child)?;
        }
        write!(out, ")")?;
    }
    if let Some(target) = data.branch_target {
        write!(out, " -> {target}")?;
    }
    if !data.opcode.is_block_marker()
        && let Some(manifest) = data.manifest
    {
        write!(out, " ")?;
        write_manifest(state, out, manifest)?;
    }
    Ok(())
}

fn write_manifest(state: &mut PrintState<'_>, out: &mut String, manifest: ManifestRef) -> fmt::Result {
    let ctx = state.ctx;
    write!(out, "{{ ")?;
    for (i, entry) in ctx.manifest(manifest).entries.iter().enumerate() {
        if i > 0 {
            write!(out, ", ")?;
        }
        write_entry(state, out, entry)?;
    }
    write!(out, " }}")
}

fn write_entry(state: &mut PrintState<'_>, out: &mut String, entry: &RegDep) -> fmt::Result {
    write!(out, "{}: ", entry.register(state.ctx))?;
    match entry {
        RegDep::Carried(node) => write_operand(state, out, *node),
        RegDep::Fresh(def) => {
            write!(out, "pass(")?;
            write_operand(state, out, def.value)?;
            write!(out, ")")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeDataBuilder;
    use crate::manifest::{FreshDef, GlobalRegister};
    use crate::symbol::Symbol;

    #[test]
    fn prints_commoning_and_manifests() {
        let mut ctx = IrContext::new(Symbol::intern("m"), 2);
        let block = ctx.create_block();
        ctx.append_block(block);
        let target = ctx.create_block();
        ctx.append_block(target);

        let x = ctx.symbols.find_or_create_auto(Symbol::intern("x"), crate::DataType::Address);
        let load = ctx.create_node(NodeDataBuilder::new(Opcode::ALoad).symbol(x).build());
        let null = ctx.aconst(0);
        let one = ctx.iconst(1);
        let store = ctx.create_node(
            NodeDataBuilder::new(Opcode::IRegStore)
                .child(one)
                .register(GlobalRegister(1))
                .build(),
        );
        ctx.block_append(block, store);
        let branch = ctx.create_node(
            NodeDataBuilder::new(Opcode::IfACmpEq)
                .child(load)
                .child(null)
                .branch_target(target)
                .build(),
        );
        let deps = ctx.create_manifest([RegDep::Fresh(FreshDef::new(GlobalRegister(1), one))]);
        ctx.attach_manifest(branch, deps);
        ctx.block_append(block, branch);

        let text = print_method(&ctx);
        insta::assert_snapshot!(text, @r"
        method @m registers=2 {
          block_0 {
            iRegStore $1(%0 = iconst #1)
            ifacmpeq(%1 = aload @x, %2 = aconst #0) -> block_1 { $1: pass(%0) }
          }
          block_1 {
          }
        }
        ");
    }

    #[test]
    fn print_tree_renumbers_from_zero() {
        let mut ctx = IrContext::new(Symbol::intern("m"), 0);
        let one = ctx.iconst(1);
        let ret = ctx.create_node(NodeDataBuilder::new(Opcode::IReturn).child(one).build());
        assert_eq!(print_tree(&ctx, ret), "ireturn(%0 = iconst #1)");
    }
}
