//! Block splitting.
//!
//! [`split_block`] is the ordinary split: it only inserts a block boundary.
//! [`split_block_post_ra`] is for IR that has already been through global
//! register allocation: values computed before the split point and used
//! after it are un-commoned through a global register or a temporary slot,
//! and the new boundary receives matching manifests on both sides.

use std::collections::{BTreeSet, HashMap, HashSet};

use smallvec::SmallVec;

use crate::context::{IrContext, NodeDataBuilder};
use crate::manifest::{FreshDef, GlobalRegister, RegDep};
use crate::opcode::{DataType, Opcode};
use crate::refs::{BlockRef, NodeRef, TreeTopRef};

/// Split `block` so that `split_point` becomes the first statement of a new
/// block laid out right after it.
///
/// The new block takes over `block`'s exit marker (and so its exit
/// manifest) and all of its outgoing edges; `block` gets a fresh `BBEnd`
/// without a manifest and a fall-through edge to the new block. No register
/// manifests are created.
///
/// # Panics
///
/// Panics if `split_point` is `block`'s `BBStart`.
pub fn split_block(ctx: &mut IrContext, block: BlockRef, split_point: TreeTopRef) -> BlockRef {
    assert_ne!(
        split_point,
        ctx.block(block).entry,
        "split_block: cannot split {block} at its own entry",
    );
    debug_assert_eq!(ctx.enclosing_block(split_point), block);

    let old_exit = ctx.block(block).exit;
    let new_exit = ctx.create_exit_marker(block);
    let new_block = ctx.create_block_taking_exit(old_exit);
    let new_entry = ctx.block(new_block).entry;

    ctx.insert_before(split_point, new_exit);
    ctx.insert_after(new_exit, new_entry);
    ctx.block_mut(block).exit = new_exit;

    ctx.cfg.move_successors(block, new_block);
    ctx.cfg.add_edge(block, new_block);

    tracing::trace!(%block, %new_block, "split block");
    new_block
}

/// Split `block` at `split_point` after global register allocation.
///
/// Every node evaluated in the extended block before the split point and
/// referenced after it is made available in the new block:
///
/// - an entry register load whose register is not overwritten before the
///   split point is carried into the new block;
/// - a value already stored to a global register before the split point is
///   passed through that register;
/// - any other value is stored into the lowest global register not used
///   anywhere in the extended block, or into a fresh temporary slot when no
///   register is free.
///
/// Register-resident values appear in a new exit manifest on `block` and in
/// a matching entry manifest on the new block, whose register loads replace
/// the old references. The new block is not an extension.
pub fn split_block_post_ra(
    ctx: &mut IrContext,
    block: BlockRef,
    split_point: TreeTopRef,
) -> BlockRef {
    let head = ctx.extended_block_head(block);
    let extended = ctx.extended_block(block);
    let Some(&last) = extended.last() else {
        unreachable!("an extended block contains at least its head");
    };
    let region_end = ctx.block(last).exit;

    let mut prefix = PrefixScan::default();
    let mut cursor = Some(ctx.block(head).entry);
    while let Some(tt) = cursor {
        if tt == split_point {
            break;
        }
        prefix.visit_root(ctx, ctx.tt_node(tt));
        cursor = ctx.next_tree_top(tt);
    }

    let mut suffix_roots: Vec<NodeRef> = Vec::new();
    let mut cursor = Some(split_point);
    while let Some(tt) = cursor {
        suffix_roots.push(ctx.tt_node(tt));
        if tt == region_end {
            break;
        }
        cursor = ctx.next_tree_top(tt);
    }

    let mut crossing: Vec<NodeRef> = Vec::new();
    {
        let mut seen = HashSet::new();
        for &root in &suffix_roots {
            collect_crossing(ctx, root, &prefix.evaluated, &mut seen, &mut crossing);
            prefix.note_registers(ctx, root);
        }
    }

    let new_block = split_block(ctx, block, split_point);

    let mut boundary: Vec<RegDep> = Vec::new();
    let mut entry: Vec<RegDep> = Vec::new();
    let mut replacement: HashMap<NodeRef, NodeRef> = HashMap::new();

    for node in crossing {
        let data_type = ctx.opcode(node).data_type();
        let (Some(reg_load), Some(reg_store)) = (
            Opcode::reg_load_for(data_type),
            Opcode::reg_store_for(data_type),
        ) else {
            panic!("split_block_post_ra: {node} produces no value but is used across the split");
        };

        let carried_register = ctx
            .node(node)
            .register
            .filter(|reg| ctx.opcode(node).is_reg_load() && !prefix.stored.contains_key(reg));
        let stored_register = prefix
            .stored
            .iter()
            .filter(|(_, value)| **value == node)
            .map(|(reg, _)| *reg)
            .min();

        let register = if let Some(reg) = carried_register {
            boundary.push(RegDep::Carried(node));
            Some(reg)
        } else if let Some(reg) = stored_register {
            boundary.push(RegDep::Fresh(FreshDef::new(reg, node)));
            Some(reg)
        } else if let Some(reg) = prefix.take_free_register(ctx.global_register_count) {
            let store = ctx.create_node(
                NodeDataBuilder::new(reg_store)
                    .child(node)
                    .register(reg)
                    .build(),
            );
            ctx.block_append(block, store);
            boundary.push(RegDep::Fresh(FreshDef::new(reg, node)));
            tracing::trace!(%node, register = %reg, "un-commoned through register");
            Some(reg)
        } else {
            None
        };

        let replacement_node = match register {
            Some(reg) => {
                let load = ctx.create_node(
                    NodeDataBuilder::new(reg_load)
                        .register(reg)
                        .non_null(ctx.node(node).non_null)
                        .build(),
                );
                entry.push(RegDep::Carried(load));
                load
            }
            None => spill_to_temp(ctx, block, node, data_type),
        };
        replacement.insert(node, replacement_node);
    }

    if !replacement.is_empty() {
        let mut visited = HashSet::new();
        for &root in &suffix_roots {
            replace_references(ctx, root, &prefix.evaluated, &replacement, &mut visited);
        }
    }

    attach_sorted(ctx, ctx.exit_node(block), boundary);
    attach_sorted(ctx, ctx.entry_node(new_block), entry);

    tracing::debug!(%block, %new_block, "post-RA split");
    new_block
}

fn spill_to_temp(
    ctx: &mut IrContext,
    block: BlockRef,
    node: NodeRef,
    data_type: DataType,
) -> NodeRef {
    let (Some(store_op), Some(load_op)) = (Opcode::store_for(data_type), Opcode::load_for(data_type))
    else {
        unreachable!("typed values have direct load and store opcodes");
    };
    let temp = ctx.symbols.create_temp(data_type);
    let store = ctx.create_node(NodeDataBuilder::new(store_op).child(node).symbol(temp).build());
    ctx.block_append(block, store);
    tracing::trace!(%node, temp = %temp, "un-commoned through temporary slot");
    ctx.create_node(
        NodeDataBuilder::new(load_op)
            .symbol(temp)
            .non_null(ctx.node(node).non_null)
            .build(),
    )
}

fn attach_sorted(ctx: &mut IrContext, node: NodeRef, mut entries: Vec<RegDep>) {
    if entries.is_empty() {
        return;
    }
    entries.sort_by_key(|e| e.register(ctx));
    let manifest = ctx.create_manifest(entries);
    ctx.attach_manifest(node, manifest);
}

/// What the part of an extended block before a split point evaluates.
#[derive(Default)]
struct PrefixScan {
    evaluated: HashSet<NodeRef>,
    /// Last value stored to each register.
    stored: HashMap<GlobalRegister, NodeRef>,
    /// Registers named anywhere in the extended block.
    mentioned: BTreeSet<GlobalRegister>,
}

impl PrefixScan {
    fn visit_root(&mut self, ctx: &IrContext, root: NodeRef) {
        self.visit(ctx, root);
        let data = ctx.node(root);
        if data.opcode.is_reg_store()
            && let Some(reg) = data.register
        {
            self.stored.insert(reg, data.children[0]);
        }
    }

    fn visit(&mut self, ctx: &IrContext, node: NodeRef) {
        if !self.evaluated.insert(node) {
            return;
        }
        let data = ctx.node(node);
        if let Some(reg) = data.register {
            self.mentioned.insert(reg);
        }
        for &child in &data.children {
            self.visit(ctx, child);
        }
        if let Some(manifest) = data.manifest {
            for entry in &ctx.manifest(manifest).entries {
                self.mentioned.insert(entry.register(ctx));
                self.visit(ctx, entry.node());
            }
        }
    }

    /// Record registers named in a tree after the split point.
    fn note_registers(&mut self, ctx: &IrContext, root: NodeRef) {
        let mut stack: SmallVec<[NodeRef; 8]> = SmallVec::new();
        let mut seen = HashSet::new();
        stack.push(root);
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            let data = ctx.node(node);
            if let Some(reg) = data.register {
                self.mentioned.insert(reg);
            }
            stack.extend(data.children.iter().copied());
            if let Some(manifest) = data.manifest {
                for entry in &ctx.manifest(manifest).entries {
                    self.mentioned.insert(entry.register(ctx));
                    stack.push(entry.node());
                }
            }
        }
    }

    fn take_free_register(&mut self, count: u16) -> Option<GlobalRegister> {
        let reg = (0..count)
            .map(GlobalRegister)
            .find(|r| !self.mentioned.contains(r))?;
        self.mentioned.insert(reg);
        Some(reg)
    }
}

/// Collect, in first-reference order, nodes referenced from `node`'s tree
/// that were already evaluated before the split point.
fn collect_crossing(
    ctx: &IrContext,
    node: NodeRef,
    evaluated: &HashSet<NodeRef>,
    seen: &mut HashSet<NodeRef>,
    crossing: &mut Vec<NodeRef>,
) {
    if evaluated.contains(&node) {
        if seen.insert(node) {
            crossing.push(node);
        }
        return;
    }
    if !seen.insert(node) {
        return;
    }
    let data = ctx.node(node);
    for &child in &data.children {
        collect_crossing(ctx, child, evaluated, seen, crossing);
    }
    if let Some(manifest) = data.manifest {
        for entry in &ctx.manifest(manifest).entries {
            collect_crossing(ctx, entry.node(), evaluated, seen, crossing);
        }
    }
}

fn replace_references(
    ctx: &mut IrContext,
    node: NodeRef,
    evaluated: &HashSet<NodeRef>,
    replacement: &HashMap<NodeRef, NodeRef>,
    visited: &mut HashSet<NodeRef>,
) {
    if evaluated.contains(&node) || !visited.insert(node) {
        return;
    }
    let children = ctx.node(node).children.clone();
    for (index, child) in children.into_iter().enumerate() {
        match replacement.get(&child) {
            Some(&new) => ctx.set_and_inc_child(node, index, new),
            None => replace_references(ctx, child, evaluated, replacement, visited),
        }
    }

    let Some(manifest) = ctx.node(node).manifest else {
        return;
    };
    let count = ctx.manifest(manifest).len();
    for index in 0..count {
        let entry_node = ctx.manifest(manifest).entries[index].node();
        let Some(&new) = replacement.get(&entry_node) else {
            replace_references(ctx, entry_node, evaluated, replacement, visited);
            continue;
        };
        let register = ctx.manifest(manifest).entries[index].register(ctx);
        let new_entry = if ctx.opcode(new).is_reg_load() && ctx.node(new).register == Some(register)
        {
            RegDep::Carried(new)
        } else {
            RegDep::Fresh(FreshDef::new(register, new))
        };
        ctx.dec_reference_count(entry_node);
        ctx.inc_reference_count(new);
        ctx.manifest_mut(manifest).entries[index] = new_entry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_method;
    use crate::printer::print_method;
    use crate::validation::validate;

    fn lower_with(input: &str, f: impl FnOnce(&mut IrContext)) -> String {
        let mut ctx = parse_method(input).unwrap_or_else(|e| panic!("{e}\n{input}"));
        f(&mut ctx);
        let result = validate(&ctx);
        assert!(result.is_ok(), "{result}\n{}", print_method(&ctx));
        print_method(&ctx)
    }

    /// Statement `index` of the first block.
    fn statement(ctx: &IrContext, index: usize) -> TreeTopRef {
        let block = ctx.entry_block().expect("entry block");
        ctx.block_tree_tops(block)[index]
    }

    #[test]
    fn ordinary_split_moves_exit_and_successors() {
        let input = r#"method @m registers=2 {
  block_0 {
    in { %0 = iRegLoad $1 }
    istore @x(%1 = iconst #1)
    istore @y(%2 = iconst #2)
    out { $1: %0 }
  }
  block_1 {
    in { %3 = iRegLoad $1 }
    ireturn(%3)
  }
}"#;
        let printed = lower_with(input, |ctx| {
            let block = ctx.entry_block().expect("entry block");
            let at = statement(ctx, 1);
            let new_block = split_block(ctx, block, at);
            ctx.set_is_extension(new_block, true);
        });
        insta::assert_snapshot!(printed, @r"
        method @m registers=2 {
          block_0 {
            in { %0 = iRegLoad $1 }
            istore @x(%1 = iconst #1)
          }
          block_2 extension {
            istore @y(%2 = iconst #2)
            out { $1: %0 }
          }
          block_1 {
            in { %3 = iRegLoad $1 }
            ireturn(%3)
          }
        }
        ");
    }

    #[test]
    fn post_ra_split_uses_a_free_register() {
        let input = r#"method @m registers=2 {
  block_0 {
    treetop(%0 = iload @x)
    ireturn(%0)
  }
}"#;
        let printed = lower_with(input, |ctx| {
            let block = ctx.entry_block().expect("entry block");
            let at = statement(ctx, 1);
            split_block_post_ra(ctx, block, at);
        });
        insta::assert_snapshot!(printed, @r"
        method @m registers=2 {
          block_0 {
            treetop(%0 = iload @x)
            iRegStore $0(%0)
            out { $0: pass(%0) }
          }
          block_1 {
            in { %1 = iRegLoad $0 }
            ireturn(%1)
          }
        }
        ");
    }

    #[test]
    fn post_ra_split_carries_entry_loads_and_skips_used_registers() {
        let input = r#"method @m registers=3 {
  block_0 {
    in { %0 = aRegLoad $0 }
    treetop(%1 = iload @x)
    istore @y(%1)
    out { $0: %0 }
  }
  block_1 {
    in { %2 = aRegLoad $0 }
    areturn(%2)
  }
}"#;
        let printed = lower_with(input, |ctx| {
            let block = ctx.entry_block().expect("entry block");
            let at = statement(ctx, 1);
            split_block_post_ra(ctx, block, at);
        });
        insta::assert_snapshot!(printed, @r"
        method @m registers=3 {
          block_0 {
            in { %0 = aRegLoad $0 }
            treetop(%1 = iload @x)
            iRegStore $1(%1)
            out { $0: %0, $1: pass(%1) }
          }
          block_2 {
            in { %2 = aRegLoad $0, %3 = iRegLoad $1 }
            istore @y(%3)
            out { $0: %2 }
          }
          block_1 {
            in { %4 = aRegLoad $0 }
            areturn(%4)
          }
        }
        ");
    }

    #[test]
    fn post_ra_split_reuses_a_register_store() {
        let input = r#"method @m registers=2 {
  block_0 {
    iRegStore $1(%0 = iload @x)
    ireturn(%0)
  }
}"#;
        let printed = lower_with(input, |ctx| {
            let block = ctx.entry_block().expect("entry block");
            let at = statement(ctx, 1);
            split_block_post_ra(ctx, block, at);
        });
        insta::assert_snapshot!(printed, @r"
        method @m registers=2 {
          block_0 {
            iRegStore $1(%0 = iload @x)
            out { $1: pass(%0) }
          }
          block_1 {
            in { %1 = iRegLoad $1 }
            ireturn(%1)
          }
        }
        ");
    }

    #[test]
    fn post_ra_split_spills_to_a_temp_without_registers() {
        let input = r#"method @m registers=0 {
  block_0 {
    treetop(%0 = aload @x)
    treetop(%1 = iload @i)
    areturn(%0)
  }
}"#;
        let printed = lower_with(input, |ctx| {
            let block = ctx.entry_block().expect("entry block");
            let at = statement(ctx, 2);
            split_block_post_ra(ctx, block, at);
        });
        insta::assert_snapshot!(printed, @r"
        method @m registers=0 {
          block_0 {
            treetop(%0 = aload @x)
            treetop(%1 = iload @i)
            astore @temp0(%0)
          }
          block_1 {
            areturn(%2 = aload @temp0)
          }
        }
        ");
    }

    #[test]
    fn post_ra_split_with_nothing_crossing_adds_no_manifests() {
        let input = r#"method @m registers=2 {
  block_0 {
    istore @x(%0 = iconst #1)
    return
  }
}"#;
        let mut ctx = parse_method(input).expect("parse");
        let block = ctx.entry_block().expect("entry block");
        let at = statement(&ctx, 1);
        let new_block = split_block_post_ra(&mut ctx, block, at);
        assert_eq!(ctx.exit_manifest(block), None);
        assert_eq!(ctx.entry_manifest(new_block), None);
        assert!(!ctx.is_extension(new_block));
        assert_eq!(ctx.cfg.successors(block), &[new_block]);
        assert!(validate(&ctx).is_ok());
    }
}
