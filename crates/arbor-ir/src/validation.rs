//! Structural validation of a method body.
//!
//! Checks the invariants every pass must preserve:
//!
//! 1. **Layout**: the tree-top list is a sequence of blocks, each a `BBStart`,
//!    its statements and a `BBEnd`, linked consistently in both directions.
//!    Branches only end a block and never target an extension block.
//! 2. **Reference counts**: every node's count equals the number of child
//!    slots and manifest entries referring to it.
//! 3. **Commoning**: a node is only shared within one extended block.
//! 4. **Manifests**: registers are unique per manifest, carried entries are
//!    entry register loads of the extended block whose register has not been
//!    overwritten, and both ends of every edge name the same registers.
//! 5. **CFG**: the edge sets agree with branch targets and fall-through.
//! 6. **Shapes**: every node has as many children as its opcode takes,
//!    `ArrayStoreCHK` wraps an `awrtbari` and equality calls have two
//!    arguments.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::context::IrContext;
use crate::manifest::{GlobalRegister, RegDep};
use crate::opcode::Opcode;
use crate::refs::{BlockRef, ManifestRef, NodeRef};
use crate::symtab::{NonHelperSymbol, RuntimeHelper};

// ============================================================================
// Error types
// ============================================================================

/// One violated invariant.
pub struct ValidationError {
    /// Block in which the violation was found, if it is local to one.
    pub block: Option<BlockRef>,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block {
            Some(block) => write!(f, "{block}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl fmt::Debug for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Result of validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, block: Option<BlockRef>, message: String) {
        self.errors.push(ValidationError { block, message });
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "validation passed");
        }
        writeln!(f, "{} validation error(s) found:", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {}", err)?;
        }
        Ok(())
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Validate the whole method body.
pub fn validate(ctx: &IrContext) -> ValidationResult {
    let mut result = ValidationResult::default();
    validate_layout(ctx, &mut result);
    if !result.is_ok() {
        // Later checks walk blocks and would only repeat layout errors.
        return result;
    }
    validate_shapes(ctx, &mut result);
    validate_reference_counts(ctx, &mut result);
    validate_commoning(ctx, &mut result);
    validate_manifests(ctx, &mut result);
    validate_edges(ctx, &mut result);
    result
}

// ============================================================================
// Layout
// ============================================================================

fn validate_layout(ctx: &IrContext, result: &mut ValidationResult) {
    let mut current: Option<BlockRef> = None;
    let mut prev = None;
    let mut first = true;
    for tt in ctx.tree_tops() {
        if ctx.prev_tree_top(tt) != prev {
            result.error(current, format!("{tt} has an inconsistent back link"));
        }
        prev = Some(tt);

        let node = ctx.node(ctx.tt_node(tt));
        match (node.opcode, current) {
            (Opcode::BBStart, None) => {
                let Some(block) = node.block else {
                    result.error(None, format!("BBStart at {tt} has no block"));
                    return;
                };
                if ctx.block(block).entry != tt {
                    result.error(Some(block), format!("entry marker is not {tt}"));
                }
                if first && ctx.is_extension(block) {
                    result.error(Some(block), "first block cannot be an extension".into());
                }
                first = false;
                current = Some(block);
            }
            (Opcode::BBEnd, Some(block)) => {
                if node.block != Some(block) || ctx.block(block).exit != tt {
                    result.error(Some(block), format!("exit marker {tt} belongs to another block"));
                }
                current = None;
            }
            (Opcode::BBStart | Opcode::BBEnd, _) | (_, None) => {
                result.error(current, format!("misplaced {} at {tt}", node.opcode));
                return;
            }
            (opcode, Some(block)) => {
                let is_last = ctx.last_statement(block) == Some(tt);
                if opcode.is_branch() || opcode.is_return() {
                    if !is_last {
                        result.error(Some(block), format!("{opcode} at {tt} does not end the block"));
                    }
                }
                if let Some(target) = node.branch_target
                    && ctx.is_extension(target)
                {
                    result.error(Some(block), format!("{opcode} at {tt} targets extension {target}"));
                }
            }
        }
    }
    if prev != ctx.last_tree_top() {
        result.error(None, "last tree top is stale".into());
    }
    if let Some(block) = current {
        result.error(Some(block), "block is not closed by a BBEnd".into());
    }
}

// ============================================================================
// Shapes
// ============================================================================

fn validate_shapes(ctx: &IrContext, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for block in ctx.blocks_in_order() {
        let mut roots = vec![ctx.entry_node(block)];
        roots.extend(ctx.block_tree_tops(block).into_iter().map(|tt| ctx.tt_node(tt)));
        roots.push(ctx.exit_node(block));
        for root in roots {
            check_shape(ctx, root, block, &mut seen, result);
        }
    }
}

fn check_shape(
    ctx: &IrContext,
    node: NodeRef,
    block: BlockRef,
    seen: &mut HashSet<NodeRef>,
    result: &mut ValidationResult,
) {
    if !seen.insert(node) {
        return;
    }
    let data = ctx.node(node);
    let opcode = data.opcode;
    let count = data.children.len();
    if let Some(arity) = opcode.arity()
        && arity != count
    {
        result.error(Some(block), format!("{node} ({opcode}) has {count} children but takes {arity}"));
    }
    if opcode == Opcode::ArrayStoreChk
        && let Some(&store) = data.children.first()
        && ctx.opcode(store) != Opcode::AWrtBarI
    {
        result.error(
            Some(block),
            format!("{node} ({opcode}) checks {} instead of an awrtbari", ctx.opcode(store)),
        );
    }
    let is_equality = data.symbol.is_some_and(|sym| {
        ctx.symbols.is_non_helper(sym, NonHelperSymbol::ObjectEqualityComparison)
            || ctx.symbols.is_helper(sym, RuntimeHelper::ObjectEqualityComparison)
    });
    if opcode.is_call() && is_equality && count != 2 {
        result.error(
            Some(block),
            format!("{node} ({opcode}) compares {count} argument(s) instead of 2"),
        );
    }

    for &child in &data.children {
        check_shape(ctx, child, block, seen, result);
    }
    if let Some(manifest) = data.manifest {
        for entry in &ctx.manifest(manifest).entries {
            check_shape(ctx, entry.node(), block, seen, result);
        }
    }
}

// ============================================================================
// Reference counts
// ============================================================================

fn validate_reference_counts(ctx: &IrContext, result: &mut ValidationResult) {
    let mut expected: HashMap<NodeRef, u32> = HashMap::new();
    let mut visited = HashSet::new();
    let mut roots = Vec::new();
    for tt in ctx.tree_tops() {
        let root = ctx.tt_node(tt);
        roots.push(root);
        expected.entry(root).or_insert(0);
        count_references(ctx, root, &mut visited, &mut expected);
    }
    for root in roots {
        if expected.get(&root).copied().unwrap_or(0) != 0 {
            result.error(None, format!("tree top root {root} is referenced elsewhere"));
        }
    }
    let mut mismatches: Vec<_> = expected
        .into_iter()
        .filter(|(node, count)| ctx.node(*node).reference_count != *count)
        .collect();
    mismatches.sort();
    for (node, count) in mismatches {
        result.error(
            None,
            format!(
                "{node} ({}) has reference count {} but {count} reference(s)",
                ctx.opcode(node),
                ctx.node(node).reference_count
            ),
        );
    }
}

fn count_references(
    ctx: &IrContext,
    node: NodeRef,
    visited: &mut HashSet<NodeRef>,
    expected: &mut HashMap<NodeRef, u32>,
) {
    if !visited.insert(node) {
        return;
    }
    let data = ctx.node(node);
    let mut referenced: Vec<NodeRef> = data.children.to_vec();
    if let Some(manifest) = data.manifest {
        referenced.extend(ctx.manifest(manifest).entries.iter().map(RegDep::node));
    }
    for child in referenced {
        *expected.entry(child).or_insert(0) += 1;
        count_references(ctx, child, visited, expected);
    }
}

// ============================================================================
// Commoning
// ============================================================================

fn validate_commoning(ctx: &IrContext, result: &mut ValidationResult) {
    let mut owner: HashMap<NodeRef, BlockRef> = HashMap::new();
    for block in ctx.blocks_in_order() {
        let head = ctx.extended_block_head(block);
        let mut roots = vec![ctx.entry_node(block)];
        roots.extend(ctx.block_tree_tops(block).into_iter().map(|tt| ctx.tt_node(tt)));
        roots.push(ctx.exit_node(block));
        for root in roots {
            check_owner(ctx, root, head, block, &mut HashSet::new(), &mut owner, result);
        }
    }
}

fn check_owner(
    ctx: &IrContext,
    node: NodeRef,
    head: BlockRef,
    block: BlockRef,
    seen: &mut HashSet<NodeRef>,
    owner: &mut HashMap<NodeRef, BlockRef>,
    result: &mut ValidationResult,
) {
    if !seen.insert(node) {
        return;
    }
    match owner.get(&node) {
        Some(&first) if first != head => {
            result.error(
                Some(block),
                format!("{node} ({}) is commoned across extended blocks {first} and {head}", ctx.opcode(node)),
            );
            return;
        }
        Some(_) => return,
        None => {
            owner.insert(node, head);
        }
    }
    let data = ctx.node(node);
    for &child in &data.children {
        check_owner(ctx, child, head, block, seen, owner, result);
    }
    if let Some(manifest) = data.manifest {
        for entry in &ctx.manifest(manifest).entries {
            check_owner(ctx, entry.node(), head, block, seen, owner, result);
        }
    }
}

// ============================================================================
// Manifests
// ============================================================================

fn validate_manifests(ctx: &IrContext, result: &mut ValidationResult) {
    for block in ctx.blocks_in_order() {
        if let Some(manifest) = ctx.entry_manifest(block) {
            if ctx.is_extension(block) {
                result.error(Some(block), "extension block has an entry manifest".into());
            }
            check_unique(ctx, block, manifest, result);
            for entry in &ctx.manifest(manifest).entries {
                if !matches!(entry, RegDep::Carried(n) if ctx.opcode(*n).is_reg_load()) {
                    result.error(Some(block), "entry manifest holds a non register load".into());
                }
            }
        }
        if let Some(manifest) = ctx.exit_manifest(block) {
            check_unique(ctx, block, manifest, result);
            let falls_through = ctx.next_block(block).is_some()
                && ctx
                    .last_statement(block)
                    .is_none_or(|tt| !ctx.opcode(ctx.tt_node(tt)).ends_fallthrough());
            if !falls_through {
                result.error(Some(block), "exit manifest on a block without fall-through".into());
            }
        }
    }

    // Carried entries must be entry loads of the extended block whose
    // register has not been overwritten yet.
    for block in ctx.blocks_in_order() {
        if ctx.is_extension(block) {
            continue;
        }
        let entry_loads: HashSet<NodeRef> = ctx
            .entry_manifest(block)
            .map(|m| ctx.manifest(m).entries.iter().map(RegDep::node).collect())
            .unwrap_or_default();
        let mut overwritten: BTreeSet<GlobalRegister> = BTreeSet::new();
        for member in ctx.extended_block(block) {
            for tt in ctx.block_tree_tops(member) {
                let root = ctx.tt_node(tt);
                if let Some(manifest) = ctx.node(root).manifest {
                    check_unique(ctx, member, manifest, result);
                    check_carried(ctx, member, manifest, &entry_loads, &overwritten, result);
                }
                let data = ctx.node(root);
                if data.opcode.is_reg_store()
                    && let Some(reg) = data.register
                {
                    overwritten.insert(reg);
                }
            }
            if let Some(manifest) = ctx.exit_manifest(member) {
                check_carried(ctx, member, manifest, &entry_loads, &overwritten, result);
            }
        }
    }
}

fn check_unique(ctx: &IrContext, block: BlockRef, manifest: ManifestRef, result: &mut ValidationResult) {
    let mut seen = BTreeSet::new();
    for entry in &ctx.manifest(manifest).entries {
        let RegDep::Carried(node) = entry else {
            if !seen.insert(entry.register(ctx)) {
                result.error(Some(block), format!("{manifest} names {} twice", entry.register(ctx)));
            }
            continue;
        };
        match ctx.node(*node).register {
            Some(reg) => {
                if !seen.insert(reg) {
                    result.error(Some(block), format!("{manifest} names {reg} twice"));
                }
            }
            None => result.error(Some(block), format!("{manifest} carries {node} without a register")),
        }
    }
}

fn check_carried(
    ctx: &IrContext,
    block: BlockRef,
    manifest: ManifestRef,
    entry_loads: &HashSet<NodeRef>,
    overwritten: &BTreeSet<GlobalRegister>,
    result: &mut ValidationResult,
) {
    for entry in &ctx.manifest(manifest).entries {
        let RegDep::Carried(node) = entry else {
            continue;
        };
        if !entry_loads.contains(node) {
            result.error(
                Some(block),
                format!("{manifest} carries {node}, which is not an entry load of the extended block"),
            );
        } else if let Some(reg) = ctx.node(*node).register
            && overwritten.contains(&reg)
        {
            result.error(
                Some(block),
                format!("{manifest} carries {reg} after the register was overwritten"),
            );
        }
    }
}

// ============================================================================
// Edges
// ============================================================================

fn manifest_register_set(ctx: &IrContext, manifest: Option<ManifestRef>) -> BTreeSet<GlobalRegister> {
    manifest
        .map(|m| ctx.manifest_registers(m).into_iter().collect())
        .unwrap_or_default()
}

fn format_registers(set: &BTreeSet<GlobalRegister>) -> String {
    let names: Vec<String> = set.iter().map(ToString::to_string).collect();
    format!("{{{}}}", names.join(", "))
}

fn validate_edges(ctx: &IrContext, result: &mut ValidationResult) {
    for block in ctx.blocks_in_order() {
        let last = ctx.last_statement(block).map(|tt| ctx.tt_node(tt));

        if let Some(last) = last
            && let Some(target) = ctx.node(last).branch_target
        {
            let sent = manifest_register_set(ctx, ctx.node(last).manifest);
            let expected = manifest_register_set(ctx, ctx.entry_manifest(target));
            if sent != expected {
                result.error(
                    Some(block),
                    format!(
                        "branch to {target} carries {} but {target} expects {}",
                        format_registers(&sent),
                        format_registers(&expected)
                    ),
                );
            }
        }

        let falls_through = last.is_none_or(|n| !ctx.opcode(n).ends_fallthrough());
        if falls_through && let Some(next) = ctx.next_block(block) {
            if ctx.is_extension(next) {
                if ctx.exit_manifest(block).is_some() {
                    result.error(
                        Some(block),
                        format!("fall-through into extension {next} carries an exit manifest"),
                    );
                }
            } else {
                let sent = manifest_register_set(ctx, ctx.exit_manifest(block));
                let expected = manifest_register_set(ctx, ctx.entry_manifest(next));
                if sent != expected {
                    result.error(
                        Some(block),
                        format!(
                            "fall-through to {next} carries {} but {next} expects {}",
                            format_registers(&sent),
                            format_registers(&expected)
                        ),
                    );
                }
            }
        }
    }

    let mut derived = ctx.compute_edges();
    derived.sort();
    derived.dedup();
    let recorded = ctx.cfg.edges();
    if derived != recorded {
        let missing: Vec<String> = derived
            .iter()
            .filter(|e| !recorded.contains(e))
            .map(|(a, b)| format!("{a}->{b}"))
            .collect();
        let extra: Vec<String> = recorded
            .iter()
            .filter(|e| !derived.contains(e))
            .map(|(a, b)| format!("{a}->{b}"))
            .collect();
        result.error(
            None,
            format!(
                "CFG edges disagree with the trees: missing [{}], extra [{}]",
                missing.join(", "),
                extra.join(", ")
            ),
        );
    }
}
