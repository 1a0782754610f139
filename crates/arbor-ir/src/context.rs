//! IrContext: arena-based storage for one method body.
//!
//! Nodes, tree tops, blocks and manifests live in `PrimaryMap`s owned by
//! `IrContext` and are released together when the context is dropped.
//! Tree tops form a single doubly linked list for the whole method; every
//! block owns the contiguous run between its `BBStart` and `BBEnd` tree tops.

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::cfg::Cfg;
use crate::manifest::{GlobalRegister, ManifestData, RegDep};
use crate::opcode::Opcode;
use crate::refs::*;
use crate::symbol::Symbol;
use crate::symtab::SymbolTable;

// ============================================================================
// Entity data types
// ============================================================================

/// Data for a single IR node.
#[derive(Clone, Debug)]
pub struct NodeData {
    pub opcode: Opcode,
    pub children: SmallVec<[NodeRef; 3]>,
    pub symbol: Option<SymRef>,
    pub register: Option<GlobalRegister>,
    /// Payload of constant nodes.
    pub constant: i64,
    /// Number of parents (children slots and manifest entries) referring to this node.
    pub reference_count: u32,
    pub branch_target: Option<BlockRef>,
    pub manifest: Option<ManifestRef>,
    /// Owning block of a `BBStart`/`BBEnd` marker.
    pub block: Option<BlockRef>,
    /// Statically known to be a non-null reference.
    pub non_null: bool,
}

/// Data for a statement anchor.
#[derive(Clone, Copy, Debug)]
pub struct TreeTopData {
    pub node: NodeRef,
    pub prev: Option<TreeTopRef>,
    pub next: Option<TreeTopRef>,
}

/// Data for a basic block.
#[derive(Clone, Copy, Debug)]
pub struct BlockData {
    pub entry: TreeTopRef,
    pub exit: TreeTopRef,
    pub is_extension: bool,
}

// ============================================================================
// IrContext
// ============================================================================

/// Arena-based mutable IR context for one method.
#[derive(Debug)]
pub struct IrContext {
    pub name: Symbol,
    /// Number of global registers the register allocator had available.
    pub global_register_count: u16,

    nodes: PrimaryMap<NodeRef, NodeData>,
    tree_tops: PrimaryMap<TreeTopRef, TreeTopData>,
    blocks: PrimaryMap<BlockRef, BlockData>,
    manifests: PrimaryMap<ManifestRef, ManifestData>,

    first_tree_top: Option<TreeTopRef>,
    last_tree_top: Option<TreeTopRef>,

    pub symbols: SymbolTable,
    pub cfg: Cfg,
}

impl IrContext {
    /// Create an empty method body.
    pub fn new(name: Symbol, global_register_count: u16) -> Self {
        Self {
            name,
            global_register_count,
            nodes: PrimaryMap::new(),
            tree_tops: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            manifests: PrimaryMap::new(),
            first_tree_top: None,
            last_tree_top: None,
            symbols: SymbolTable::new(),
            cfg: Cfg::new(),
        }
    }

    // ========================================================================
    // Node
    // ========================================================================

    /// Create a node. Every child gains one reference.
    pub fn create_node(&mut self, mut data: NodeData) -> NodeRef {
        data.reference_count = 0;
        assert!(
            data.manifest.is_none(),
            "create_node: manifests are attached with attach_manifest",
        );
        for &child in &data.children {
            self.nodes[child].reference_count += 1;
        }
        self.nodes.push(data)
    }

    pub fn node(&self, node: NodeRef) -> &NodeData {
        &self.nodes[node]
    }

    /// Mutable access to node data.
    ///
    /// **Warning**: editing `children` directly desyncs reference counts.
    /// Prefer `set_and_inc_child`.
    pub fn node_mut(&mut self, node: NodeRef) -> &mut NodeData {
        &mut self.nodes[node]
    }

    pub fn child(&self, node: NodeRef, index: usize) -> NodeRef {
        self.nodes[node].children[index]
    }

    pub fn opcode(&self, node: NodeRef) -> Opcode {
        self.nodes[node].opcode
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Replace child `index` of `node`, moving one reference from the old
    /// child to `child`.
    pub fn set_and_inc_child(&mut self, node: NodeRef, index: usize, child: NodeRef) {
        let old = self.nodes[node].children[index];
        if old == child {
            return;
        }
        self.nodes[old].reference_count -= 1;
        self.nodes[child].reference_count += 1;
        self.nodes[node].children[index] = child;
    }

    /// Count one more use of `node` by a parent not modelled as a child slot.
    pub fn inc_reference_count(&mut self, node: NodeRef) {
        self.nodes[node].reference_count += 1;
    }

    pub fn dec_reference_count(&mut self, node: NodeRef) {
        let data = &mut self.nodes[node];
        assert!(data.reference_count > 0, "reference count of {node} underflows");
        data.reference_count -= 1;
    }

    pub fn iconst(&mut self, value: i32) -> NodeRef {
        self.create_node(
            NodeDataBuilder::new(Opcode::IConst)
                .constant(i64::from(value))
                .build(),
        )
    }

    /// Address constant; `0` is the null reference.
    pub fn aconst(&mut self, value: i64) -> NodeRef {
        self.create_node(NodeDataBuilder::new(Opcode::AConst).constant(value).build())
    }

    /// Copy `node` and its whole subtree into disjoint new nodes.
    ///
    /// Manifests are not copied.
    pub fn duplicate_tree(&mut self, node: NodeRef) -> NodeRef {
        let children: SmallVec<[NodeRef; 3]> = self.nodes[node]
            .children
            .clone()
            .into_iter()
            .map(|c| self.duplicate_tree(c))
            .collect();
        let mut data = self.nodes[node].clone();
        data.children = children;
        data.manifest = None;
        self.create_node(data)
    }

    // ========================================================================
    // Manifest
    // ========================================================================

    /// Create a manifest. Every entry's node gains one reference.
    pub fn create_manifest(&mut self, entries: impl IntoIterator<Item = RegDep>) -> ManifestRef {
        let entries: SmallVec<[RegDep; 4]> = entries.into_iter().collect();
        for entry in &entries {
            self.nodes[entry.node()].reference_count += 1;
        }
        self.manifests.push(ManifestData { entries })
    }

    pub fn manifest(&self, manifest: ManifestRef) -> &ManifestData {
        &self.manifests[manifest]
    }

    /// Mutable access to manifest data.
    ///
    /// **Warning**: editing entries directly desyncs reference counts.
    pub fn manifest_mut(&mut self, manifest: ManifestRef) -> &mut ManifestData {
        &mut self.manifests[manifest]
    }

    /// Attach `manifest` to `node`.
    ///
    /// # Panics
    ///
    /// Panics if the node already carries a manifest.
    pub fn attach_manifest(&mut self, node: NodeRef, manifest: ManifestRef) {
        let data = &mut self.nodes[node];
        if let Some(existing) = data.manifest {
            panic!("attach_manifest: {node} already carries manifest {existing}");
        }
        data.manifest = Some(manifest);
    }

    /// Registers named by a manifest, in entry order.
    pub fn manifest_registers(&self, manifest: ManifestRef) -> SmallVec<[GlobalRegister; 4]> {
        self.manifests[manifest]
            .entries
            .iter()
            .map(|e| e.register(self))
            .collect()
    }

    // ========================================================================
    // TreeTop
    // ========================================================================

    /// Create an unlinked tree top anchoring `node`.
    pub fn create_tree_top(&mut self, node: NodeRef) -> TreeTopRef {
        self.tree_tops.push(TreeTopData {
            node,
            prev: None,
            next: None,
        })
    }

    pub fn tree_top(&self, tt: TreeTopRef) -> &TreeTopData {
        &self.tree_tops[tt]
    }

    /// Root node anchored by `tt`.
    pub fn tt_node(&self, tt: TreeTopRef) -> NodeRef {
        self.tree_tops[tt].node
    }

    pub fn next_tree_top(&self, tt: TreeTopRef) -> Option<TreeTopRef> {
        self.tree_tops[tt].next
    }

    pub fn prev_tree_top(&self, tt: TreeTopRef) -> Option<TreeTopRef> {
        self.tree_tops[tt].prev
    }

    pub fn first_tree_top(&self) -> Option<TreeTopRef> {
        self.first_tree_top
    }

    pub fn last_tree_top(&self) -> Option<TreeTopRef> {
        self.last_tree_top
    }

    /// All tree tops of the method in list order.
    pub fn tree_tops(&self) -> TreeTopIter<'_> {
        TreeTopIter {
            ctx: self,
            next: self.first_tree_top,
        }
    }

    /// Link `a` directly to `b`. Either side may be a list end.
    pub fn join(&mut self, a: Option<TreeTopRef>, b: Option<TreeTopRef>) {
        match a {
            Some(a) => self.tree_tops[a].next = b,
            None => self.first_tree_top = b,
        }
        match b {
            Some(b) => self.tree_tops[b].prev = a,
            None => self.last_tree_top = a,
        }
    }

    /// Insert the unlinked `new` immediately before `anchor`.
    pub fn insert_before(&mut self, anchor: TreeTopRef, new: TreeTopRef) {
        let prev = self.tree_tops[anchor].prev;
        self.join(prev, Some(new));
        self.join(Some(new), Some(anchor));
    }

    /// Insert the unlinked `new` immediately after `anchor`.
    pub fn insert_after(&mut self, anchor: TreeTopRef, new: TreeTopRef) {
        let next = self.tree_tops[anchor].next;
        self.join(Some(new), next);
        self.join(Some(anchor), Some(new));
    }

    /// Anchor `node` in a new tree top before `anchor`.
    pub fn insert_tree_before(&mut self, anchor: TreeTopRef, node: NodeRef) -> TreeTopRef {
        let tt = self.create_tree_top(node);
        self.insert_before(anchor, tt);
        tt
    }

    /// Anchor `node` in a new tree top after `anchor`.
    pub fn insert_tree_after(&mut self, anchor: TreeTopRef, node: NodeRef) -> TreeTopRef {
        let tt = self.create_tree_top(node);
        self.insert_after(anchor, tt);
        tt
    }

    /// Remove `tt` from the list; its neighbours are joined.
    pub fn unlink(&mut self, tt: TreeTopRef) {
        let TreeTopData { prev, next, .. } = self.tree_tops[tt];
        self.join(prev, next);
        let data = &mut self.tree_tops[tt];
        data.prev = None;
        data.next = None;
    }

    // ========================================================================
    // Block
    // ========================================================================

    fn create_marker(&mut self, opcode: Opcode, block: BlockRef) -> TreeTopRef {
        let mut data = NodeDataBuilder::new(opcode).build();
        data.block = Some(block);
        let node = self.create_node(data);
        self.create_tree_top(node)
    }

    /// Create an empty block whose `BBStart` and `BBEnd` are linked to each
    /// other but not into the method.
    pub fn create_block(&mut self) -> BlockRef {
        let block = self.blocks.next_key();
        let entry = self.create_marker(Opcode::BBStart, block);
        let exit = self.create_marker(Opcode::BBEnd, block);
        self.tree_tops[entry].next = Some(exit);
        self.tree_tops[exit].prev = Some(entry);
        self.blocks.push(BlockData {
            entry,
            exit,
            is_extension: false,
        })
    }

    /// Create an unlinked `BBEnd` tree top owned by `block`.
    pub(crate) fn create_exit_marker(&mut self, block: BlockRef) -> TreeTopRef {
        self.create_marker(Opcode::BBEnd, block)
    }

    /// Create a block with a fresh unlinked `BBStart` that takes over the
    /// existing `exit` marker.
    pub(crate) fn create_block_taking_exit(&mut self, exit: TreeTopRef) -> BlockRef {
        let block = self.blocks.next_key();
        let entry = self.create_marker(Opcode::BBStart, block);
        let exit_node = self.tt_node(exit);
        self.nodes[exit_node].block = Some(block);
        self.blocks.push(BlockData {
            entry,
            exit,
            is_extension: false,
        })
    }

    /// Link a block created by `create_block` at the end of the method.
    pub fn append_block(&mut self, block: BlockRef) {
        let BlockData { entry, exit, .. } = self.blocks[block];
        let last = self.last_tree_top;
        self.join(last, Some(entry));
        self.last_tree_top = Some(exit);
        self.tree_tops[exit].next = None;
    }

    pub fn block(&self, block: BlockRef) -> &BlockData {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: BlockRef) -> &mut BlockData {
        &mut self.blocks[block]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn entry_node(&self, block: BlockRef) -> NodeRef {
        self.tt_node(self.blocks[block].entry)
    }

    pub fn exit_node(&self, block: BlockRef) -> NodeRef {
        self.tt_node(self.blocks[block].exit)
    }

    /// Register loads valid on entry to `block`.
    pub fn entry_manifest(&self, block: BlockRef) -> Option<ManifestRef> {
        self.nodes[self.entry_node(block)].manifest
    }

    /// Registers live on the fall-through edge out of `block`.
    pub fn exit_manifest(&self, block: BlockRef) -> Option<ManifestRef> {
        self.nodes[self.exit_node(block)].manifest
    }

    pub fn is_extension(&self, block: BlockRef) -> bool {
        self.blocks[block].is_extension
    }

    pub fn set_is_extension(&mut self, block: BlockRef, is_extension: bool) {
        self.blocks[block].is_extension = is_extension;
    }

    /// Anchor `node` as the last statement of `block`, just before its `BBEnd`.
    pub fn block_append(&mut self, block: BlockRef, node: NodeRef) -> TreeTopRef {
        let exit = self.blocks[block].exit;
        self.insert_tree_before(exit, node)
    }

    /// Block whose markers enclose `tt`.
    ///
    /// # Panics
    ///
    /// Panics if `tt` is not preceded by any `BBStart`.
    pub fn enclosing_block(&self, tt: TreeTopRef) -> BlockRef {
        let mut cursor = Some(tt);
        while let Some(current) = cursor {
            let node = &self.nodes[self.tt_node(current)];
            if node.opcode == Opcode::BBStart {
                return node
                    .block
                    .unwrap_or_else(|| panic!("BBStart {current} has no owning block"));
            }
            cursor = self.tree_tops[current].prev;
        }
        panic!("enclosing_block: {tt} is not inside a block");
    }

    /// Blocks in layout order.
    pub fn blocks_in_order(&self) -> Vec<BlockRef> {
        self.tree_tops()
            .filter_map(|tt| {
                let node = &self.nodes[self.tt_node(tt)];
                (node.opcode == Opcode::BBStart).then_some(node.block).flatten()
            })
            .collect()
    }

    /// First block in layout order.
    pub fn entry_block(&self) -> Option<BlockRef> {
        let first = self.first_tree_top?;
        self.nodes[self.tt_node(first)].block
    }

    /// Block laid out immediately after `block`.
    pub fn next_block(&self, block: BlockRef) -> Option<BlockRef> {
        let next = self.tree_tops[self.blocks[block].exit].next?;
        self.nodes[self.tt_node(next)].block
    }

    /// Block laid out immediately before `block`.
    pub fn prev_block(&self, block: BlockRef) -> Option<BlockRef> {
        let prev = self.tree_tops[self.blocks[block].entry].prev?;
        self.nodes[self.tt_node(prev)].block
    }

    /// Statement tree tops of `block`, excluding its markers.
    pub fn block_tree_tops(&self, block: BlockRef) -> Vec<TreeTopRef> {
        let BlockData { entry, exit, .. } = self.blocks[block];
        let mut out = Vec::new();
        let mut cursor = self.tree_tops[entry].next;
        while let Some(tt) = cursor {
            if tt == exit {
                break;
            }
            out.push(tt);
            cursor = self.tree_tops[tt].next;
        }
        out
    }

    /// Last statement of `block`, if any.
    pub fn last_statement(&self, block: BlockRef) -> Option<TreeTopRef> {
        let BlockData { entry, exit, .. } = self.blocks[block];
        self.tree_tops[exit].prev.filter(|&tt| tt != entry)
    }

    /// First block of the extended block containing `block`.
    pub fn extended_block_head(&self, block: BlockRef) -> BlockRef {
        let mut head = block;
        while self.blocks[head].is_extension {
            match self.prev_block(head) {
                Some(prev) => head = prev,
                None => break,
            }
        }
        head
    }

    /// `block`'s extended block: its head followed by every extension after it.
    pub fn extended_block(&self, block: BlockRef) -> Vec<BlockRef> {
        let head = self.extended_block_head(block);
        let mut out = vec![head];
        let mut cursor = self.next_block(head);
        while let Some(b) = cursor {
            if !self.blocks[b].is_extension {
                break;
            }
            out.push(b);
            cursor = self.next_block(b);
        }
        out
    }

    /// Control-flow edges implied by branch targets and fall-through.
    pub fn compute_edges(&self) -> Vec<(BlockRef, BlockRef)> {
        let mut edges = Vec::new();
        for block in self.blocks_in_order() {
            let last = self.last_statement(block).map(|tt| self.tt_node(tt));
            let mut falls_through = true;
            if let Some(last) = last {
                let data = &self.nodes[last];
                if let Some(target) = data.branch_target {
                    edges.push((block, target));
                }
                falls_through = !data.opcode.ends_fallthrough();
            }
            if falls_through && let Some(next) = self.next_block(block) {
                edges.push((block, next));
            }
        }
        edges
    }

    /// Rebuild the CFG edge sets from `compute_edges`.
    pub fn recompute_edges(&mut self) {
        let edges = self.compute_edges();
        self.cfg.clear();
        for (from, to) in edges {
            self.cfg.add_edge(from, to);
        }
    }
}

/// Iterator over the method's tree tops.
pub struct TreeTopIter<'a> {
    ctx: &'a IrContext,
    next: Option<TreeTopRef>,
}

impl Iterator for TreeTopIter<'_> {
    type Item = TreeTopRef;

    fn next(&mut self) -> Option<TreeTopRef> {
        let current = self.next?;
        self.next = self.ctx.tree_tops[current].next;
        Some(current)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Builder for `NodeData`.
pub struct NodeDataBuilder {
    opcode: Opcode,
    children: SmallVec<[NodeRef; 3]>,
    symbol: Option<SymRef>,
    register: Option<GlobalRegister>,
    constant: i64,
    branch_target: Option<BlockRef>,
    non_null: bool,
}

impl NodeDataBuilder {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            children: SmallVec::new(),
            symbol: None,
            register: None,
            constant: 0,
            branch_target: None,
            non_null: false,
        }
    }

    pub fn child(mut self, child: NodeRef) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeRef>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn symbol(mut self, symbol: SymRef) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn register(mut self, register: GlobalRegister) -> Self {
        self.register = Some(register);
        self
    }

    pub fn constant(mut self, constant: i64) -> Self {
        self.constant = constant;
        self
    }

    pub fn branch_target(mut self, target: BlockRef) -> Self {
        self.branch_target = Some(target);
        self
    }

    pub fn non_null(mut self, non_null: bool) -> Self {
        self.non_null = non_null;
        self
    }

    pub fn build(self) -> NodeData {
        NodeData {
            opcode: self.opcode,
            children: self.children,
            symbol: self.symbol,
            register: self.register,
            constant: self.constant,
            reference_count: 0,
            branch_target: self.branch_target,
            manifest: None,
            block: None,
            non_null: self.non_null,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
