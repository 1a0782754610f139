//! Control-flow graph edges and the structural cache derived from them.

use std::collections::HashMap;

use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

use crate::refs::BlockRef;

/// Successor and predecessor sets of every block, plus a lazily computed
/// dominator structure.
///
/// Edits to the edge sets do not refresh the structure; passes that reshape
/// control flow call [`Cfg::invalidate_structure`] before their first edit.
#[derive(Debug, Default)]
pub struct Cfg {
    successors: SecondaryMap<BlockRef, SmallVec<[BlockRef; 2]>>,
    predecessors: SecondaryMap<BlockRef, SmallVec<[BlockRef; 2]>>,
    structure: Option<Structure>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the edge `from -> to`. Adding an existing edge is a no-op.
    pub fn add_edge(&mut self, from: BlockRef, to: BlockRef) {
        if self.successors[from].contains(&to) {
            return;
        }
        self.successors[from].push(to);
        self.predecessors[to].push(from);
    }

    pub fn remove_edge(&mut self, from: BlockRef, to: BlockRef) {
        self.successors[from].retain(|b| *b != to);
        self.predecessors[to].retain(|b| *b != from);
    }

    pub fn has_edge(&self, from: BlockRef, to: BlockRef) -> bool {
        self.successors[from].contains(&to)
    }

    pub fn successors(&self, block: BlockRef) -> &[BlockRef] {
        &self.successors[block]
    }

    pub fn predecessors(&self, block: BlockRef) -> &[BlockRef] {
        &self.predecessors[block]
    }

    /// Re-home every outgoing edge of `from` onto `to`.
    pub fn move_successors(&mut self, from: BlockRef, to: BlockRef) {
        let succs = std::mem::take(&mut self.successors[from]);
        for succ in succs {
            self.predecessors[succ].retain(|b| *b != from);
            self.add_edge(to, succ);
        }
    }

    /// All edges, sorted.
    pub fn edges(&self) -> Vec<(BlockRef, BlockRef)> {
        let mut edges: Vec<_> = self
            .successors
            .iter()
            .flat_map(|(from, succs)| succs.iter().map(move |&to| (from, to)))
            .collect();
        edges.sort();
        edges
    }

    /// Drop every edge and the structure.
    pub fn clear(&mut self) {
        self.successors.clear();
        self.predecessors.clear();
        self.structure = None;
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Discard the cached structure; it is recomputed on next request.
    pub fn invalidate_structure(&mut self) {
        if self.structure.take().is_some() {
            tracing::trace!("CFG structure invalidated");
        }
    }

    pub fn has_structure(&self) -> bool {
        self.structure.is_some()
    }

    /// Dominator structure rooted at `entry`, computed on first request.
    pub fn structure(&mut self, entry: BlockRef) -> &Structure {
        if self.structure.as_ref().is_none_or(|s| s.entry != entry) {
            self.structure = Some(Structure::compute(self, entry));
        }
        self.structure
            .as_ref()
            .unwrap_or_else(|| unreachable!("structure was just computed"))
    }
}

/// Dominator tree of the blocks reachable from an entry block.
#[derive(Debug)]
pub struct Structure {
    entry: BlockRef,
    idom: HashMap<BlockRef, BlockRef>,
}

impl Structure {
    /// Iterative dominator computation (Cooper, Harvey, Kennedy).
    fn compute(cfg: &Cfg, entry: BlockRef) -> Self {
        let rpo = reverse_postorder(cfg, entry);
        let order: HashMap<BlockRef, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut idom: HashMap<BlockRef, BlockRef> = HashMap::new();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockRef> = None;
                for &pred in cfg.predecessors(block) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &order, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom
                    && idom.get(&block) != Some(&new_idom)
                {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }

        Self { entry, idom }
    }

    pub fn entry(&self) -> BlockRef {
        self.entry
    }

    /// Immediate dominator of `block`; `None` for the entry and unreachable blocks.
    pub fn immediate_dominator(&self, block: BlockRef) -> Option<BlockRef> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    /// Whether `a` dominates `b`. Every reachable block dominates itself.
    pub fn dominates(&self, a: BlockRef, b: BlockRef) -> bool {
        if !self.idom.contains_key(&b) {
            return false;
        }
        let mut cursor = b;
        loop {
            if cursor == a {
                return true;
            }
            match self.immediate_dominator(cursor) {
                Some(next) => cursor = next,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &HashMap<BlockRef, BlockRef>,
    order: &HashMap<BlockRef, usize>,
    mut a: BlockRef,
    mut b: BlockRef,
) -> BlockRef {
    while a != b {
        while order[&a] > order[&b] {
            a = idom[&a];
        }
        while order[&b] > order[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_postorder(cfg: &Cfg, entry: BlockRef) -> Vec<BlockRef> {
    let mut visited = std::collections::HashSet::new();
    let mut postorder = Vec::new();
    // Explicit stack of (block, next successor index).
    let mut stack = vec![(entry, 0usize)];
    visited.insert(entry);
    while let Some((block, index)) = stack.pop() {
        if let Some(&succ) = cfg.successors(block).get(index) {
            stack.push((block, index + 1));
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
        }
    }
    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn b(n: usize) -> BlockRef {
        BlockRef::new(n)
    }

    #[test]
    fn add_edge_is_idempotent() {
        let mut cfg = Cfg::new();
        cfg.add_edge(b(0), b(1));
        cfg.add_edge(b(0), b(1));
        assert_eq!(cfg.successors(b(0)), &[b(1)]);
        assert_eq!(cfg.predecessors(b(1)), &[b(0)]);
    }

    #[test]
    fn move_successors_rehomes_edges() {
        let mut cfg = Cfg::new();
        cfg.add_edge(b(0), b(1));
        cfg.add_edge(b(0), b(2));
        cfg.move_successors(b(0), b(3));
        assert!(cfg.successors(b(0)).is_empty());
        assert_eq!(cfg.successors(b(3)), &[b(1), b(2)]);
        assert_eq!(cfg.predecessors(b(2)), &[b(3)]);
        assert_eq!(cfg.edges(), vec![(b(3), b(1)), (b(3), b(2))]);
    }

    #[test]
    fn dominators_of_a_diamond() {
        let mut cfg = Cfg::new();
        cfg.add_edge(b(0), b(1));
        cfg.add_edge(b(0), b(2));
        cfg.add_edge(b(1), b(3));
        cfg.add_edge(b(2), b(3));

        let structure = cfg.structure(b(0));
        assert_eq!(structure.immediate_dominator(b(3)), Some(b(0)));
        assert_eq!(structure.immediate_dominator(b(1)), Some(b(0)));
        assert_eq!(structure.immediate_dominator(b(0)), None);
        assert!(structure.dominates(b(0), b(3)));
        assert!(!structure.dominates(b(1), b(3)));
        assert!(cfg.has_structure());

        cfg.invalidate_structure();
        assert!(!cfg.has_structure());
    }

    #[test]
    fn unreachable_blocks_are_not_dominated() {
        let mut cfg = Cfg::new();
        cfg.add_edge(b(0), b(1));
        cfg.add_edge(b(2), b(1));
        let structure = cfg.structure(b(0));
        assert!(!structure.dominates(b(0), b(2)));
        assert_eq!(structure.immediate_dominator(b(1)), Some(b(0)));
    }
}
