//! Register-dependency manifests.
//!
//! A manifest is attached to a block boundary (`BBStart`, `BBEnd`) or to a
//! branch and lists, per global register, which value that register holds
//! when control crosses the boundary.
//!
//! Entries come in two flavours that must never be confused:
//!
//! - [`RegDep::Carried`] refers to a register load that was defined on block
//!   entry. Downstream consumers find "the value already in register R"
//!   through the identity of that node, so it is always shared by reference.
//! - [`RegDep::Fresh`] describes a value that becomes resident in a register
//!   at this boundary. It is owned by exactly one manifest; another manifest
//!   gets its own copy through [`FreshDef::duplicate`].

use std::fmt;

use smallvec::SmallVec;

use crate::context::IrContext;
use crate::refs::NodeRef;

/// Number of a global register assigned by the register allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalRegister(pub u16);

impl fmt::Display for GlobalRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// A value defined into `register` at a block boundary.
#[derive(Debug, PartialEq, Eq)]
pub struct FreshDef {
    pub register: GlobalRegister,
    pub value: NodeRef,
}

impl FreshDef {
    pub fn new(register: GlobalRegister, value: NodeRef) -> Self {
        Self { register, value }
    }

    /// A new definition of the same register from the same (commoned) value.
    pub fn duplicate(&self) -> FreshDef {
        FreshDef {
            register: self.register,
            value: self.value,
        }
    }
}

/// One entry of a manifest.
#[derive(Debug, PartialEq, Eq)]
pub enum RegDep {
    /// A register load from block entry, shared by reference.
    Carried(NodeRef),
    /// A value placed in a register at this boundary.
    Fresh(FreshDef),
}

impl RegDep {
    /// Register described by this entry.
    ///
    /// # Panics
    ///
    /// Panics if a carried node has no register assigned.
    pub fn register(&self, ctx: &IrContext) -> GlobalRegister {
        match self {
            RegDep::Carried(node) => ctx
                .node(*node)
                .register
                .unwrap_or_else(|| panic!("carried register dependency {node} has no register")),
            RegDep::Fresh(def) => def.register,
        }
    }

    /// Node whose use this entry accounts for.
    pub fn node(&self) -> NodeRef {
        match self {
            RegDep::Carried(node) => *node,
            RegDep::Fresh(def) => def.value,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, RegDep::Fresh(_))
    }
}

/// Ordered entries of a manifest.
#[derive(Debug, Default)]
pub struct ManifestData {
    pub entries: SmallVec<[RegDep; 4]>,
}

impl ManifestData {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
