//! Arbor tree IR.
//!
//! An arena-backed tree IR in the style of a method compiler's late,
//! post-register-allocation representation: nodes hang off statement
//! anchors (tree tops), tree tops are grouped into blocks bounded by
//! `BBStart`/`BBEnd` markers, and register-dependency manifests describe
//! which values live in which global registers across block boundaries.

pub mod cfg;
pub mod context;
pub mod manifest;
pub mod object_model;
pub mod opcode;
pub mod parser;
pub mod printer;
pub mod refs;
pub mod split;
pub mod symbol;
pub mod symtab;
pub mod validation;
pub mod walk;

pub use cfg::{Cfg, Structure};
pub use context::{BlockData, IrContext, NodeData, NodeDataBuilder, TreeTopData};
pub use manifest::{FreshDef, GlobalRegister, ManifestData, RegDep};
pub use object_model::ObjectModel;
pub use opcode::{DataType, Opcode};
pub use parser::{ParseError, parse_method};
pub use printer::{print_method, print_tree};
pub use refs::{BlockRef, ManifestRef, NodeRef, SymRef, TreeTopRef};
pub use split::{split_block, split_block_post_ra};
pub use symbol::Symbol;
pub use symtab::{NonHelperSymbol, RuntimeHelper, ShadowField, SymbolKind, SymbolTable};
pub use validation::{ValidationError, ValidationResult, validate};
pub use walk::{WalkAction, walk_trees};
