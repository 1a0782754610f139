//! Lowering passes for arbor tree IR.
//!
//! ## Pipeline
//!
//! [`TreeLowering`] runs after global register allocation. It rewrites
//! reference-equality calls into an inlined fast-path chain and guards
//! array store checks with a null check for value-type component classes.

pub mod config;
pub mod errors;
pub mod gate;
pub mod tree_lowering;

// Re-exports
pub use config::LoweringConfig;
pub use errors::LoweringError;
pub use gate::{AllowAll, TransformationBudget, TransformationGate};
pub use tree_lowering::{
    ArrayStoreCheckLowering, EqualityCallLowering, LoweringSession, LoweringStats, Transformer,
    TreeLowering,
};
