//! Reference interpreter for arbor tree IR.
//!
//! Executes a method body against a small object [`Heap`]. Global
//! registers are modelled explicitly: taking an edge into a block that is
//! not an extension keeps only the registers named by that edge's manifest,
//! so a manifest that forgets a live register makes the target's register
//! load fail instead of silently reading a stale value.
//!
//! This is a test tool for checking that lowering preserves behaviour; it
//! makes no attempt to be fast.

pub mod heap;
pub mod machine;
pub mod value;

pub use heap::{ClassData, ClassId, Heap, ObjectData, ObjectId};
pub use machine::{Completion, EvalError, Exception, Machine};
pub use value::Value;
