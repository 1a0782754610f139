//! Errors raised by lowering.

use arbor_ir::{NodeRef, Opcode};
use derive_more::{Display, Error};

/// A broken invariant found while lowering. Aborts the pass for the method.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum LoweringError {
    /// After the post-RA split, the anchored equality call was expected to
    /// read its result back from a register or a slot.
    #[display("anchored call has been turned into unexpected opcode {opcode} ({node})")]
    UnexpectedAnchoredOpcode { node: NodeRef, opcode: Opcode },
}
