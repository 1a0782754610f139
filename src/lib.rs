//! Arbor: post-register-allocation tree lowering for value-type aware
//! method compilation.
//!
//! The lowering itself lives in `arbor-passes`; this crate wires the text
//! format, the validator and the pass into one [`pipeline`] used by the
//! `arbor` command-line tool.

pub mod pipeline;

pub use pipeline::{ArborError, LowerOutput, PipelineOptions, lower_source, parse_and_validate};
