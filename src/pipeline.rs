//! Text-to-text lowering pipeline.
//!
//! ```text
//! source text
//!     │
//!     ▼
//! parse_method ─► IrContext
//!     │
//!     ▼
//! validate ─► rejected with ArborError::Invalid { stage: "input" }
//!     │
//!     ▼
//! TreeLowering (AllowAll or TransformationBudget)
//!     │
//!     ▼
//! validate ─► rejected with ArborError::Invalid { stage: "lowered" }
//!     │
//!     ▼
//! print_method ─► lowered text
//! ```

use arbor_ir::{IrContext, ParseError, ValidationResult, parse_method, print_method, validate};
use arbor_passes::{LoweringConfig, LoweringError, LoweringStats, TransformationBudget, TreeLowering};
use derive_more::{Display, Error, From};
use tracing::{debug, info};

/// Anything that stops the pipeline.
#[derive(Debug, Display, Error, From)]
pub enum ArborError {
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    #[display("{_0}")]
    Parse(ParseError),
    #[display("{stage} method body is malformed: {report}")]
    #[from(ignore)]
    Invalid {
        stage: &'static str,
        report: ValidationResult,
    },
    #[display("lowering failed: {_0}")]
    Lowering(LoweringError),
}

/// How to run the lowering.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineOptions {
    pub config: LoweringConfig,
    /// Allow only this many transformation steps.
    pub last_transformation: Option<usize>,
}

#[derive(Debug)]
pub struct LowerOutput {
    pub text: String,
    pub stats: LoweringStats,
}

/// Parse a method body and check that it is well formed.
pub fn parse_and_validate(source: &str) -> Result<IrContext, ArborError> {
    let ctx = parse_method(source)?;
    check(&ctx, "input")?;
    Ok(ctx)
}

/// Parse, lower and print one method body.
pub fn lower_source(source: &str, options: &PipelineOptions) -> Result<LowerOutput, ArborError> {
    let mut ctx = parse_and_validate(source)?;
    let lowering = TreeLowering::new(options.config);
    let stats = match options.last_transformation {
        Some(limit) => {
            let mut gate = TransformationBudget::new(limit);
            let stats = lowering.perform_with_gate(&mut ctx, &mut gate)?;
            debug!(limit, requested = gate.requested(), "transformation budget");
            stats
        }
        None => lowering.perform(&mut ctx)?,
    };
    info!(method = %ctx.name, ?stats, "lowered");
    check(&ctx, "lowered")?;
    Ok(LowerOutput {
        text: print_method(&ctx),
        stats,
    })
}

fn check(ctx: &IrContext, stage: &'static str) -> Result<(), ArborError> {
    let report = validate(ctx);
    if report.is_ok() {
        Ok(())
    } else {
        Err(ArborError::Invalid { stage, report })
    }
}
