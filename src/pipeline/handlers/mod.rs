mod analytics;
mod board;
mod convert;
mod extract;
mod moves;
mod stages;

pub use analytics::*;
pub use board::*;
pub use convert::*;
pub use extract::{ApiJson, ApiPath, ApiQuery, OptionalJson};
pub use moves::*;
pub use stages::*;

use crate::pipeline::error::PipelineError;

/// Unwraps a required body field, naming it in the error the way clients send it.
pub(crate) fn required<T>(value: Option<T>, field: &str) -> Result<T, PipelineError> {
    value.ok_or_else(|| PipelineError::Validation(format!("{field} is required")))
}
