//! Pipelines shipped with the binary.

pub mod capture;

use crate::core::{EngineError, PipelineRegistry};

/// Register every built-in pipeline
pub fn register_builtin(registry: &PipelineRegistry) -> Result<(), EngineError> {
    registry.register(capture::definition())?;
    Ok(())
}
