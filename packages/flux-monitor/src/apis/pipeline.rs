use async_trait::async_trait;
use flux_types::{PipelineRun, PipelineSpec, PipelineVars};
use thiserror::Error;

/// Computes a candidate answer.
///
/// A run whose observation failed is still `Ok`, with an errored status. `Err`
/// is reserved for failing to run at all.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn execute_run(
        &self,
        spec: &PipelineSpec,
        vars: &PipelineVars,
    ) -> Result<PipelineRun, PipelineError>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline execution: {0:?}")]
    Execution(anyhow::Error),

    #[error("pipeline execution timed out")]
    Timeout,
}
