use alloy_primitives::I256;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = i32;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run is associated with the round
    #[default]
    Unknown,
    Running,
    Completed,
    Errored,
}

impl RunStatus {
    pub fn finished(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Errored)
    }

    pub fn errored(&self) -> bool {
        matches!(self, RunStatus::Errored)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Unknown => write!(f, "unknown"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Errored => write!(f, "errored"),
        }
    }
}

/// The final output of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Value(BigDecimal),
    Error(String),
}

/// What the runner needs to know about the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub job_id: JobId,
    pub job_name: String,
    /// Runner specific description of the observation, e.g. a url
    pub source: String,
}

/// Metadata passed along with each run so the observation can refer to the
/// prior on-chain state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVars {
    pub job_id: JobId,
    pub job_name: String,
    pub latest_answer: Option<I256>,
    pub updated_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Assigned when the finished run is persisted
    pub id: Option<RunId>,
    pub job_id: JobId,
    pub status: RunStatus,
    pub result: RunResult,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn completed(job_id: JobId, value: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            job_id,
            status: RunStatus::Completed,
            result: RunResult::Value(value),
            created_at: now,
            finished_at: Some(now),
        }
    }

    pub fn errored(job_id: JobId, error: impl ToString) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            job_id,
            status: RunStatus::Errored,
            result: RunResult::Error(error.to_string()),
            created_at: now,
            finished_at: Some(now),
        }
    }

    pub fn answer(&self) -> Result<&BigDecimal, &str> {
        match &self.result {
            RunResult::Value(value) => Ok(value),
            RunResult::Error(err) => Err(err),
        }
    }
}
