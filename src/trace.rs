//! Debug trace for one pipeline run.
//!
//! Every state the orchestrator enters appends exactly one `TraceEntry`;
//! the finished trace is handed to the caller for inspection and never
//! mutated afterwards. It is not fed back into the pipeline.

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Refused,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step: String,
    pub input_summary: String,
    pub output_summary: String,
    pub latency_ms: u64,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugTrace {
    /// One id per pipeline run, for log correlation.
    pub request_id: String,
    pub entries: Vec<TraceEntry>,
}

impl DebugTrace {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one completed step. `started` is when the step began; latency
    /// is measured here so entries are ordered by invocation time.
    pub fn record(
        &mut self,
        step: &str,
        input_summary: impl Into<String>,
        output_summary: impl Into<String>,
        started: Instant,
        status: StepStatus,
    ) {
        self.entries.push(TraceEntry {
            step: step.to_string(),
            input_summary: input_summary.into(),
            output_summary: output_summary.into(),
            latency_ms: started.elapsed().as_millis() as u64,
            status,
        });
    }

    pub fn steps(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.step.as_str()).collect()
    }
}

impl Default for DebugTrace {
    fn default() -> Self {
        Self::new()
    }
}
