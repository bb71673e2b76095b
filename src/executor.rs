//! Query Executor
//!
//! Runs a validated plan against the in-memory engine. The dataset is
//! registered read-only under the fixed logical name in a fresh SQL context
//! per call, so no query can mutate it or see another session's data.
//! Row-cap and time-budget overruns become categorized failures; engine
//! errors carry the engine's message verbatim, which is the only input fed
//! back into the single regeneration retry.

use crate::dataset::{any_value_to_json, Dataset, LOGICAL_TABLE};
use crate::error::{InsightsError, Result};
use crate::query_agent::QueryPlan;
use polars::prelude::*;
use polars::sql::SQLContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Queries returning more rows than this fail rather than truncate.
    pub max_result_rows: usize,
    /// Wall-clock budget for one execution.
    pub time_budget: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_result_rows: 500,
            time_budget: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Engine,
    RowCapExceeded,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub category: FailureCategory,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, serde_json::Value>>,
    pub row_count: usize,
    pub elapsed_ms: u64,
}

/// Either a success payload or a failure payload; consumed immediately by
/// the synthesis agent or the retry edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    Success(QueryOutput),
    Failure(ExecutionFailure),
}

pub struct QueryExecutor {
    config: ExecutorConfig,
}

impl QueryExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Execute a validated plan. `Err` is reserved for internal faults
    /// (task panic); every expected failure comes back as
    /// `ExecutionResult::Failure` so the orchestrator can route the retry.
    pub async fn execute(&self, dataset: &Dataset, plan: &QueryPlan) -> Result<ExecutionResult> {
        let started = Instant::now();
        info!("Executing query: {}", plan.sql);

        // Cheap clone: column buffers are shared, and the SQL context only
        // ever reads from them.
        let frame = dataset.frame().clone();
        let sql = plan.sql.clone();
        let cap = self.config.max_result_rows;

        let task = tokio::task::spawn_blocking(move || -> std::result::Result<DataFrame, String> {
            let mut ctx = SQLContext::new();
            ctx.register(LOGICAL_TABLE, frame.lazy());
            let lazy = ctx.execute(&sql).map_err(|e| e.to_string())?;
            // Collect one row past the cap so overrun is detectable.
            lazy.limit((cap + 1) as u32)
                .collect()
                .map_err(|e| e.to_string())
        });

        let collected = match tokio::time::timeout(self.config.time_budget, task).await {
            Err(_) => {
                warn!("Query exceeded time budget of {:?}", self.config.time_budget);
                return Ok(ExecutionResult::Failure(ExecutionFailure {
                    category: FailureCategory::Timeout,
                    message: format!(
                        "query exceeded the {}s execution budget",
                        self.config.time_budget.as_secs()
                    ),
                }));
            }
            Ok(Err(join_err)) => {
                return Err(InsightsError::Execution(format!(
                    "engine task failed: {}",
                    join_err
                )))
            }
            Ok(Ok(result)) => result,
        };

        let frame = match collected {
            Ok(frame) => frame,
            Err(engine_message) => {
                warn!("Engine error: {}", engine_message);
                return Ok(ExecutionResult::Failure(ExecutionFailure {
                    category: FailureCategory::Engine,
                    message: engine_message,
                }));
            }
        };

        if frame.height() > cap {
            return Ok(ExecutionResult::Failure(ExecutionFailure {
                category: FailureCategory::RowCapExceeded,
                message: format!("query returned more than {} rows", cap),
            }));
        }

        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = dataframe_to_rows(&frame)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!("Query returned {} rows in {}ms", rows.len(), elapsed_ms);

        Ok(ExecutionResult::Success(QueryOutput {
            columns,
            row_count: rows.len(),
            rows,
            elapsed_ms,
        }))
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

fn dataframe_to_rows(frame: &DataFrame) -> Result<Vec<HashMap<String, serde_json::Value>>> {
    let column_names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::with_capacity(frame.height());
    for row_idx in 0..frame.height() {
        let mut row = HashMap::new();
        for name in &column_names {
            let series = frame.column(name)?;
            let av = series.get(row_idx)?;
            row.insert(name.clone(), any_value_to_json(&av));
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SourceFormat;

    fn plan(sql: &str) -> QueryPlan {
        QueryPlan {
            sql: sql.to_string(),
            referenced_columns: vec![],
            reasoning: None,
            confidence: None,
        }
    }

    fn sample_dataset() -> Dataset {
        Dataset::from_dataframe(
            df! [
                "region" => ["north", "south", "north", "west"],
                "amount" => [10.0, 20.0, 30.0, 40.0]
            ]
            .unwrap(),
            SourceFormat::Csv,
        )
    }

    #[tokio::test]
    async fn aggregates_over_the_logical_table() {
        let executor = QueryExecutor::default();
        let ds = sample_dataset();
        let result = executor
            .execute(&ds, &plan("SELECT SUM(amount) AS total FROM sales"))
            .await
            .unwrap();
        match result {
            ExecutionResult::Success(output) => {
                assert_eq!(output.row_count, 1);
                assert_eq!(output.rows[0]["total"], serde_json::json!(100.0));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn engine_error_is_a_categorized_failure_with_verbatim_message() {
        let executor = QueryExecutor::default();
        let ds = sample_dataset();
        let result = executor
            .execute(&ds, &plan("SELECT profit_margin FROM sales"))
            .await
            .unwrap();
        match result {
            ExecutionResult::Failure(failure) => {
                assert_eq!(failure.category, FailureCategory::Engine);
                assert!(!failure.message.is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn row_cap_overrun_is_a_failure_not_a_truncation() {
        let executor = QueryExecutor::new(ExecutorConfig {
            max_result_rows: 2,
            ..ExecutorConfig::default()
        });
        let ds = sample_dataset();
        let result = executor
            .execute(&ds, &plan("SELECT region, amount FROM sales"))
            .await
            .unwrap();
        match result {
            ExecutionResult::Failure(failure) => {
                assert_eq!(failure.category, FailureCategory::RowCapExceeded);
            }
            other => panic!("expected row-cap failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn execution_never_mutates_the_dataset() {
        let executor = QueryExecutor::default();
        let ds = sample_dataset();
        let before = ds.frame().clone();
        executor
            .execute(&ds, &plan("SELECT region FROM sales WHERE amount > 15"))
            .await
            .unwrap();
        assert!(ds.frame().equals(&before));
    }
}
