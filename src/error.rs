use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Query generation error: {0}")]
    Generation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

impl InsightsError {
    /// True for failures the caller can simply retry (network, rate limit,
    /// transport timeout) as opposed to terminal pipeline failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, InsightsError::Llm(_))
    }
}

pub type Result<T> = std::result::Result<T, InsightsError>;
