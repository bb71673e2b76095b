pub mod aggregates;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod guardrail;
pub mod llm;
pub mod orchestrator;
pub mod query_agent;
pub mod schema_profiler;
pub mod synthesis;
pub mod trace;
