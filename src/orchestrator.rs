//! Orchestrator
//!
//! Sequences the agents into the two pipelines (summarization,
//! conversational Q&A) as an explicit state machine. States are first-class
//! values, every transition appends exactly one trace entry, and the single
//! retry edge from execution failure back to query generation is bounded to
//! one occurrence.

use crate::aggregates;
use crate::dataset::Dataset;
use crate::error::InsightsError;
use crate::executor::{ExecutionResult, ExecutorConfig, QueryExecutor, QueryOutput};
use crate::guardrail::{GuardrailValidator, Mode, Verdict};
use crate::llm::ChatModel;
use crate::query_agent::{LanguageToQueryAgent, QueryPlan, RetryContext};
use crate::schema_profiler::{self, SchemaDescriptor};
use crate::synthesis::AnswerSynthesisAgent;
use crate::trace::{DebugTrace, StepStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Pipeline states, used verbatim as trace step names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    ProfileSchema,
    ValidateIntent,
    GenerateQuery,
    ValidatePlan,
    Execute,
    ComputeAggregates,
    Synthesize,
}

impl PipelineStep {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::ProfileSchema => "profile_schema",
            PipelineStep::ValidateIntent => "validate_intent",
            PipelineStep::GenerateQuery => "generate_query",
            PipelineStep::ValidatePlan => "validate_plan",
            PipelineStep::Execute => "execute",
            PipelineStep::ComputeAggregates => "compute_aggregates",
            PipelineStep::Synthesize => "synthesize",
        }
    }
}

/// Terminal outcome of one pipeline run. A refusal is a designed outcome,
/// not an error; an answer is never produced alongside a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineOutcome {
    Answer(String),
    Refusal(String),
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub outcome: PipelineOutcome,
    pub trace: DebugTrace,
}

/// Q&A path states. The `attempt` counter makes the retry edge explicit:
/// it is 1 on the first pass and 2 after the single permitted regeneration.
enum QaState {
    GenerateQuery {
        retry: Option<RetryContext>,
        attempt: u8,
    },
    ValidatePlan {
        plan: QueryPlan,
        attempt: u8,
    },
    Execute {
        plan: QueryPlan,
        attempt: u8,
    },
    Synthesize {
        plan: QueryPlan,
        output: QueryOutput,
    },
    Done(PipelineOutcome),
}

const MAX_ATTEMPTS: u8 = 2;

pub struct Orchestrator {
    guardrail: GuardrailValidator,
    query_agent: LanguageToQueryAgent,
    synthesis: AnswerSynthesisAgent,
    executor: QueryExecutor,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn ChatModel>, executor_config: ExecutorConfig) -> Self {
        Self {
            guardrail: GuardrailValidator::new(),
            query_agent: LanguageToQueryAgent::new(Arc::clone(&llm)),
            synthesis: AnswerSynthesisAgent::new(llm),
            executor: QueryExecutor::new(executor_config),
        }
    }

    /// Run one request end to end. `question` is required in QA mode and
    /// ignored in summarization mode.
    pub async fn run(&self, mode: Mode, dataset: &Dataset, question: Option<&str>) -> PipelineRun {
        let mut trace = DebugTrace::new();
        info!("Pipeline {} starting in {:?} mode", trace.request_id, mode);

        let started = Instant::now();
        let schema = match schema_profiler::profile(dataset) {
            Ok(schema) => {
                trace.record(
                    PipelineStep::ProfileSchema.name(),
                    format!("{} column(s), {} row(s)", dataset.column_count(), dataset.row_count()),
                    format!("profiled {} column(s)", schema.columns.len()),
                    started,
                    StepStatus::Ok,
                );
                schema
            }
            Err(e) => {
                trace.record(
                    PipelineStep::ProfileSchema.name(),
                    format!("{} column(s), {} row(s)", dataset.column_count(), dataset.row_count()),
                    e.to_string(),
                    started,
                    StepStatus::Failed,
                );
                return PipelineRun {
                    outcome: PipelineOutcome::Error(e.to_string()),
                    trace,
                };
            }
        };

        let outcome = match mode {
            Mode::Summarization => self.run_summarization(dataset, &schema, &mut trace).await,
            Mode::Qa => match question {
                Some(question) => self.run_qa(dataset, &schema, question, &mut trace).await,
                None => PipelineOutcome::Error(
                    "a question is required in conversational Q&A mode".to_string(),
                ),
            },
        };

        info!("Pipeline {} finished: {:?}", trace.request_id, outcome_label(&outcome));
        PipelineRun { outcome, trace }
    }

    async fn run_summarization(
        &self,
        dataset: &Dataset,
        schema: &SchemaDescriptor,
        trace: &mut DebugTrace,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let aggregates = match aggregates::compute(dataset, schema) {
            Ok(agg) => {
                trace.record(
                    PipelineStep::ComputeAggregates.name(),
                    format!("{} row(s)", dataset.row_count()),
                    format!(
                        "total={:?}, months={}, top categories={}",
                        agg.total_amount,
                        agg.monthly_trend.len(),
                        agg.top_categories.len()
                    ),
                    started,
                    StepStatus::Ok,
                );
                agg
            }
            Err(e) => {
                trace.record(
                    PipelineStep::ComputeAggregates.name(),
                    format!("{} row(s)", dataset.row_count()),
                    e.to_string(),
                    started,
                    StepStatus::Failed,
                );
                return PipelineOutcome::Error(e.to_string());
            }
        };

        let started = Instant::now();
        match self.synthesis.summarize(schema, &aggregates).await {
            Ok(summary) => {
                trace.record(
                    PipelineStep::Synthesize.name(),
                    "precomputed aggregates".to_string(),
                    preview(&summary),
                    started,
                    StepStatus::Ok,
                );
                PipelineOutcome::Answer(summary)
            }
            Err(e) => {
                trace.record(
                    PipelineStep::Synthesize.name(),
                    "precomputed aggregates".to_string(),
                    e.to_string(),
                    started,
                    StepStatus::Failed,
                );
                PipelineOutcome::Error(transient_or_message(e))
            }
        }
    }

    async fn run_qa(
        &self,
        dataset: &Dataset,
        schema: &SchemaDescriptor,
        question: &str,
        trace: &mut DebugTrace,
    ) -> PipelineOutcome {
        // Guardrail: refuse before any LLM call is spent.
        let started = Instant::now();
        let intent = self.guardrail.extract_intent(question, Mode::Qa);
        match self.guardrail.validate(&intent, schema, dataset) {
            Verdict::Answerable => {
                trace.record(
                    PipelineStep::ValidateIntent.name(),
                    question.to_string(),
                    "answerable".to_string(),
                    started,
                    StepStatus::Ok,
                );
            }
            Verdict::Refuse { reason } => {
                warn!("Guardrail refused question: {}", reason);
                trace.record(
                    PipelineStep::ValidateIntent.name(),
                    question.to_string(),
                    format!("refused: {}", reason),
                    started,
                    StepStatus::Refused,
                );
                return PipelineOutcome::Refusal(format!(
                    "This dataset cannot answer the question: {}.",
                    reason
                ));
            }
        }

        let mut state = QaState::GenerateQuery {
            retry: None,
            attempt: 1,
        };

        loop {
            state = match state {
                QaState::GenerateQuery { retry, attempt } => {
                    let started = Instant::now();
                    let input = if retry.is_some() {
                        format!("{} [retry]", question)
                    } else {
                        question.to_string()
                    };
                    match self
                        .query_agent
                        .generate(question, schema, retry.as_ref())
                        .await
                    {
                        Ok(plan) => {
                            trace.record(
                                PipelineStep::GenerateQuery.name(),
                                input,
                                plan.sql.clone(),
                                started,
                                StepStatus::Ok,
                            );
                            QaState::ValidatePlan { plan, attempt }
                        }
                        Err(e) => {
                            trace.record(
                                PipelineStep::GenerateQuery.name(),
                                input,
                                e.to_string(),
                                started,
                                StepStatus::Failed,
                            );
                            match e {
                                InsightsError::Generation(message) if attempt < MAX_ATTEMPTS => {
                                    QaState::GenerateQuery {
                                        retry: Some(RetryContext {
                                            prior_sql: "(previous reply was not a valid query)"
                                                .to_string(),
                                            error: message,
                                        }),
                                        attempt: attempt + 1,
                                    }
                                }
                                InsightsError::Generation(_) => QaState::Done(
                                    PipelineOutcome::Error(could_not_translate(question)),
                                ),
                                other => QaState::Done(PipelineOutcome::Error(
                                    transient_or_message(other),
                                )),
                            }
                        }
                    }
                }
                QaState::ValidatePlan { plan, attempt } => {
                    let started = Instant::now();
                    match self.guardrail.validate_plan(&plan, schema) {
                        Ok(()) => {
                            trace.record(
                                PipelineStep::ValidatePlan.name(),
                                plan.sql.clone(),
                                format!("plan ok ({} column(s))", plan.referenced_columns.len()),
                                started,
                                StepStatus::Ok,
                            );
                            QaState::Execute { plan, attempt }
                        }
                        Err(e) => {
                            trace.record(
                                PipelineStep::ValidatePlan.name(),
                                plan.sql.clone(),
                                e.to_string(),
                                started,
                                StepStatus::Failed,
                            );
                            if attempt < MAX_ATTEMPTS {
                                QaState::GenerateQuery {
                                    retry: Some(RetryContext {
                                        prior_sql: plan.sql,
                                        error: e.to_string(),
                                    }),
                                    attempt: attempt + 1,
                                }
                            } else {
                                QaState::Done(PipelineOutcome::Error(could_not_translate(
                                    question,
                                )))
                            }
                        }
                    }
                }
                QaState::Execute { plan, attempt } => {
                    let started = Instant::now();
                    match self.executor.execute(dataset, &plan).await {
                        Ok(ExecutionResult::Success(output)) => {
                            trace.record(
                                PipelineStep::Execute.name(),
                                plan.sql.clone(),
                                format!("{} row(s) in {}ms", output.row_count, output.elapsed_ms),
                                started,
                                StepStatus::Ok,
                            );
                            QaState::Synthesize { plan, output }
                        }
                        Ok(ExecutionResult::Failure(failure)) => {
                            trace.record(
                                PipelineStep::Execute.name(),
                                plan.sql.clone(),
                                format!("{:?}: {}", failure.category, failure.message),
                                started,
                                StepStatus::Failed,
                            );
                            if attempt < MAX_ATTEMPTS {
                                // The engine's message, verbatim, is the only
                                // context the regeneration sees.
                                QaState::GenerateQuery {
                                    retry: Some(RetryContext {
                                        prior_sql: plan.sql,
                                        error: failure.message,
                                    }),
                                    attempt: attempt + 1,
                                }
                            } else {
                                QaState::Done(PipelineOutcome::Error(format!(
                                    "The generated query could not be executed: {}",
                                    failure.message
                                )))
                            }
                        }
                        Err(e) => {
                            trace.record(
                                PipelineStep::Execute.name(),
                                plan.sql.clone(),
                                e.to_string(),
                                started,
                                StepStatus::Failed,
                            );
                            QaState::Done(PipelineOutcome::Error(e.to_string()))
                        }
                    }
                }
                QaState::Synthesize { plan, output } => {
                    let started = Instant::now();
                    match self
                        .synthesis
                        .answer_question(question, &plan.sql, &output)
                        .await
                    {
                        Ok(answer) => {
                            trace.record(
                                PipelineStep::Synthesize.name(),
                                format!("{} result row(s)", output.row_count),
                                preview(&answer),
                                started,
                                StepStatus::Ok,
                            );
                            QaState::Done(PipelineOutcome::Answer(answer))
                        }
                        Err(e) => {
                            trace.record(
                                PipelineStep::Synthesize.name(),
                                format!("{} result row(s)", output.row_count),
                                e.to_string(),
                                started,
                                StepStatus::Failed,
                            );
                            QaState::Done(PipelineOutcome::Error(transient_or_message(e)))
                        }
                    }
                }
                QaState::Done(outcome) => return outcome,
            };
        }
    }
}

fn could_not_translate(question: &str) -> String {
    format!("could not translate question into a valid query: \"{}\"", question)
}

fn transient_or_message(e: InsightsError) -> String {
    if e.is_transient() {
        format!("The language model is temporarily unavailable, please try again. ({})", e)
    } else {
        e.to_string()
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(LIMIT).collect();
        format!("{}...", truncated)
    }
}

fn outcome_label(outcome: &PipelineOutcome) -> &'static str {
    match outcome {
        PipelineOutcome::Answer(_) => "answer",
        PipelineOutcome::Refusal(_) => "refusal",
        PipelineOutcome::Error(_) => "error",
    }
}
