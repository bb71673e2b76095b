//! Answer Synthesis Agent
//!
//! Turns query results (QA mode) or the precomputed aggregates
//! (summarization mode) into a natural-language answer. Both prompts forbid
//! the model from citing any figure not present in the supplied payload;
//! grounding is the whole point of this step.

use crate::aggregates::SummaryAggregates;
use crate::error::Result;
use crate::executor::QueryOutput;
use crate::llm::ChatModel;
use crate::schema_profiler::SchemaDescriptor;
use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;

/// Rows beyond this are not shown to the model.
const PROMPT_ROW_LIMIT: usize = 20;

const QA_SYSTEM_PROMPT: &str = r#"You are a helpful retail data analyst. Answer the user's question based strictly on the SQL query results provided.

INSTRUCTIONS:
1. Answer the question directly and naturally.
2. Cite ONLY values that appear in the results. Never introduce a number that is not present in the input.
3. Format large numbers readably (e.g. "8.4 million").
4. If the results are empty, say that no matching data was found; do not guess.

ANSWER:"#;

const SUMMARY_SYSTEM_PROMPT: &str = r#"You are a senior retail analytics consultant. You are given a schema profile and precomputed aggregates from a sales dataset. Write a concise, business-friendly summary of performance in 3-6 bullet points. Highlight growth or decline, best performing categories if visible, and any anomalies.

Cite ONLY figures present in the provided aggregates. Never introduce a number that is not in the input. If a figure is missing (for example no date column), simply omit that angle."#;

pub struct AnswerSynthesisAgent {
    llm: Arc<dyn ChatModel>,
}

impl AnswerSynthesisAgent {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    /// QA mode: question + bounded result payload → grounded answer.
    pub async fn answer_question(
        &self,
        question: &str,
        sql: &str,
        output: &QueryOutput,
    ) -> Result<String> {
        let results_block = format_results(output);
        let user = format!(
            "USER QUESTION: \"{}\"\n\nSQL QUERY EXECUTED:\n{}\n\nQUERY RESULTS:\n{}",
            question, sql, results_block
        );
        debug!("Synthesizing answer from {} result rows", output.row_count);
        let raw = self.llm.chat(QA_SYSTEM_PROMPT, &user).await?;
        Ok(clean_answer(&raw))
    }

    /// Summarization mode: schema profile + aggregates → bullet narrative.
    pub async fn summarize(
        &self,
        schema: &SchemaDescriptor,
        aggregates: &SummaryAggregates,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "profile": {
                "row_count": schema.row_count,
                "columns": schema.columns,
            },
            "aggregates": aggregates,
        });
        let user = serde_json::to_string_pretty(&payload)?;
        let raw = self.llm.chat(SUMMARY_SYSTEM_PROMPT, &user).await?;
        Ok(clean_answer(&raw))
    }
}

fn format_results(output: &QueryOutput) -> String {
    if output.rows.is_empty() {
        return "No rows returned.".to_string();
    }
    if output.rows.len() == 1 {
        // Single row, typically an aggregate; render it inline.
        let row = &output.rows[0];
        return output
            .columns
            .iter()
            .filter_map(|col| row.get(col).map(|v| format!("{}: {}", col, render_value(v))))
            .join(", ");
    }
    let shown = output.rows.len().min(PROMPT_ROW_LIMIT);
    let rows_json = serde_json::to_string_pretty(&output.rows[..shown]).unwrap_or_default();
    format!(
        "{} rows with columns [{}]; first {} rows:\n{}",
        output.row_count,
        output.columns.join(", "),
        shown,
        rows_json
    )
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

fn clean_answer(raw: &str) -> String {
    raw.trim().trim_start_matches("ANSWER:").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn single_row_results_render_inline() {
        let output = QueryOutput {
            columns: vec!["total".to_string()],
            rows: vec![HashMap::from([(
                "total".to_string(),
                serde_json::json!(123.5),
            )])],
            row_count: 1,
            elapsed_ms: 3,
        };
        assert_eq!(format_results(&output), "total: 123.5");
    }

    #[test]
    fn empty_results_are_stated() {
        let output = QueryOutput {
            columns: vec!["total".to_string()],
            rows: vec![],
            row_count: 0,
            elapsed_ms: 1,
        };
        assert_eq!(format_results(&output), "No rows returned.");
    }

    #[test]
    fn answer_prefix_is_stripped() {
        assert_eq!(clean_answer("ANSWER: total was 100"), "total was 100");
        assert_eq!(clean_answer("  total was 100  "), "total was 100");
    }
}
