//! Guardrail Validator
//!
//! Decides ANSWERABLE vs REFUSE before any LLM call is spent on query
//! generation, and re-validates generated plans for hallucinated columns.
//! A refusal is a designed terminal outcome, not an error: the pipeline
//! prefers an honest "the data cannot answer this" over a plausible
//! fabrication.

use crate::dataset::{any_value_to_text, Dataset};
use crate::error::{InsightsError, Result};
use crate::query_agent::QueryPlan;
use crate::schema_profiler::{SchemaDescriptor, SemanticType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const REASON_MISSING_TEMPORAL: &str = "missing temporal field";
pub const REASON_MISSING_MEASURE: &str = "missing measure field";
pub const REASON_UNKNOWN_ENTITY: &str = "unknown entity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Summarization,
    Qa,
}

/// A concept the guardrail extracted from the question text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Concept {
    /// The question compares values across time (YoY, trends, "last quarter").
    TemporalComparison,
    /// The question aggregates a monetary or quantity measure.
    MeasureAggregate,
    /// A named entity/category the question references literally.
    NamedEntity(String),
}

/// Parsed shape of one user request. Created per request, discarded after
/// the pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub mode: Mode,
    pub question: String,
    pub concepts: Vec<Concept>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Answerable,
    Refuse { reason: String },
}

const TEMPORAL_MARKERS: [&str; 16] = [
    "year-over-year",
    "year over year",
    "yoy",
    "month-over-month",
    "last year",
    "last quarter",
    "last month",
    "this year",
    "this quarter",
    "quarterly",
    "monthly",
    "per month",
    "per year",
    "over time",
    "trend",
    "growth",
];

const MEASURE_MARKERS: [&str; 15] = [
    "revenue",
    "sales",
    "amount",
    "total",
    "sum",
    "average",
    "avg",
    "mean",
    "spend",
    "price",
    "cost",
    "profit",
    "gmv",
    "quantity",
    "how much",
];

/// Capitalized temporal vocabulary ("in March", "since Monday") names a time
/// window, not a data entity, and must not trigger the unknown-entity rule.
const TEMPORAL_WORDS: [&str; 30] = [
    "january", "february", "march", "april", "may", "june", "july", "august",
    "september", "october", "november", "december", "jan", "feb", "mar",
    "apr", "jun", "jul", "aug", "sep", "oct", "nov", "dec", "monday",
    "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

pub struct GuardrailValidator {
    quoted_entity: Regex,
}

impl GuardrailValidator {
    pub fn new() -> Self {
        Self {
            // 'Electronics' or "North Region"
            quoted_entity: Regex::new(r#"'([^']+)'|"([^"]+)""#).expect("static regex"),
        }
    }

    /// Parse the raw question into an `Intent` with extracted concepts.
    pub fn extract_intent(&self, question: &str, mode: Mode) -> Intent {
        let lower = question.to_lowercase();
        let mut concepts = Vec::new();

        if TEMPORAL_MARKERS.iter().any(|m| lower.contains(m)) {
            concepts.push(Concept::TemporalComparison);
        }
        if MEASURE_MARKERS.iter().any(|m| lower.contains(m)) {
            concepts.push(Concept::MeasureAggregate);
        }
        for entity in self.extract_entities(question) {
            concepts.push(Concept::NamedEntity(entity));
        }

        debug!("Extracted concepts from question: {:?}", concepts);
        Intent {
            mode,
            question: question.to_string(),
            concepts,
        }
    }

    /// Named entities: quoted phrases plus capitalized mid-sentence words.
    fn extract_entities(&self, question: &str) -> Vec<String> {
        let mut entities: Vec<String> = Vec::new();

        for caps in self.quoted_entity.captures_iter(question) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                let e = m.as_str().trim().to_string();
                if !e.is_empty() && !entities.contains(&e) {
                    entities.push(e);
                }
            }
        }

        for (idx, word) in question.split_whitespace().enumerate() {
            if idx == 0 {
                continue;
            }
            let token: String = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string();
            let mut chars = token.chars();
            let capitalized = matches!(chars.next(), Some(first) if first.is_uppercase())
                && chars.all(|c| c.is_lowercase());
            if capitalized
                && token.len() > 2
                && !TEMPORAL_WORDS.contains(&token.to_lowercase().as_str())
                && !entities.contains(&token)
            {
                entities.push(token);
            }
        }

        entities
    }

    /// Ordered rule set, first match wins. Runs before any LLM call.
    pub fn validate(
        &self,
        intent: &Intent,
        schema: &SchemaDescriptor,
        dataset: &Dataset,
    ) -> Verdict {
        if intent.concepts.contains(&Concept::TemporalComparison)
            && !schema.has_type(SemanticType::Date)
        {
            return Verdict::Refuse {
                reason: REASON_MISSING_TEMPORAL.to_string(),
            };
        }

        if intent.concepts.contains(&Concept::MeasureAggregate)
            && !schema.has_type(SemanticType::Numeric)
        {
            return Verdict::Refuse {
                reason: REASON_MISSING_MEASURE.to_string(),
            };
        }

        for concept in &intent.concepts {
            if let Concept::NamedEntity(entity) = concept {
                if !self.entity_known(entity, schema, dataset) {
                    return Verdict::Refuse {
                        reason: format!("{}: {}", REASON_UNKNOWN_ENTITY, entity),
                    };
                }
            }
        }

        Verdict::Answerable
    }

    /// An entity is known if it appears in any categorical column's samples,
    /// or anywhere in the full values of a categorical column.
    fn entity_known(&self, entity: &str, schema: &SchemaDescriptor, dataset: &Dataset) -> bool {
        let categorical = schema.columns_of_type(SemanticType::Categorical);
        if categorical.is_empty() {
            // Nothing to check the entity against; let the query run rather
            // than refuse on a dataset without categorical columns.
            return true;
        }

        for column in &categorical {
            if column
                .sample_values
                .iter()
                .any(|v| v.eq_ignore_ascii_case(entity))
            {
                return true;
            }
        }

        // Samples missed it; scan the full column values.
        for column in &categorical {
            let Ok(series) = dataset.frame().column(&column.name) else {
                continue;
            };
            for idx in 0..series.len() {
                let Ok(av) = series.get(idx) else { continue };
                if let Some(text) = any_value_to_text(&av) {
                    if text.eq_ignore_ascii_case(entity) {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Lighter second pass on the generated plan: every referenced column
    /// must exist in the schema. Catches columns hallucinated by the model.
    pub fn validate_plan(&self, plan: &QueryPlan, schema: &SchemaDescriptor) -> Result<()> {
        let unknown: Vec<&str> = plan
            .referenced_columns
            .iter()
            .map(|c| c.as_str())
            .filter(|c| !schema.has_column(c))
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(InsightsError::Generation(format!(
                "query references unknown columns: {}",
                unknown.join(", ")
            )))
        }
    }
}

impl Default for GuardrailValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SourceFormat;
    use crate::schema_profiler;
    use polars::prelude::*;

    fn dataset_without_dates() -> Dataset {
        Dataset::from_dataframe(
            df! [
                "order_id" => ["o1", "o2", "o3"],
                "amount" => [10.0, 20.0, 30.0],
                "category" => ["toys", "games", "toys"]
            ]
            .unwrap(),
            SourceFormat::Csv,
        )
    }

    fn dataset_with_dates() -> Dataset {
        Dataset::from_dataframe(
            df! [
                "order_date" => ["2024-01-03", "2024-04-11", "2024-07-09"],
                "amount" => [10.0, 20.0, 30.0],
                "region" => ["north", "south", "north"]
            ]
            .unwrap(),
            SourceFormat::Csv,
        )
    }

    #[test]
    fn temporal_question_without_date_column_is_refused() {
        let validator = GuardrailValidator::new();
        let ds = dataset_without_dates();
        let schema = schema_profiler::profile(&ds).unwrap();
        let intent =
            validator.extract_intent("what was our year-over-year growth?", Mode::Qa);
        assert_eq!(
            validator.validate(&intent, &schema, &ds),
            Verdict::Refuse {
                reason: REASON_MISSING_TEMPORAL.to_string()
            }
        );
    }

    #[test]
    fn temporal_question_with_date_column_is_answerable() {
        let validator = GuardrailValidator::new();
        let ds = dataset_with_dates();
        let schema = schema_profiler::profile(&ds).unwrap();
        let intent = validator.extract_intent("total revenue last quarter", Mode::Qa);
        assert_eq!(validator.validate(&intent, &schema, &ds), Verdict::Answerable);
    }

    #[test]
    fn measure_question_without_numeric_column_is_refused() {
        let validator = GuardrailValidator::new();
        let ds = Dataset::from_dataframe(
            df! [
                "category" => ["toys", "games", "toys"],
                "region" => ["north", "south", "north"]
            ]
            .unwrap(),
            SourceFormat::Csv,
        );
        let schema = schema_profiler::profile(&ds).unwrap();
        let intent = validator.extract_intent("what is the total revenue?", Mode::Qa);
        assert_eq!(
            validator.validate(&intent, &schema, &ds),
            Verdict::Refuse {
                reason: REASON_MISSING_MEASURE.to_string()
            }
        );
    }

    #[test]
    fn unknown_quoted_entity_is_refused() {
        let validator = GuardrailValidator::new();
        let ds = dataset_with_dates();
        let schema = schema_profiler::profile(&ds).unwrap();
        let intent =
            validator.extract_intent("how many orders came from 'Atlantis'?", Mode::Qa);
        match validator.validate(&intent, &schema, &ds) {
            Verdict::Refuse { reason } => assert!(reason.starts_with(REASON_UNKNOWN_ENTITY)),
            v => panic!("expected refusal, got {:?}", v),
        }
    }

    #[test]
    fn month_names_are_not_treated_as_entities() {
        let validator = GuardrailValidator::new();
        let ds = dataset_with_dates();
        let schema = schema_profiler::profile(&ds).unwrap();
        let intent = validator.extract_intent("what was revenue in March?", Mode::Qa);
        assert!(intent
            .concepts
            .iter()
            .all(|c| !matches!(c, Concept::NamedEntity(_))));
        assert_eq!(validator.validate(&intent, &schema, &ds), Verdict::Answerable);
    }

    #[test]
    fn weekday_names_are_not_treated_as_entities() {
        let validator = GuardrailValidator::new();
        let ds = dataset_with_dates();
        let schema = schema_profiler::profile(&ds).unwrap();
        let intent =
            validator.extract_intent("how much did we sell since Monday?", Mode::Qa);
        assert_eq!(validator.validate(&intent, &schema, &ds), Verdict::Answerable);
    }

    #[test]
    fn known_entity_passes_even_when_not_in_samples() {
        let validator = GuardrailValidator::new();
        // "west" appears beyond the kept samples only if sample list is small;
        // here it is present in full values either way.
        let ds = Dataset::from_dataframe(
            df! [
                "region" => ["north", "south", "north", "west"],
                "amount" => [1.0, 2.0, 3.0, 4.0]
            ]
            .unwrap(),
            SourceFormat::Csv,
        );
        let schema = schema_profiler::profile(&ds).unwrap();
        let intent = validator.extract_intent("total sales in 'west'", Mode::Qa);
        assert_eq!(validator.validate(&intent, &schema, &ds), Verdict::Answerable);
    }

    #[test]
    fn plan_with_hallucinated_column_is_rejected() {
        let validator = GuardrailValidator::new();
        let ds = dataset_with_dates();
        let schema = schema_profiler::profile(&ds).unwrap();
        let plan = QueryPlan {
            sql: "SELECT SUM(profit_margin) FROM sales".to_string(),
            referenced_columns: vec!["profit_margin".to_string()],
            reasoning: None,
            confidence: None,
        };
        let err = validator.validate_plan(&plan, &schema).unwrap_err();
        assert!(matches!(err, InsightsError::Generation(_)));
        assert!(err.to_string().contains("profit_margin"));
    }

    #[test]
    fn plan_with_known_columns_passes() {
        let validator = GuardrailValidator::new();
        let ds = dataset_with_dates();
        let schema = schema_profiler::profile(&ds).unwrap();
        let plan = QueryPlan {
            sql: "SELECT SUM(amount) FROM sales".to_string(),
            referenced_columns: vec!["amount".to_string()],
            reasoning: None,
            confidence: None,
        };
        assert!(validator.validate_plan(&plan, &schema).is_ok());
    }
}
