//! Schema Profiler
//!
//! Derives a `SchemaDescriptor` from a loaded dataset: per-column semantic
//! type, nullability and a few sample values. Pure function of the dataset;
//! the descriptor is regenerated on every upload and drives both the
//! guardrail rules and the schema context embedded in agent prompts.

use crate::dataset::{any_value_to_text, Dataset};
use crate::error::{InsightsError, Result};
use itertools::Itertools;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// How many non-null values to inspect per column when inferring a type.
const SAMPLE_LIMIT: usize = 100;

/// How many sample values to keep in the descriptor for prompts/guardrails.
const KEPT_SAMPLES: usize = 5;

/// Columns with at most this many distinct values count as categorical even
/// on small datasets where the distinct/row ratio is uninformative.
const SMALL_CARDINALITY: usize = 12;

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Identifier,
    Categorical,
    Numeric,
    Date,
    Boolean,
    Text,
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SemanticType::Identifier => "identifier",
            SemanticType::Categorical => "categorical",
            SemanticType::Numeric => "numeric",
            SemanticType::Date => "date",
            SemanticType::Boolean => "boolean",
            SemanticType::Text => "text",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub columns: Vec<ColumnProfile>,
    pub row_count: usize,
}

impl SchemaDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn has_type(&self, semantic_type: SemanticType) -> bool {
        self.columns.iter().any(|c| c.semantic_type == semantic_type)
    }

    pub fn columns_of_type(&self, semantic_type: SemanticType) -> Vec<&ColumnProfile> {
        self.columns
            .iter()
            .filter(|c| c.semantic_type == semantic_type)
            .collect()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Schema block embedded into agent prompts: one line per column with
    /// type and a few sample values.
    pub fn describe_for_prompt(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                let samples = if c.sample_values.is_empty() {
                    "no samples".to_string()
                } else {
                    format!("e.g. {}", c.sample_values.iter().join(", "))
                };
                format!(
                    "- \"{}\" ({}{}; {})",
                    c.name,
                    c.semantic_type,
                    if c.nullable { ", nullable" } else { "" },
                    samples
                )
            })
            .join("\n")
    }
}

/// Profile a dataset into a schema descriptor.
///
/// Fails with `EmptyDataset` when there are no columns or no rows; the
/// orchestrator surfaces that before entering either pipeline.
pub fn profile(dataset: &Dataset) -> Result<SchemaDescriptor> {
    let frame = dataset.frame();
    if frame.width() == 0 {
        return Err(InsightsError::EmptyDataset(
            "dataset has no columns".to_string(),
        ));
    }
    if frame.height() == 0 {
        return Err(InsightsError::EmptyDataset("dataset has no rows".to_string()));
    }

    let mut columns = Vec::with_capacity(frame.width());
    for series in frame.get_columns() {
        columns.push(profile_column(series, frame.height())?);
    }

    Ok(SchemaDescriptor {
        columns,
        row_count: frame.height(),
    })
}

fn profile_column(series: &Series, row_count: usize) -> Result<ColumnProfile> {
    let name = series.name().to_string();
    let nullable = series.null_count() > 0;

    // Scan for up to SAMPLE_LIMIT non-null values; sparse columns with long
    // null runs still yield a usable sample.
    let mut samples: Vec<String> = Vec::new();
    let mut inspected = 0usize;
    for idx in 0..series.len() {
        if inspected == SAMPLE_LIMIT {
            break;
        }
        let av = series.get(idx)?;
        if let Some(text) = any_value_to_text(&av) {
            inspected += 1;
            if !samples.contains(&text) {
                samples.push(text);
            }
        }
    }

    let distinct = series.n_unique()?;
    let non_null = series.len() - series.null_count();
    let semantic_type = infer_type(&name, series, &samples, distinct, non_null, row_count);

    samples.truncate(KEPT_SAMPLES);
    Ok(ColumnProfile {
        name,
        semantic_type,
        nullable,
        sample_values: samples,
    })
}

/// Fixed inference precedence: identifier → date → numeric → boolean →
/// categorical → text. First match wins.
fn infer_type(
    name: &str,
    series: &Series,
    samples: &[String],
    distinct: usize,
    non_null: usize,
    row_count: usize,
) -> SemanticType {
    if looks_like_identifier(name, series, samples, distinct, non_null) {
        return SemanticType::Identifier;
    }
    if is_date_like(series, samples) {
        return SemanticType::Date;
    }
    if is_numeric_like(series, samples) {
        return SemanticType::Numeric;
    }
    if is_boolean_like(series, samples) {
        return SemanticType::Boolean;
    }
    if is_categorical(distinct, row_count) {
        return SemanticType::Categorical;
    }
    SemanticType::Text
}

fn looks_like_identifier(
    name: &str,
    series: &Series,
    samples: &[String],
    distinct: usize,
    non_null: usize,
) -> bool {
    let lname = name.to_lowercase();
    let name_hint = lname == "id"
        || lname.ends_with("_id")
        || lname.ends_with("_key")
        || lname.ends_with("_code")
        || lname.ends_with("_number");
    if name_hint {
        return true;
    }
    // Fully unique string columns are treated as identifiers. Numeric columns
    // need a name hint so measures with distinct values stay numeric, and
    // date-parseable strings fall through to the date rule even when unique.
    series.dtype() == &DataType::String
        && non_null > 1
        && distinct == non_null
        && !samples.iter().all(|s| parses_as_date(s))
}

fn is_date_like(series: &Series, samples: &[String]) -> bool {
    if matches!(series.dtype(), DataType::Date | DataType::Datetime(_, _)) {
        return true;
    }
    if series.dtype() != &DataType::String || samples.is_empty() {
        return false;
    }
    samples.iter().all(|s| parses_as_date(s))
}

fn parses_as_date(value: &str) -> bool {
    parse_date_str(value).is_some()
}

/// Parse a date string in any of the accepted formats.
pub(crate) fn parse_date_str(value: &str) -> Option<chrono::NaiveDate> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = chrono::NaiveDate::parse_from_str(value, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.date());
        }
    }
    None
}

fn is_numeric_like(series: &Series, samples: &[String]) -> bool {
    if series.dtype().is_numeric() {
        return true;
    }
    if series.dtype() != &DataType::String || samples.is_empty() {
        return false;
    }
    samples.iter().all(|s| s.trim().parse::<f64>().is_ok())
}

fn is_boolean_like(series: &Series, samples: &[String]) -> bool {
    if series.dtype() == &DataType::Boolean {
        return true;
    }
    if samples.is_empty() {
        return false;
    }
    samples.iter().all(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "false" | "yes" | "no" | "0" | "1"
        )
    })
}

fn is_categorical(distinct: usize, row_count: usize) -> bool {
    distinct <= SMALL_CARDINALITY || (distinct as f64) / (row_count.max(1) as f64) <= 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SourceFormat;

    fn profile_df(df: DataFrame) -> SchemaDescriptor {
        profile(&Dataset::from_dataframe(df, SourceFormat::Csv)).unwrap()
    }

    #[test]
    fn infers_identifier_from_name() {
        let schema = profile_df(
            df! [
                "order_id" => ["o1", "o2", "o3"],
                "amount" => [10.0, 20.0, 30.0]
            ]
            .unwrap(),
        );
        assert_eq!(
            schema.column("order_id").unwrap().semantic_type,
            SemanticType::Identifier
        );
    }

    #[test]
    fn unique_measure_column_stays_numeric() {
        let schema = profile_df(
            df! [
                "amount" => [10.5, 22.0, 37.25]
            ]
            .unwrap(),
        );
        assert_eq!(
            schema.column("amount").unwrap().semantic_type,
            SemanticType::Numeric
        );
    }

    #[test]
    fn infers_date_from_string_samples() {
        let schema = profile_df(
            df! [
                "order_date" => ["2024-01-03", "2024-02-11", "2024-03-09"],
                "region" => ["north", "south", "north"]
            ]
            .unwrap(),
        );
        assert_eq!(
            schema.column("order_date").unwrap().semantic_type,
            SemanticType::Date
        );
        assert_eq!(
            schema.column("region").unwrap().semantic_type,
            SemanticType::Categorical
        );
    }

    #[test]
    fn date_precedes_numeric_for_parseable_strings() {
        // "20240103" style strings parse as numbers but not dates; plain ISO
        // dates must win the precedence race against numeric.
        let schema = profile_df(
            df! [
                "d" => ["2024-01-03", "2024-01-04", "2024-01-05"]
            ]
            .unwrap(),
        );
        assert_eq!(schema.column("d").unwrap().semantic_type, SemanticType::Date);
    }

    #[test]
    fn boolean_strings_are_boolean() {
        let schema = profile_df(
            df! [
                "returned" => ["yes", "no", "no"]
            ]
            .unwrap(),
        );
        assert_eq!(
            schema.column("returned").unwrap().semantic_type,
            SemanticType::Boolean
        );
    }

    #[test]
    fn nullable_flag_reflects_nulls() {
        let schema = profile_df(
            df! [
                "amount" => [Some(1.0), None, Some(3.0)]
            ]
            .unwrap(),
        );
        assert!(schema.column("amount").unwrap().nullable);
    }

    #[test]
    fn long_null_run_does_not_defeat_sampling() {
        let mut values: Vec<Option<&str>> = vec![None; 120];
        for v in values.iter_mut().skip(110) {
            *v = Some("2024-01-03");
        }
        let schema = profile_df(
            df! [
                "shipped_on" => values
            ]
            .unwrap(),
        );
        let col = schema.column("shipped_on").unwrap();
        assert_eq!(col.semantic_type, SemanticType::Date);
        assert!(col.nullable);
        assert_eq!(col.sample_values, vec!["2024-01-03".to_string()]);
    }

    #[test]
    fn empty_frame_is_an_error() {
        let df = df! [
            "a" => Vec::<i64>::new()
        ]
        .unwrap();
        let err = profile(&Dataset::from_dataframe(df, SourceFormat::Csv)).unwrap_err();
        assert!(matches!(err, InsightsError::EmptyDataset(_)));
    }

    #[test]
    fn every_column_appears_exactly_once() {
        let schema = profile_df(
            df! [
                "a" => [1i64, 2, 3],
                "b" => ["x", "y", "x"]
            ]
            .unwrap(),
        );
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.column_names(), vec!["a", "b"]);
    }
}
