//! Dataset ingestion.
//!
//! A `Dataset` is the immutable, in-memory relation one session works on. It
//! is replaced wholesale when a new file is loaded and never mutated in place;
//! the executor only ever binds it read-only under the logical table name.

use crate::error::{InsightsError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// The single logical table name every generated query runs against.
pub const LOGICAL_TABLE: &str = "sales";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
    source_format: SourceFormat,
}

impl Dataset {
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let frame = LazyCsvReader::new(path)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(1000))
            .finish()
            .map_err(|e| InsightsError::Ingestion(format!("Failed to read CSV: {}", e)))?
            .collect()
            .map_err(|e| InsightsError::Ingestion(format!("Failed to parse CSV: {}", e)))?;
        Ok(Self {
            frame,
            source_format: SourceFormat::Csv,
        })
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| InsightsError::Ingestion(format!("Failed to open JSON file: {}", e)))?;
        let frame = JsonReader::new(file)
            .with_json_format(JsonFormat::Json)
            .finish()
            .map_err(|e| InsightsError::Ingestion(format!("Failed to parse JSON: {}", e)))?;
        Ok(Self {
            frame,
            source_format: SourceFormat::Json,
        })
    }

    /// Wrap an already-loaded frame (used by hosting surfaces that do their
    /// own ingestion, and by tests).
    pub fn from_dataframe(frame: DataFrame, source_format: SourceFormat) -> Self {
        Self {
            frame,
            source_format,
        }
    }

    /// Load by file extension; the upload surface accepts .csv and .json.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Self::from_csv_path(path),
            Some("json") => Self::from_json_path(path),
            other => Err(InsightsError::Ingestion(format!(
                "Unsupported file type {:?}; upload CSV or JSON",
                other.unwrap_or("none")
            ))),
        }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn source_format(&self) -> SourceFormat {
        self.source_format
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn column_count(&self) -> usize {
        self.frame.width()
    }
}

/// Convert epoch-day offsets (Polars `Date` physical repr) to a calendar date.
pub(crate) fn date_from_epoch_days(days: i32) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
}

/// Render one cell as display text; None for nulls.
pub(crate) fn any_value_to_text(av: &AnyValue) -> Option<String> {
    match av {
        AnyValue::Null => None,
        AnyValue::String(s) => Some((*s).to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        AnyValue::Boolean(b) => Some(b.to_string()),
        AnyValue::Date(days) => date_from_epoch_days(*days).map(|d| d.to_string()),
        AnyValue::Datetime(v, tu, _) => {
            let secs = match tu {
                TimeUnit::Nanoseconds => v / 1_000_000_000,
                TimeUnit::Microseconds => v / 1_000_000,
                TimeUnit::Milliseconds => v / 1_000,
            };
            chrono::DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        other => Some(other.to_string()),
    }
}

/// Convert one cell to JSON for result payloads and prompts.
pub(crate) fn any_value_to_json(av: &AnyValue) -> serde_json::Value {
    match av {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::Value::Bool(*b),
        AnyValue::Int8(v) => serde_json::json!(*v),
        AnyValue::Int16(v) => serde_json::json!(*v),
        AnyValue::Int32(v) => serde_json::json!(*v),
        AnyValue::Int64(v) => serde_json::json!(*v),
        AnyValue::UInt8(v) => serde_json::json!(*v),
        AnyValue::UInt16(v) => serde_json::json!(*v),
        AnyValue::UInt32(v) => serde_json::json!(*v),
        AnyValue::UInt64(v) => serde_json::json!(*v),
        AnyValue::Float32(v) => serde_json::Number::from_f64(*v as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AnyValue::Float64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => any_value_to_text(other)
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_frame_with_format_tag() {
        let df = df! [
            "order_id" => ["o1", "o2"],
            "amount" => [10.0, 20.0]
        ]
        .unwrap();
        let ds = Dataset::from_dataframe(df, SourceFormat::Csv);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.column_count(), 2);
        assert_eq!(ds.source_format(), SourceFormat::Csv);
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = Dataset::from_path("sales.xlsx").unwrap_err();
        assert!(matches!(err, InsightsError::Ingestion(_)));
    }
}
