//! Precomputed aggregates for summarization mode.
//!
//! The orchestrator computes these directly from the dataset, bypassing the
//! language-to-query agent entirely: row count, date range, top categories,
//! revenue totals and the month-over-month trend. They are the only figures
//! the summary synthesis prompt is allowed to cite.

use crate::dataset::{any_value_to_text, date_from_epoch_days, Dataset};
use crate::error::Result;
use crate::schema_profiler::{parse_date_str, SchemaDescriptor, SemanticType};
use chrono::Datelike;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Column-name hints for the measure column, in preference order.
const AMOUNT_HINTS: [&str; 6] = ["sales", "amount", "revenue", "gmv", "total", "price"];

const TOP_CATEGORY_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyPoint {
    /// Calendar month, "YYYY-MM".
    pub month: String,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryAggregates {
    pub row_count: usize,
    pub column_count: usize,
    pub amount_column: Option<String>,
    pub total_amount: Option<f64>,
    pub average_amount: Option<f64>,
    pub date_column: Option<String>,
    pub earliest_date: Option<String>,
    pub latest_date: Option<String>,
    pub category_column: Option<String>,
    pub top_categories: Vec<CategoryCount>,
    pub monthly_trend: Vec<MonthlyPoint>,
    /// Percent change of the latest month's total vs the month before.
    pub latest_month_delta_pct: Option<f64>,
}

/// Compute the fixed aggregate set for one dataset.
pub fn compute(dataset: &Dataset, schema: &SchemaDescriptor) -> Result<SummaryAggregates> {
    let amount_column = pick_amount_column(schema);
    let date_column = schema
        .columns_of_type(SemanticType::Date)
        .first()
        .map(|c| c.name.clone());
    let category_column = schema
        .columns_of_type(SemanticType::Categorical)
        .first()
        .map(|c| c.name.clone());

    debug!(
        "Summary aggregate columns: amount={:?}, date={:?}, category={:?}",
        amount_column, date_column, category_column
    );

    let mut aggregates = SummaryAggregates {
        row_count: dataset.row_count(),
        column_count: dataset.column_count(),
        amount_column: amount_column.clone(),
        total_amount: None,
        average_amount: None,
        date_column: date_column.clone(),
        earliest_date: None,
        latest_date: None,
        category_column: category_column.clone(),
        top_categories: Vec::new(),
        monthly_trend: Vec::new(),
        latest_month_delta_pct: None,
    };

    let amounts = match &amount_column {
        Some(name) => column_as_f64(dataset.frame().column(name)?)?,
        None => Vec::new(),
    };
    if !amounts.is_empty() {
        let total: f64 = amounts.iter().flatten().sum();
        let n = amounts.iter().flatten().count();
        aggregates.total_amount = Some(total);
        if n > 0 {
            aggregates.average_amount = Some(total / n as f64);
        }
    }

    let dates = match &date_column {
        Some(name) => column_as_dates(dataset.frame().column(name)?)?,
        None => Vec::new(),
    };
    if let (Some(min), Some(max)) = (
        dates.iter().flatten().min(),
        dates.iter().flatten().max(),
    ) {
        aggregates.earliest_date = Some(min.to_string());
        aggregates.latest_date = Some(max.to_string());
    }

    if let Some(name) = &category_column {
        aggregates.top_categories = top_categories(dataset.frame().column(name)?)?;
    }

    if !dates.is_empty() && !amounts.is_empty() {
        aggregates.monthly_trend = monthly_trend(&dates, &amounts);
        aggregates.latest_month_delta_pct = trend_delta(&aggregates.monthly_trend);
    }

    Ok(aggregates)
}

fn pick_amount_column(schema: &SchemaDescriptor) -> Option<String> {
    let numeric = schema.columns_of_type(SemanticType::Numeric);
    for hint in AMOUNT_HINTS {
        if let Some(col) = numeric
            .iter()
            .find(|c| c.name.to_lowercase().contains(hint))
        {
            return Some(col.name.clone());
        }
    }
    numeric.first().map(|c| c.name.clone())
}

fn column_as_f64(series: &Series) -> Result<Vec<Option<f64>>> {
    let mut values = Vec::with_capacity(series.len());
    for idx in 0..series.len() {
        let av = series.get(idx)?;
        let value = av
            .try_extract::<f64>()
            .ok()
            .or_else(|| any_value_to_text(&av).and_then(|t| t.trim().parse::<f64>().ok()));
        values.push(value);
    }
    Ok(values)
}

fn column_as_dates(series: &Series) -> Result<Vec<Option<chrono::NaiveDate>>> {
    let mut values = Vec::with_capacity(series.len());
    for idx in 0..series.len() {
        let av = series.get(idx)?;
        let value = match &av {
            AnyValue::Date(days) => date_from_epoch_days(*days),
            other => any_value_to_text(other).and_then(|t| parse_date_str(&t)),
        };
        values.push(value);
    }
    Ok(values)
}

fn top_categories(series: &Series) -> Result<Vec<CategoryCount>> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for idx in 0..series.len() {
        let av = series.get(idx)?;
        if let Some(text) = any_value_to_text(&av) {
            *counts.entry(text).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(value, count)| CategoryCount { value, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    ranked.truncate(TOP_CATEGORY_LIMIT);
    Ok(ranked)
}

fn monthly_trend(
    dates: &[Option<chrono::NaiveDate>],
    amounts: &[Option<f64>],
) -> Vec<MonthlyPoint> {
    let mut buckets: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for (date, amount) in dates.iter().zip(amounts.iter()) {
        if let (Some(date), Some(amount)) = (date, amount) {
            *buckets.entry((date.year(), date.month())).or_insert(0.0) += amount;
        }
    }
    buckets
        .into_iter()
        .map(|((year, month), total)| MonthlyPoint {
            month: format!("{:04}-{:02}", year, month),
            total,
        })
        .collect()
}

fn trend_delta(trend: &[MonthlyPoint]) -> Option<f64> {
    if trend.len() < 2 {
        return None;
    }
    let latest = &trend[trend.len() - 1];
    let previous = &trend[trend.len() - 2];
    if previous.total == 0.0 {
        return None;
    }
    Some((latest.total - previous.total) / previous.total * 100.0)
}
