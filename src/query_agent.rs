//! Language-to-Query Agent
//!
//! Translates a natural-language question plus schema description into a
//! single read-only SQL query over the logical `sales` table. The model must
//! answer in strict JSON; the SQL is then parsed with sqlparser and rejected
//! unless it is exactly one SELECT statement over the logical table. This is
//! a security boundary: mutation/DDL never reaches the executor, whatever
//! the model emits.

use crate::dataset::LOGICAL_TABLE;
use crate::error::{InsightsError, Result};
use crate::llm::{strip_code_fences, ChatModel};
use crate::schema_profiler::SchemaDescriptor;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, GroupByExpr, JoinConstraint, JoinOperator, Query,
    SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = r#"You are a senior analytics engineer. Given a business question and a table schema, write a single SQL query against the table named `sales` that best answers the question.

RULES:
- Use the column names EXACTLY as they appear in the schema list.
- If a column name contains spaces or special characters, wrap it in double quotes.
- Do NOT invent column names that are not in the schema.
- Write exactly ONE read-only SELECT statement. No INSERT/UPDATE/DELETE/DDL, no multiple statements.
- Only query the `sales` table.

Respond in strict JSON with keys: sql, reasoning, confidence (0-1). No markdown, no other text."#;

/// Error context carried into the single permitted regeneration attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub prior_sql: String,
    pub error: String,
}

/// A validated, structured query ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub sql: String,
    /// Schema columns the query references (aliases it defines excluded).
    pub referenced_columns: Vec<String>,
    pub reasoning: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AgentReply {
    sql: String,
    reasoning: Option<String>,
    confidence: Option<f64>,
}

pub struct LanguageToQueryAgent {
    llm: Arc<dyn ChatModel>,
}

impl LanguageToQueryAgent {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    /// One generation attempt. The orchestrator owns the retry edge and calls
    /// this a second time with `RetryContext` attached when needed.
    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaDescriptor,
        retry: Option<&RetryContext>,
    ) -> Result<QueryPlan> {
        let user_prompt = build_user_prompt(question, schema, retry);
        let raw = self.llm.chat(SYSTEM_PROMPT, &user_prompt).await?;
        debug!("Query agent raw reply: {}", raw);
        parse_reply(&raw)
    }
}

fn build_user_prompt(
    question: &str,
    schema: &SchemaDescriptor,
    retry: Option<&RetryContext>,
) -> String {
    let mut prompt = format!(
        "Table schema for `{}` ({} rows):\n{}\n\nBusiness question: {}",
        LOGICAL_TABLE,
        schema.row_count,
        schema.describe_for_prompt(),
        question
    );

    if let Some(ctx) = retry {
        prompt.push_str(&format!(
            "\n\nYour previous query failed and must be corrected.\nPrevious SQL:\n{}\nError:\n{}\n\nGenerate a corrected query that avoids this error. Same JSON format.",
            ctx.prior_sql, ctx.error
        ));
    }

    prompt
}

/// Parse a raw model reply into a validated `QueryPlan`.
pub fn parse_reply(raw: &str) -> Result<QueryPlan> {
    let cleaned = strip_code_fences(raw);
    let reply: AgentReply = serde_json::from_str(cleaned).map_err(|e| {
        InsightsError::Generation(format!("reply is not valid JSON: {}. Reply was: {}", e, cleaned))
    })?;

    if reply.sql.trim().is_empty() {
        return Err(InsightsError::Generation("reply contains empty SQL".to_string()));
    }

    let referenced_columns = analyze_sql(&reply.sql)?;
    Ok(QueryPlan {
        sql: reply.sql.trim().to_string(),
        referenced_columns,
        reasoning: reply.reasoning,
        confidence: reply.confidence,
    })
}

/// Validate the SQL shape and collect the columns it references.
///
/// Rejects anything that is not exactly one SELECT over the logical table.
/// Column collection walks the AST; identifiers introduced by the query
/// itself (SELECT aliases) are excluded from the result.
pub fn analyze_sql(sql: &str) -> Result<Vec<String>> {
    let cleaned = sql.trim().trim_end_matches(';').trim();
    if cleaned.contains(';') {
        return Err(InsightsError::Generation(
            "multiple SQL statements are not allowed".to_string(),
        ));
    }

    let statements = match Parser::parse_sql(&GenericDialect {}, cleaned) {
        Ok(statements) => statements,
        Err(e) => {
            // Unparseable text gets the keyword screen for a clearer
            // rejection; parseable queries are judged on the AST alone, so a
            // literal 'drop' or a REPLACE() call is not refused.
            screen_forbidden_keywords(cleaned)?;
            return Err(InsightsError::Generation(format!("SQL does not parse: {}", e)));
        }
    };

    if statements.len() != 1 {
        return Err(InsightsError::Generation(
            "expected exactly one SQL statement".to_string(),
        ));
    }

    let Statement::Query(query) = &statements[0] else {
        return Err(InsightsError::Generation(
            "only read-only SELECT queries are allowed".to_string(),
        ));
    };

    let mut collector = ColumnCollector::default();
    collector.collect_query(query)?;
    Ok(collector.into_columns())
}

/// Mutation/DDL keywords in text the parser could not read are refused with
/// an explicit message instead of a bare syntax error.
fn screen_forbidden_keywords(sql: &str) -> Result<()> {
    static FORBIDDEN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let forbidden = FORBIDDEN.get_or_init(|| {
        Regex::new(r"(?i)\b(insert|update|delete|drop|alter|create|truncate|attach|grant|merge|replace|vacuum|copy)\b")
            .expect("static regex")
    });
    if let Some(m) = forbidden.find(sql) {
        warn!("Rejected query containing forbidden keyword: {}", m.as_str());
        return Err(InsightsError::Generation(format!(
            "query contains forbidden keyword '{}'; only read-only SELECT is permitted",
            m.as_str()
        )));
    }
    Ok(())
}

#[derive(Default)]
struct ColumnCollector {
    columns: BTreeSet<String>,
    aliases: BTreeSet<String>,
}

impl ColumnCollector {
    fn into_columns(self) -> Vec<String> {
        self.columns
            .into_iter()
            .filter(|c| !self.aliases.contains(c))
            .collect()
    }

    fn collect_query(&mut self, query: &Query) -> Result<()> {
        self.collect_set_expr(&query.body)?;
        for order in &query.order_by {
            self.collect_expr(&order.expr)?;
        }
        if let Some(limit) = &query.limit {
            self.collect_expr(limit)?;
        }
        Ok(())
    }

    fn collect_set_expr(&mut self, body: &SetExpr) -> Result<()> {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    match item {
                        SelectItem::UnnamedExpr(expr) => self.collect_expr(expr)?,
                        SelectItem::ExprWithAlias { expr, alias } => {
                            self.collect_expr(expr)?;
                            self.aliases.insert(alias.value.clone());
                        }
                        SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {}
                    }
                }
                for table in &select.from {
                    self.check_table(table)?;
                }
                if let Some(selection) = &select.selection {
                    self.collect_expr(selection)?;
                }
                if let GroupByExpr::Expressions(exprs) = &select.group_by {
                    for expr in exprs {
                        self.collect_expr(expr)?;
                    }
                }
                if let Some(having) = &select.having {
                    self.collect_expr(having)?;
                }
                Ok(())
            }
            SetExpr::Query(query) => self.collect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left)?;
                self.collect_set_expr(right)
            }
            _ => Err(InsightsError::Generation(
                "unsupported query form; use a plain SELECT".to_string(),
            )),
        }
    }

    fn check_table(&mut self, table: &TableWithJoins) -> Result<()> {
        self.check_table_factor(&table.relation)?;
        for join in &table.joins {
            self.check_table_factor(&join.relation)?;
            match &join.join_operator {
                JoinOperator::Inner(constraint)
                | JoinOperator::LeftOuter(constraint)
                | JoinOperator::RightOuter(constraint)
                | JoinOperator::FullOuter(constraint) => {
                    if let JoinConstraint::On(expr) = constraint {
                        self.collect_expr(expr)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_table_factor(&mut self, factor: &TableFactor) -> Result<()> {
        match factor {
            TableFactor::Table { name, .. } => {
                let table_name = name
                    .0
                    .last()
                    .map(|ident| ident.value.to_lowercase())
                    .unwrap_or_default();
                if table_name != LOGICAL_TABLE {
                    return Err(InsightsError::Generation(format!(
                        "query must target the `{}` table, found `{}`",
                        LOGICAL_TABLE, table_name
                    )));
                }
                Ok(())
            }
            TableFactor::Derived { subquery, .. } => self.collect_query(subquery),
            _ => Err(InsightsError::Generation(
                "unsupported table expression".to_string(),
            )),
        }
    }

    fn collect_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Identifier(ident) => {
                self.columns.insert(ident.value.clone());
            }
            Expr::CompoundIdentifier(idents) => {
                if let Some(last) = idents.last() {
                    self.columns.insert(last.value.clone());
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                self.collect_expr(left)?;
                self.collect_expr(right)?;
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => self.collect_expr(expr)?,
            Expr::IsNull(expr) | Expr::IsNotNull(expr) => self.collect_expr(expr)?,
            Expr::Between {
                expr, low, high, ..
            } => {
                self.collect_expr(expr)?;
                self.collect_expr(low)?;
                self.collect_expr(high)?;
            }
            Expr::InList { expr, list, .. } => {
                self.collect_expr(expr)?;
                for item in list {
                    self.collect_expr(item)?;
                }
            }
            // Subqueries go through the same table gate as the outer query.
            Expr::InSubquery { expr, subquery, .. } => {
                self.collect_expr(expr)?;
                self.collect_query(subquery)?;
            }
            Expr::Function(func) => {
                for arg in &func.args {
                    let inner = match arg {
                        FunctionArg::Unnamed(inner) => inner,
                        FunctionArg::Named { arg, .. } => arg,
                    };
                    if let FunctionArgExpr::Expr(expr) = inner {
                        self.collect_expr(expr)?;
                    }
                }
            }
            Expr::Cast { expr, .. } | Expr::TryCast { expr, .. } => self.collect_expr(expr)?,
            Expr::Extract { expr, .. } => self.collect_expr(expr)?,
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(operand) = operand {
                    self.collect_expr(operand)?;
                }
                for expr in conditions.iter().chain(results.iter()) {
                    self.collect_expr(expr)?;
                }
                if let Some(else_result) = else_result {
                    self.collect_expr(else_result)?;
                }
            }
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                self.collect_expr(expr)?;
                self.collect_expr(pattern)?;
            }
            Expr::Subquery(query) => self.collect_query(query)?,
            // Literals and anything exotic carry no column references we
            // need; the engine re-validates at execution time.
            _ => {}
        }
        Ok(())
    }
}
