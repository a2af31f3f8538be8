//! Answer assembly
//!
//! Turns execution results into the caller-facing run report: deterministic
//! base answer, optional narration, intent labelling, insights, follow-up
//! suggestions, and advisory chart widgets. Nothing here is safety-relevant;
//! all scoping decisions happened before execution.

use crate::db::QueryOutput;
use crate::index::RetrievedDocument;
use crate::provider::{ChatMessage, ProviderClient};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Explain-block note attached to every successful report
pub const VALIDATION_NOTES: &str =
    "SQL built with RAG context + LLM, then validated by strict safety rules.";

/// Rows rendered into the table widget
const TABLE_WIDGET_ROWS: usize = 20;

/// Rows scanned for chart pairs
const CHART_PAIR_ROWS: usize = 30;

/// Pairs rendered into a pie chart
const PIE_PAIR_LIMIT: usize = 12;

/// Max widgets per report
const WIDGET_CAP: usize = 4;

/// Question intent, used for UI labelling only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Trend,
    Ranking,
    Distribution,
    Comparison,
    Kpi,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Trend => "trend",
            Intent::Ranking => "ranking",
            Intent::Distribution => "distribution",
            Intent::Comparison => "comparison",
            Intent::Kpi => "kpi",
        }
    }
}

impl Serialize for Intent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Classify the question for labelling. Check order matters: a question
/// mentioning both "trend" and "top" is a trend.
pub fn infer_intent(question: &str) -> Intent {
    let q = question.to_lowercase();
    if q.contains("trend") || q.contains("daily") || q.contains("over time") {
        Intent::Trend
    } else if q.contains("top") || q.contains("rank") {
        Intent::Ranking
    } else if q.contains("share") || q.contains("distribution") {
        Intent::Distribution
    } else if q.contains("compare") || q.contains("vs") {
        Intent::Comparison
    } else {
        Intent::Kpi
    }
}

/// Fixed follow-up suggestions per intent.
pub fn build_followups(intent: Intent) -> Vec<String> {
    let phrases: &[&str] = match intent {
        Intent::Trend => &["Compare last 30 days vs previous 30 days", "Break trend by store"],
        Intent::Ranking => &["Show top 10 only", "Add store-wise ranking"],
        Intent::Distribution => &["Show percentage split", "Filter by store_id"],
        _ => &["Show by category", "Compare store 1 vs store 2"],
    };
    phrases.iter().map(|p| p.to_string()).collect()
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic base answer from the result shape.
pub fn base_answer(output: &QueryOutput) -> String {
    if output.rows.is_empty() {
        return "No rows returned.".to_string();
    }
    if output.rows.len() == 1 && output.rows[0].len() == 1 {
        let label = output.columns.first().map(String::as_str).unwrap_or("value");
        return format!("{}: {}", label, value_to_display(&output.rows[0][0]));
    }
    format!("Returned {} rows.", output.rows.len())
}

/// Optionally rewrite the base answer through the provider.
///
/// Provider failures are absorbed; the deterministic rephrasing is applied
/// only to the generic row-count answer, scalar answers read fine as-is.
pub async fn narrate(
    provider: Option<&dyn ProviderClient>,
    model: &str,
    question: &str,
    draft: &str,
) -> String {
    if let Some(provider) = provider {
        let messages = vec![
            ChatMessage::system("Rewrite analytics answers concisely and clearly in plain text."),
            ChatMessage::user(format!(
                "Question: {question}\nDraft answer: {draft}\nReturn concise plain text only."
            )),
        ];
        match provider.send(&messages, model).await {
            Ok(reply) if !reply.content.trim().is_empty() => {
                return reply.content.trim().to_string();
            }
            Ok(_) => debug!("Narrator returned empty text, keeping draft"),
            Err(e) => debug!("Narrator failed, keeping draft: {}", e),
        }
    }
    if draft.starts_with("Returned") {
        format!("For '{}', {}.", question, draft.to_lowercase().trim_end_matches('.'))
    } else {
        draft.to_string()
    }
}

/// Insight lines: the scalar restated for 1x1 results, a shape summary
/// otherwise.
pub fn build_insights(output: &QueryOutput) -> Vec<String> {
    if output.rows.is_empty() {
        return vec!["No data matched the current scope.".to_string()];
    }
    if output.rows.len() == 1 && output.rows[0].len() == 1 {
        let label = output.columns.first().map(String::as_str).unwrap_or("value");
        return vec![
            format!("Primary metric `{}` is {}.", label, value_to_display(&output.rows[0][0])),
            "Result is role-scoped and RLS-safe.".to_string(),
        ];
    }
    vec![
        format!("Returned {} rows.", output.rows.len()),
        format!("Columns used: {}", output.columns.join(", ")),
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WidgetConfig {
    pub x: String,
    pub y: Vec<String>,
    pub series: Vec<String>,
    pub stack: bool,
    pub unit: String,
}

impl WidgetConfig {
    fn xy(x: &str, y: &str) -> Self {
        Self {
            x: x.to_string(),
            y: vec![y.to_string()],
            series: Vec::new(),
            stack: false,
            unit: String::new(),
        }
    }
}

/// Advisory chart payload
#[derive(Debug, Clone, Serialize)]
pub struct Widget {
    #[serde(rename = "type")]
    pub widget_type: String,
    pub title: String,
    pub description: String,
    pub dataset: Dataset,
    pub config: WidgetConfig,
}

fn looks_like_date_column(column_name: &str) -> bool {
    let lowered = column_name.to_lowercase();
    lowered.contains("date") || matches!(lowered.as_str(), "day" | "month" | "year")
}

fn question_wants(question: &str, widget_type: &str) -> bool {
    let q = question.to_lowercase();
    match widget_type {
        "pie" => {
            q.contains("pie chart")
                || q.contains("pie")
                || q.contains("share")
                || q.contains("distribution")
        }
        "bar" => q.contains("bar chart") || q.contains("bar"),
        "line" => q.contains("line chart") || q.contains("line") || q.contains("trend"),
        _ => false,
    }
}

fn chart_widget(
    widget_type: &str,
    title: String,
    description: &str,
    x_col: &str,
    y_col: &str,
    pairs: &[(String, Value)],
) -> Widget {
    Widget {
        widget_type: widget_type.to_string(),
        title,
        description: description.to_string(),
        dataset: Dataset {
            columns: vec![x_col.to_string(), y_col.to_string()],
            rows: pairs
                .iter()
                .map(|(x, y)| vec![Value::String(x.clone()), y.clone()])
                .collect(),
        },
        config: WidgetConfig::xy(x_col, y_col),
    }
}

/// Build chart widgets from the result set.
///
/// Single-scalar results get a metric card plus single-value chart
/// fallbacks; two-plus-column results get a primary chart typed by policy
/// preference, question wording, or the first column's name, plus a
/// supplementary pie share and any explicitly requested variants. A table
/// widget always closes the list.
pub fn build_widgets(
    output: &QueryOutput,
    question: &str,
    docs: &[RetrievedDocument],
) -> Vec<Widget> {
    let mut widgets = Vec::new();
    if output.rows.is_empty() || output.columns.is_empty() {
        return widgets;
    }

    let preferred = crate::context::widget_preference(question, docs);
    let wants_pie = question_wants(question, "pie");
    let wants_bar = question_wants(question, "bar");

    if output.columns.len() == 1 && output.rows[0].len() == 1 {
        let metric_name = output.columns[0].clone();
        let metric_value = output.rows[0][0].clone();
        widgets.push(Widget {
            widget_type: "metric_card".to_string(),
            title: metric_name.clone(),
            description: "Primary KPI".to_string(),
            dataset: Dataset {
                columns: output.columns.clone(),
                rows: vec![vec![metric_value.clone()]],
            },
            config: WidgetConfig::xy(&metric_name, &metric_name),
        });
        for (kind, desc) in [("bar", "Single-value bar chart"), ("pie", "Single-value pie chart")]
        {
            widgets.push(Widget {
                widget_type: kind.to_string(),
                title: format!("{metric_name} ({kind})"),
                description: desc.to_string(),
                dataset: Dataset {
                    columns: vec!["label".to_string(), metric_name.clone()],
                    rows: vec![vec![
                        Value::String("value".to_string()),
                        metric_value.clone(),
                    ]],
                },
                config: WidgetConfig::xy("label", &metric_name),
            });
        }
    }

    if output.columns.len() >= 2 {
        let col0 = &output.columns[0];
        let col1 = &output.columns[1];
        let pairs: Vec<(String, Value)> = output
            .rows
            .iter()
            .take(CHART_PAIR_ROWS)
            .filter(|row| row.len() >= 2 && row[1].is_number())
            .map(|row| (value_to_display(&row[0]), row[1].clone()))
            .collect();

        if !pairs.is_empty() {
            let mut widget_type = preferred
                .unwrap_or(if looks_like_date_column(col0) { "line" } else { "bar" });
            if wants_pie {
                widget_type = "pie";
            } else if wants_bar {
                widget_type = "bar";
            }

            widgets.push(chart_widget(
                widget_type,
                format!("{col1} by {col0}"),
                "Auto-generated chart",
                col0,
                col1,
                &pairs,
            ));
            if widget_type != "pie" {
                let head = &pairs[..pairs.len().min(PIE_PAIR_LIMIT)];
                widgets.push(chart_widget(
                    "pie",
                    format!("{col1} share by {col0}"),
                    "Distribution view",
                    col0,
                    col1,
                    head,
                ));
            }
            if wants_bar && widget_type != "bar" {
                widgets.push(chart_widget(
                    "bar",
                    format!("{col1} by {col0}"),
                    "Requested bar chart",
                    col0,
                    col1,
                    &pairs,
                ));
            }
            if wants_pie && widget_type != "pie" {
                let head = &pairs[..pairs.len().min(PIE_PAIR_LIMIT)];
                widgets.push(chart_widget(
                    "pie",
                    format!("{col1} share by {col0}"),
                    "Requested pie chart",
                    col0,
                    col1,
                    head,
                ));
            }
        }
    }

    widgets.push(Widget {
        widget_type: "table".to_string(),
        title: "Query Results".to_string(),
        description: "Tabular output".to_string(),
        dataset: Dataset {
            columns: output.columns.clone(),
            rows: output.rows.iter().take(TABLE_WIDGET_ROWS).cloned().collect(),
        },
        config: WidgetConfig {
            x: output.columns.first().cloned().unwrap_or_default(),
            y: output.columns.get(1).cloned().into_iter().collect(),
            series: Vec::new(),
            stack: false,
            unit: String::new(),
        },
    });

    widgets.truncate(WIDGET_CAP);
    widgets
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlBlock {
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainBlock {
    pub views_used: Vec<String>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityBlock {
    pub role: String,
    pub store_id: i64,
    pub rls: bool,
    pub allowed_views: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageBlock {
    pub views: Vec<String>,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaBlock {
    pub rows: usize,
    pub exec_ms: u64,
    pub model: String,
    pub confidence: String,
}

/// Success artifact of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub conversation_id: String,
    pub answer: String,
    pub insights: Vec<String>,
    pub followups: Vec<String>,
    pub intent: Intent,
    pub sql: SqlBlock,
    pub widgets: Vec<Widget>,
    pub explain: ExplainBlock,
    pub security: SecurityBlock,
    pub lineage: LineageBlock,
    pub meta: MetaBlock,
}

/// Failure artifact: `{error: {code, message, stage}}`.
pub fn failure_report(code: &str, message: &str, stage: &str) -> Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message,
            "stage": stage,
        }
    })
}
