//! Ask command implementation

use crate::audit::{AuditSink, LogAuditSink, PgAuditSink};
use crate::config::Config;
use crate::db::PgExecutor;
use crate::error::Result;
use crate::generate::Orchestrator;
use crate::index::{QdrantIndex, RetrievalClient};
use crate::memory::{ConversationMemory, SessionNotes};
use crate::pipeline::{Pipeline, RunOutcome, RunRequest, UserContext};
use crate::provider::OpenRouterClient;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Default demo scoping used when the caller passes no explicit views.
pub fn demo_user_context() -> UserContext {
    UserContext {
        role: "analyst".to_string(),
        store_id: 1,
        allowed_views: vec![
            "v_payment_scoped".to_string(),
            "v_rental_scoped".to_string(),
            "v_customer_masked".to_string(),
        ],
    }
}

/// Ask options from CLI flags
#[derive(Debug, Clone)]
pub struct AskOptions {
    pub conversation_id: String,
    pub role: Option<String>,
    pub store_id: Option<i64>,
    pub views: Vec<String>,
    pub token: String,
}

/// Result of one ask invocation
#[derive(Debug)]
pub enum AskOutcome {
    Completed(Box<RunOutcome>),
    Failed {
        stage: String,
        status_hint: u16,
        report: Value,
    },
}

/// Wire the full pipeline from config and run one question.
pub async fn cmd_ask(config: &Config, question: &str, options: AskOptions) -> Result<AskOutcome> {
    let index = QdrantIndex::connect(config).await?;
    let retrieval = RetrievalClient::new(
        Arc::new(index),
        config.index.dimension,
        config.index.top_k,
    );

    let provider = Arc::new(OpenRouterClient::from_config(config)?);
    let orchestrator = Orchestrator::new(
        provider.clone(),
        config.provider.fallback_models.clone(),
    );

    let executor = Arc::new(PgExecutor::connect(config).await?);

    // Audit shares the executor's pool; fall back to log-only when the audit
    // schema cannot be prepared.
    let audit: Arc<dyn AuditSink> = {
        let sink = PgAuditSink::new(executor.pool().clone());
        match sink.ensure_schema().await {
            Ok(()) => Arc::new(sink),
            Err(e) => {
                warn!("Audit schema unavailable, logging audit events only: {}", e);
                Arc::new(LogAuditSink)
            }
        }
    };

    let mut user_context = demo_user_context();
    if let Some(role) = options.role {
        user_context.role = role;
    }
    if let Some(store_id) = options.store_id {
        user_context.store_id = store_id;
    }
    if !options.views.is_empty() {
        user_context.allowed_views = options.views;
    }

    let pipeline = Pipeline::new(
        retrieval,
        orchestrator,
        executor,
        audit,
        ConversationMemory::new(config.pipeline.history_limit),
        SessionNotes::new(config.pipeline.note_limit),
        Some(provider),
        config.pipeline.internal_token.clone(),
        config.provider.model.clone(),
    );

    let request = RunRequest::new(&options.conversation_id, question, user_context);
    match pipeline.run(&request, &options.token).await {
        Ok(outcome) => Ok(AskOutcome::Completed(Box::new(outcome))),
        Err(failure) => Ok(AskOutcome::Failed {
            stage: failure.stage.as_str().to_string(),
            status_hint: failure.error.status_hint(),
            report: failure.to_report(),
        }),
    }
}

pub fn print_ask_outcome(outcome: &AskOutcome, json: bool) -> Result<()> {
    match outcome {
        AskOutcome::Completed(run) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&run.report)?);
            } else {
                println!("{}", run.report.answer);
                println!("\nSQL: {}", run.report.sql.query);
                if !run.report.insights.is_empty() {
                    println!("\nInsights:");
                    for insight in &run.report.insights {
                        println!("  - {}", insight);
                    }
                }
                if !run.report.followups.is_empty() {
                    println!("\nFollow-ups:");
                    for followup in &run.report.followups {
                        println!("  - {}", followup);
                    }
                }
                println!(
                    "\n({} rows, {} ms, model {})",
                    run.report.meta.rows, run.report.meta.exec_ms, run.report.meta.model
                );
            }
            Ok(())
        }
        AskOutcome::Failed {
            stage,
            status_hint,
            report,
        } => {
            if json {
                println!("{}", serde_json::to_string_pretty(report)?);
            } else {
                eprintln!(
                    "✗ Request failed at {} ({}): {}",
                    stage,
                    status_hint,
                    report["error"]["message"].as_str().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_context_matches_demo_views() {
        let ctx = demo_user_context();
        assert_eq!(ctx.role, "analyst");
        assert_eq!(
            ctx.allowed_views,
            vec!["v_payment_scoped", "v_rental_scoped", "v_customer_masked"]
        );
    }
}
