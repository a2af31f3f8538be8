//! Run pipeline
//!
//! The staged state machine behind `ask`: auth, retrieval, generation,
//! validation, execution, answer assembly. Stages run strictly in order and
//! the first failure is terminal; every stage transition is recorded through
//! the audit sink, which never influences control flow.

use crate::answer::{
    self, ExplainBlock, LineageBlock, MetaBlock, RunReport, SecurityBlock, SqlBlock,
    VALIDATION_NOTES,
};
use crate::audit::{AuditSink, RunOpen, RunSuccess, StageTimings};
use crate::context;
use crate::db::QueryExecutor;
use crate::error::Error;
use crate::generate::Orchestrator;
use crate::index::RetrievalClient;
use crate::memory::{ConversationMemory, SessionNotes};
use crate::provider::ProviderClient;
use crate::validate::{apply_known_view_fixes, validate_sql};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Auth,
    RagRetrieval,
    LlmGeneration,
    Validation,
    DbExecution,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Auth => "auth",
            Stage::RagRetrieval => "rag_retrieval",
            Stage::LlmGeneration => "llm_generation",
            Stage::Validation => "validation",
            Stage::DbExecution => "db_execution",
            Stage::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_org_id() -> String {
    "default-org".to_string()
}

fn default_user_id() -> String {
    "default-user".to_string()
}

/// Caller-supplied access scoping, consumed opaquely by the validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub role: String,
    pub store_id: i64,
    pub allowed_views: Vec<String>,
}

/// One pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub conversation_id: String,
    pub question: String,
    #[serde(default = "default_org_id")]
    pub org_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub user_context: UserContext,
}

impl RunRequest {
    pub fn new(conversation_id: &str, question: &str, user_context: UserContext) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            question: question.to_string(),
            org_id: default_org_id(),
            user_id: default_user_id(),
            user_context,
        }
    }
}

/// Terminal failure: the stage that failed plus its error.
#[derive(Debug)]
pub struct RunFailure {
    pub stage: Stage,
    pub error: Error,
}

impl RunFailure {
    /// Caller-facing failure artifact.
    pub fn to_report(&self) -> Value {
        answer::failure_report(
            self.error.error_code(),
            &self.error.public_message(),
            self.stage.as_str(),
        )
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// Successful run artifact plus per-stage timings.
#[derive(Debug)]
pub struct RunOutcome {
    pub request_id: String,
    pub report: RunReport,
    pub timings: StageTimings,
}

pub struct Pipeline {
    retrieval: RetrievalClient,
    orchestrator: Orchestrator,
    executor: Arc<dyn QueryExecutor>,
    audit: Arc<dyn AuditSink>,
    memory: ConversationMemory,
    notes: SessionNotes,
    narrator: Option<Arc<dyn ProviderClient>>,
    internal_token: String,
    primary_model: String,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retrieval: RetrievalClient,
        orchestrator: Orchestrator,
        executor: Arc<dyn QueryExecutor>,
        audit: Arc<dyn AuditSink>,
        memory: ConversationMemory,
        notes: SessionNotes,
        narrator: Option<Arc<dyn ProviderClient>>,
        internal_token: String,
        primary_model: String,
    ) -> Self {
        Self {
            retrieval,
            orchestrator,
            executor,
            audit,
            memory,
            notes,
            narrator,
            internal_token,
            primary_model,
        }
    }

    /// Run one request end to end.
    pub async fn run(
        &self,
        request: &RunRequest,
        caller_token: &str,
    ) -> std::result::Result<RunOutcome, RunFailure> {
        let request_id = Uuid::new_v4().to_string();
        let total_start = Instant::now();
        let mut timings = StageTimings::default();

        self.audit
            .open_run(&RunOpen {
                request_id: request_id.clone(),
                conversation_id: request.conversation_id.clone(),
                org_id: request.org_id.clone(),
                user_id: request.user_id.clone(),
                question: request.question.clone(),
                role: request.user_context.role.clone(),
                store_id: request.user_context.store_id,
                allowed_views: request.user_context.allowed_views.clone(),
            })
            .await;

        // auth
        if self.internal_token.is_empty() {
            let err = Error::Auth("INTERNAL_TOKEN is not configured.".to_string());
            return Err(self.fail(&request_id, Stage::Auth, err, total_start).await);
        }
        if caller_token != self.internal_token {
            let err = Error::Auth("Invalid internal token.".to_string());
            return Err(self.fail(&request_id, Stage::Auth, err, total_start).await);
        }
        self.audit
            .record_stage(
                &request_id,
                Stage::Auth.as_str(),
                "ok",
                "Token validated",
                None,
                Value::Object(Default::default()),
            )
            .await;

        // rag_retrieval never fails, it degrades to an empty context
        let rag_start = Instant::now();
        let docs = self.retrieval.retrieve(&request.question).await;
        timings.rag_ms = elapsed_ms(rag_start);
        self.audit
            .record_stage(
                &request_id,
                Stage::RagRetrieval.as_str(),
                "ok",
                &format!("Retrieved {} docs", docs.len()),
                Some(timings.rag_ms),
                Value::Object(Default::default()),
            )
            .await;

        let notes_text = self.notes.recent_notes().await;
        let full_context = context::assemble(&docs, &notes_text);
        let hints = context::canonical_hints(&request.question, &request.user_context.allowed_views);
        let intent = answer::infer_intent(&request.question);

        // llm_generation
        let history = self.memory.get(&request.conversation_id).await;
        let llm_start = Instant::now();
        let generated = self
            .orchestrator
            .generate(
                &request.question,
                &request.user_context.allowed_views,
                &full_context,
                &hints,
                &self.primary_model,
                &history,
                &notes_text,
            )
            .await;
        timings.llm_ms = elapsed_ms(llm_start);

        let (candidate, provenance) = match generated {
            Ok(result) => result,
            Err(err) => {
                return Err(self
                    .fail(&request_id, Stage::LlmGeneration, err, total_start)
                    .await)
            }
        };
        self.audit
            .record_stage(
                &request_id,
                Stage::LlmGeneration.as_str(),
                "ok",
                &format!("Generated SQL candidate with model {}", provenance.model),
                Some(timings.llm_ms),
                Value::Object(Default::default()),
            )
            .await;

        // Record the exchange regardless of what validation decides next, so
        // the model sees its own prior attempt on the follow-up turn.
        self.memory
            .append_exchange(
                &request.conversation_id,
                &provenance.prompt,
                &provenance.content,
                provenance.reasoning_details.clone(),
            )
            .await;

        // validation
        let validation_start = Instant::now();
        let validated = match validate_sql(&candidate.query, &request.user_context.allowed_views) {
            Ok(validated) => validated,
            Err(err) => {
                timings.validation_ms = elapsed_ms(validation_start);
                return Err(self
                    .fail(&request_id, Stage::Validation, err, total_start)
                    .await);
            }
        };
        let executable_sql = apply_known_view_fixes(&validated.sql);
        timings.validation_ms = elapsed_ms(validation_start);
        self.notes
            .remember_sql(&request.question, &executable_sql)
            .await;
        self.audit
            .record_stage(
                &request_id,
                Stage::Validation.as_str(),
                "ok",
                "SQL validated",
                Some(timings.validation_ms),
                Value::Object(Default::default()),
            )
            .await;

        // db_execution
        let db_start = Instant::now();
        let output = match self.executor.execute(&executable_sql).await {
            Ok(output) => output,
            Err(err) => {
                error!(
                    "Query execution failed conversation={} sql={}: {}",
                    request.conversation_id, executable_sql, err
                );
                return Err(self
                    .fail(&request_id, Stage::DbExecution, err, total_start)
                    .await);
            }
        };
        timings.exec_ms = elapsed_ms(db_start);
        self.audit
            .record_stage(
                &request_id,
                Stage::DbExecution.as_str(),
                "ok",
                "SQL executed",
                Some(timings.exec_ms),
                serde_json::json!({"rows": output.row_count()}),
            )
            .await;

        // answer assembly
        let model_used = self
            .orchestrator
            .last_model_used()
            .unwrap_or_else(|| self.primary_model.clone());
        let draft = answer::base_answer(&output);
        let final_answer = answer::narrate(
            self.narrator.as_deref(),
            &model_used,
            &request.question,
            &draft,
        )
        .await;
        self.notes
            .remember_answer(&request.question, &final_answer)
            .await;

        let widgets = answer::build_widgets(&output, &request.question, &docs);
        let report = RunReport {
            conversation_id: request.conversation_id.clone(),
            answer: final_answer.clone(),
            insights: answer::build_insights(&output),
            followups: answer::build_followups(intent),
            intent,
            sql: SqlBlock {
                query: executable_sql.clone(),
            },
            widgets,
            explain: ExplainBlock {
                views_used: validated.views_used.clone(),
                notes: VALIDATION_NOTES.to_string(),
            },
            security: SecurityBlock {
                role: request.user_context.role.clone(),
                store_id: request.user_context.store_id,
                rls: true,
                allowed_views: request.user_context.allowed_views.clone(),
            },
            lineage: LineageBlock {
                views: validated.views_used,
                filters: vec!["role_scope".to_string(), "store_scope".to_string()],
            },
            meta: MetaBlock {
                rows: output.row_count(),
                exec_ms: timings.exec_ms,
                model: model_used.clone(),
                confidence: "medium".to_string(),
            },
        };

        timings.total_ms = elapsed_ms(total_start);
        self.audit
            .record_success(
                &request_id,
                &RunSuccess {
                    generated_sql: candidate.query,
                    validated_sql: executable_sql.clone(),
                    final_answer,
                    rows_count: output.row_count() as i64,
                    llm_model: model_used,
                    llm_usage: provenance.usage.clone(),
                    provider_response_id: provenance.response_id.clone(),
                    rag_sources: docs.iter().map(|d| d.source.clone()).collect(),
                    rag_doc_ids: docs.iter().map(|d| d.id.clone()).collect(),
                    model_attempts: serde_json::to_value(&provenance.attempts)
                        .unwrap_or(Value::Null),
                    timings,
                },
            )
            .await;
        self.audit
            .record_stage(
                &request_id,
                Stage::Completed.as_str(),
                "ok",
                "Request completed successfully",
                None,
                Value::Object(Default::default()),
            )
            .await;

        info!(
            "run ok conversation={} role={} store={} rows={} exec_ms={} sql={}",
            request.conversation_id,
            request.user_context.role,
            request.user_context.store_id,
            report.meta.rows,
            timings.exec_ms,
            executable_sql
        );

        Ok(RunOutcome {
            request_id,
            report,
            timings,
        })
    }

    async fn fail(
        &self,
        request_id: &str,
        stage: Stage,
        error: Error,
        total_start: Instant,
    ) -> RunFailure {
        let total_ms = elapsed_ms(total_start);
        let message = error.to_string();
        error!("Pipeline failed at {}: {}", stage, message);
        self.audit
            .record_stage(
                request_id,
                stage.as_str(),
                "failed",
                &message,
                None,
                Value::Object(Default::default()),
            )
            .await;
        self.audit
            .record_terminal(request_id, stage.as_str(), error.error_code(), &message, total_ms)
            .await;
        RunFailure { stage, error }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogAuditSink;
    use crate::db::QueryOutput;
    use crate::index::{RetrievedDocument, VectorSearch};
    use crate::provider::{ChatMessage, ProviderFailure, ProviderReply, TokenUsage};
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticSearch;

    #[async_trait]
    impl VectorSearch for StaticSearch {
        async fn search(
            &self,
            _vector: Vec<f32>,
            _k: usize,
        ) -> crate::Result<Vec<RetrievedDocument>> {
            Ok(vec![RetrievedDocument {
                id: "1".to_string(),
                doc_type: "schema".to_string(),
                source: "v_payment_scoped.md".to_string(),
                content: "payments per customer".to_string(),
            }])
        }
    }

    struct FixedProvider {
        content: String,
    }

    #[async_trait]
    impl ProviderClient for FixedProvider {
        async fn send(
            &self,
            _messages: &[ChatMessage],
            model: &str,
        ) -> std::result::Result<ProviderReply, ProviderFailure> {
            Ok(ProviderReply {
                content: self.content.clone(),
                usage: TokenUsage::default(),
                reasoning_details: None,
                model: model.to_string(),
                response_id: "resp-1".to_string(),
            })
        }
    }

    struct FixedExecutor {
        output: QueryOutput,
        fail: bool,
    }

    #[async_trait]
    impl QueryExecutor for FixedExecutor {
        async fn execute(&self, _sql: &str) -> crate::Result<QueryOutput> {
            if self.fail {
                Err(Error::Database(sqlx::Error::PoolClosed))
            } else {
                Ok(self.output.clone())
            }
        }
    }

    fn pipeline(provider_content: &str, executor_fails: bool) -> Pipeline {
        let retrieval = RetrievalClient::new(Arc::new(StaticSearch), 64, 5);
        let provider = Arc::new(FixedProvider {
            content: provider_content.to_string(),
        });
        let orchestrator = Orchestrator::new(provider, vec![]);
        let executor = Arc::new(FixedExecutor {
            output: QueryOutput {
                columns: vec!["name".to_string(), "total".to_string()],
                rows: vec![
                    vec![json!("a"), json!(10)],
                    vec![json!("b"), json!(7)],
                ],
            },
            fail: executor_fails,
        });
        Pipeline::new(
            retrieval,
            orchestrator,
            executor,
            Arc::new(LogAuditSink),
            ConversationMemory::new(8),
            SessionNotes::new(20),
            None,
            "secret".to_string(),
            "test-model".to_string(),
        )
    }

    fn request() -> RunRequest {
        RunRequest::new(
            "conv-1",
            "top customers",
            UserContext {
                role: "analyst".to_string(),
                store_id: 1,
                allowed_views: vec!["v_payment_scoped".to_string()],
            },
        )
    }

    fn good_content() -> String {
        r#"{"query":"SELECT name, total FROM v_payment_scoped","explain":"","risk":"low"}"#
            .to_string()
    }

    #[tokio::test]
    async fn test_unconfigured_token_fails_at_auth() {
        let mut pipeline = pipeline(&good_content(), false);
        pipeline.internal_token = String::new();
        let failure = pipeline.run(&request(), "anything").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Auth);
        assert_eq!(failure.error.to_string(), "INTERNAL_TOKEN is not configured.");
        assert_eq!(failure.error.status_hint(), 500);
    }

    #[tokio::test]
    async fn test_wrong_token_fails_at_auth() {
        let pipeline = pipeline(&good_content(), false);
        let failure = pipeline.run(&request(), "wrong").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Auth);
        assert_eq!(failure.error.to_string(), "Invalid internal token.");
        assert_eq!(failure.error.status_hint(), 401);
    }

    #[tokio::test]
    async fn test_happy_path_report() {
        let pipeline = pipeline(&good_content(), false);
        let outcome = pipeline.run(&request(), "secret").await.unwrap();
        let report = outcome.report;

        // The validator appended the limit the model omitted.
        assert!(report.sql.query.ends_with("LIMIT 200"));
        assert_eq!(report.meta.rows, 2);
        assert_eq!(report.meta.model, "test-model");
        assert_eq!(report.intent.as_str(), "ranking");
        assert_eq!(report.explain.views_used, vec!["v_payment_scoped"]);
        // No narrator configured, so the deterministic rephrasing applies.
        assert_eq!(report.answer, "For 'top customers', returned 2 rows.");
        assert!(report.widgets.iter().any(|w| w.widget_type == "table"));
        assert_eq!(report.lineage.filters, vec!["role_scope", "store_scope"]);
        assert!(outcome.timings.total_ms >= outcome.timings.exec_ms);
    }

    #[tokio::test]
    async fn test_disallowed_view_fails_at_validation() {
        let content =
            r#"{"query":"SELECT * FROM staff_private","explain":"","risk":"low"}"#;
        let pipeline = pipeline(content, false);
        let failure = pipeline.run(&request(), "secret").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Validation);
        assert_eq!(failure.error.error_code(), "out_of_scope");

        let report = failure.to_report();
        assert_eq!(report["error"]["stage"], "validation");
        assert_eq!(report["error"]["code"], "out_of_scope");
    }

    #[tokio::test]
    async fn test_memory_keeps_exchange_even_when_validation_fails() {
        let content = r#"{"query":"DELETE FROM v_payment_scoped","explain":"","risk":"low"}"#;
        let pipeline = pipeline(content, false);
        let failure = pipeline.run(&request(), "secret").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Validation);

        let history = pipeline.memory.get("conv-1").await;
        assert_eq!(history.len(), 2);
        assert!(history[1].content.contains("DELETE"));
    }

    #[tokio::test]
    async fn test_db_failure_maps_to_db_execution_stage() {
        let pipeline = pipeline(&good_content(), true);
        let failure = pipeline.run(&request(), "secret").await.unwrap_err();
        assert_eq!(failure.stage, Stage::DbExecution);
        assert_eq!(failure.error.error_code(), "db_error");
        assert_eq!(
            failure.to_report()["error"]["message"],
            "Database execution failed."
        );
    }

    #[tokio::test]
    async fn test_generation_exhaustion_maps_to_llm_stage() {
        let pipeline = pipeline("not json", false);
        let failure = pipeline.run(&request(), "secret").await.unwrap_err();
        assert_eq!(failure.stage, Stage::LlmGeneration);
        assert!(failure
            .error
            .to_string()
            .starts_with("all_models_failed: test-model: provider_error_invalid_payload"));
    }

    #[tokio::test]
    async fn test_session_notes_feed_next_run() {
        let pipeline = pipeline(&good_content(), false);
        pipeline.run(&request(), "secret").await.unwrap();
        let notes = pipeline.notes.recent_notes().await;
        assert!(notes.contains("Previous SQL for similar question:"));
        assert!(notes.contains("Previous answer style: For 'top customers', returned 2 rows."));
    }
}
