//! Audit persistence
//!
//! Every pipeline run opens an audit row, appends per-stage events, and
//! closes with either a success record or a terminal failure record. All
//! writes are fire-and-forget: a broken audit store must never fail a run,
//! so errors are logged at warn and swallowed.

use crate::provider::TokenUsage;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use tracing::{debug, info, warn};

/// Max stored length for a terminal error message
const ERROR_MESSAGE_CHARS: usize = 4000;

/// Max stored length for a per-stage event message
const EVENT_MESSAGE_CHARS: usize = 2000;

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Fields recorded when a run is first seen
#[derive(Debug, Clone)]
pub struct RunOpen {
    pub request_id: String,
    pub conversation_id: String,
    pub org_id: String,
    pub user_id: String,
    pub question: String,
    pub role: String,
    pub store_id: i64,
    pub allowed_views: Vec<String>,
}

/// Per-stage wall-clock timings, milliseconds
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StageTimings {
    pub rag_ms: u64,
    pub llm_ms: u64,
    pub validation_ms: u64,
    pub exec_ms: u64,
    pub total_ms: u64,
}

/// Fields recorded when a run completes successfully
#[derive(Debug, Clone)]
pub struct RunSuccess {
    pub generated_sql: String,
    pub validated_sql: String,
    pub final_answer: String,
    pub rows_count: i64,
    pub llm_model: String,
    pub llm_usage: TokenUsage,
    pub provider_response_id: String,
    pub rag_sources: Vec<String>,
    pub rag_doc_ids: Vec<String>,
    pub model_attempts: Value,
    pub timings: StageTimings,
}

/// Fire-and-forget audit collaborator.
///
/// Implementations must swallow their own storage errors; the pipeline
/// never inspects the result of an audit call.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn open_run(&self, run: &RunOpen);

    async fn record_stage(
        &self,
        request_id: &str,
        stage: &str,
        status: &str,
        message: &str,
        duration_ms: Option<u64>,
        metadata: Value,
    );

    async fn record_success(&self, request_id: &str, success: &RunSuccess);

    async fn record_terminal(
        &self,
        request_id: &str,
        final_status: &str,
        error_code: &str,
        error_message: &str,
        total_ms: u64,
    );
}

/// Postgres-backed sink over `query_audit_logs` and `query_audit_events`.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the audit tables when they do not exist. Runs only when
    /// explicitly invoked, never as a side effect of recording.
    pub async fn ensure_schema(&self) -> crate::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_audit_logs (
                request_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                org_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                question TEXT NOT NULL,
                role TEXT NOT NULL,
                store_id BIGINT NOT NULL,
                allowed_views JSONB NOT NULL DEFAULT '[]'::jsonb,
                status TEXT NOT NULL DEFAULT 'received',
                error_stage TEXT,
                error_code TEXT,
                error_message TEXT,
                generated_sql TEXT,
                validated_sql TEXT,
                final_answer TEXT,
                rows_count BIGINT,
                llm_model TEXT,
                llm_input_tokens BIGINT,
                llm_output_tokens BIGINT,
                llm_total_tokens BIGINT,
                provider_response_id TEXT,
                rag_sources JSONB,
                rag_doc_ids JSONB,
                model_attempts JSONB,
                rag_ms BIGINT,
                llm_ms BIGINT,
                validation_ms BIGINT,
                exec_ms BIGINT,
                total_ms BIGINT,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                completed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_audit_events (
                id BIGSERIAL PRIMARY KEY,
                request_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                duration_ms BIGINT,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_open_run(&self, run: &RunOpen) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_audit_logs
                (request_id, conversation_id, org_id, user_id, question, role, store_id, allowed_views, status, error_stage)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'received', 'init')
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(&run.request_id)
        .bind(&run.conversation_id)
        .bind(&run.org_id)
        .bind(&run.user_id)
        .bind(&run.question)
        .bind(&run.role)
        .bind(run.store_id)
        .bind(serde_json::json!(run.allowed_views))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_record_stage(
        &self,
        request_id: &str,
        stage: &str,
        status: &str,
        message: &str,
        duration_ms: Option<u64>,
        metadata: Value,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_audit_events (request_id, stage, status, message, duration_ms, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(request_id)
        .bind(stage)
        .bind(status)
        .bind(truncate(message, EVENT_MESSAGE_CHARS))
        .bind(duration_ms.map(|ms| ms as i64))
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_record_success(
        &self,
        request_id: &str,
        success: &RunSuccess,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE query_audit_logs SET
                status = 'completed',
                error_stage = NULL,
                generated_sql = $2,
                validated_sql = $3,
                final_answer = $4,
                rows_count = $5,
                llm_model = $6,
                llm_input_tokens = $7,
                llm_output_tokens = $8,
                llm_total_tokens = $9,
                provider_response_id = $10,
                rag_sources = $11,
                rag_doc_ids = $12,
                model_attempts = $13,
                rag_ms = $14,
                llm_ms = $15,
                validation_ms = $16,
                exec_ms = $17,
                total_ms = $18,
                completed_at = NOW()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(&success.generated_sql)
        .bind(&success.validated_sql)
        .bind(&success.final_answer)
        .bind(success.rows_count)
        .bind(&success.llm_model)
        .bind(success.llm_usage.prompt_tokens as i64)
        .bind(success.llm_usage.completion_tokens as i64)
        .bind(success.llm_usage.total_tokens as i64)
        .bind(&success.provider_response_id)
        .bind(serde_json::json!(success.rag_sources))
        .bind(serde_json::json!(success.rag_doc_ids))
        .bind(success.model_attempts.clone())
        .bind(success.timings.rag_ms as i64)
        .bind(success.timings.llm_ms as i64)
        .bind(success.timings.validation_ms as i64)
        .bind(success.timings.exec_ms as i64)
        .bind(success.timings.total_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_record_terminal(
        &self,
        request_id: &str,
        final_status: &str,
        error_code: &str,
        error_message: &str,
        total_ms: u64,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE query_audit_logs SET
                status = 'failed',
                error_stage = $2,
                error_code = $3,
                error_message = $4,
                total_ms = $5,
                completed_at = NOW()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(final_status)
        .bind(error_code)
        .bind(truncate(error_message, ERROR_MESSAGE_CHARS))
        .bind(total_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn open_run(&self, run: &RunOpen) {
        if let Err(e) = self.try_open_run(run).await {
            warn!("Failed to open audit row for {}: {}", run.request_id, e);
        }
    }

    async fn record_stage(
        &self,
        request_id: &str,
        stage: &str,
        status: &str,
        message: &str,
        duration_ms: Option<u64>,
        metadata: Value,
    ) {
        if let Err(e) = self
            .try_record_stage(request_id, stage, status, message, duration_ms, metadata)
            .await
        {
            warn!("Failed to record audit event for {}: {}", request_id, e);
        }
    }

    async fn record_success(&self, request_id: &str, success: &RunSuccess) {
        if let Err(e) = self.try_record_success(request_id, success).await {
            warn!("Failed to record audit success for {}: {}", request_id, e);
        }
    }

    async fn record_terminal(
        &self,
        request_id: &str,
        final_status: &str,
        error_code: &str,
        error_message: &str,
        total_ms: u64,
    ) {
        if let Err(e) = self
            .try_record_terminal(request_id, final_status, error_code, error_message, total_ms)
            .await
        {
            warn!("Failed to record audit terminal for {}: {}", request_id, e);
        }
    }
}

/// Tracing-only sink for tests and deployments without an audit database.
#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn open_run(&self, run: &RunOpen) {
        info!(
            "audit open: request={} conversation={} question={:?}",
            run.request_id, run.conversation_id, run.question
        );
    }

    async fn record_stage(
        &self,
        request_id: &str,
        stage: &str,
        status: &str,
        message: &str,
        duration_ms: Option<u64>,
        metadata: Value,
    ) {
        debug!(
            "audit stage: request={} stage={} status={} message={:?} duration_ms={:?} metadata={}",
            request_id, stage, status, message, duration_ms, metadata
        );
    }

    async fn record_success(&self, request_id: &str, success: &RunSuccess) {
        info!(
            "audit success: request={} model={} rows={} total_ms={}",
            request_id, success.llm_model, success.rows_count, success.timings.total_ms
        );
    }

    async fn record_terminal(
        &self,
        request_id: &str,
        final_status: &str,
        error_code: &str,
        error_message: &str,
        total_ms: u64,
    ) {
        info!(
            "audit terminal: request={} stage={} code={} message={:?} total_ms={}",
            request_id, final_status, error_code, error_message, total_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        // Multi-byte characters are counted as characters, not bytes.
        assert_eq!(truncate("ééééé", 3), "ééé");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_all_calls() {
        let sink = LogAuditSink;
        let run = RunOpen {
            request_id: "req-1".to_string(),
            conversation_id: "conv-1".to_string(),
            org_id: "default-org".to_string(),
            user_id: "default-user".to_string(),
            question: "top customers".to_string(),
            role: "analyst".to_string(),
            store_id: 1,
            allowed_views: vec!["v_payment_scoped".to_string()],
        };
        sink.open_run(&run).await;
        sink.record_stage(
            "req-1",
            "rag_retrieval",
            "completed",
            "",
            Some(12),
            serde_json::json!({"docs": 3}),
        )
        .await;
        sink.record_terminal("req-1", "validation", "out_of_scope", "View not allowed: x", 40)
            .await;
    }

    #[test]
    fn test_stage_timings_serialize() {
        let timings = StageTimings {
            rag_ms: 1,
            llm_ms: 2,
            validation_ms: 3,
            exec_ms: 4,
            total_ms: 10,
        };
        let json = serde_json::to_value(timings).unwrap();
        assert_eq!(json["llm_ms"], 2);
        assert_eq!(json["total_ms"], 10);
    }
}
