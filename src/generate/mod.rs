//! SQL-generation orchestrator
//!
//! Drives the configured models in priority order, parses structured output,
//! classifies failures, and returns a candidate SQL payload plus provenance.
//! One attempt per model, no same-model retries; the first usable payload
//! wins. Candidates returned here are untrusted until the safety validator
//! approves them.

use crate::error::{Error, Result};
use crate::memory::ConversationTurn;
use crate::provider::{ChatMessage, ProviderClient, ProviderFailure, ProviderReply, TokenUsage};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// System instruction sent with every generation attempt.
pub const SQL_SYSTEM_INSTRUCTIONS: &str =
    "You are a SQL generation agent for Postgres analytics. \
     Return JSON only with keys: query, explain, risk. \
     The query must be one single SELECT or WITH...SELECT statement. \
     Use only explicitly allowed views and include LIMIT <= 200.";

/// Conversation turns included in the prompt
const HISTORY_TURNS: usize = 8;

static JSON_OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[\s\S]*?\}").unwrap());

/// Self-assessed risk of a candidate query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Med,
    High,
}

impl Risk {
    /// Parse a model-supplied risk label; anything unrecognized is `med`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" => Risk::Low,
            "high" => Risk::High,
            _ => Risk::Med,
        }
    }
}

/// Untrusted SQL payload produced by a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub query: String,
    pub explain: String,
    pub risk: Risk,
}

/// Classified outcome of one model attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Ok,
    RateLimit,
    BillingLimit,
    ProviderError,
    ProviderErrorEmpty,
    ProviderErrorInvalidPayload,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Ok => "ok",
            AttemptOutcome::RateLimit => "rate_limit",
            AttemptOutcome::BillingLimit => "billing_limit",
            AttemptOutcome::ProviderError => "provider_error",
            AttemptOutcome::ProviderErrorEmpty => "provider_error_empty",
            AttemptOutcome::ProviderErrorInvalidPayload => "provider_error_invalid_payload",
        }
    }
}

impl Serialize for AttemptOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One entry in the append-only attempt list
#[derive(Debug, Clone, Serialize)]
pub struct ModelAttempt {
    pub model: String,
    pub status: AttemptOutcome,
}

/// Provenance metadata attached to a successful generation
#[derive(Debug, Clone)]
pub struct Provenance {
    /// Full prompt text sent to the winning model
    pub prompt: String,

    /// Raw response text the payload was parsed from
    pub content: String,

    /// Provider reasoning metadata, if any
    pub reasoning_details: Option<Value>,

    /// Model identifier the orchestrator requested
    pub model: String,

    /// Model identifier the provider reports having served
    pub provider_model: String,

    /// Provider-assigned response id
    pub response_id: String,

    pub usage: TokenUsage,

    /// Every attempt made during this call, in order
    pub attempts: Vec<ModelAttempt>,
}

/// Classify a provider failure into an attempt outcome.
///
/// The substring checks and their priority order are preserved for
/// compatibility with recorded attempt lists; the failure's display text is
/// the single source scanned, so the rule lives in exactly one place.
pub fn classify_failure(failure: &ProviderFailure) -> AttemptOutcome {
    let lowered = failure.to_string().to_lowercase();
    if lowered.contains("429") || lowered.contains("rate limit") {
        AttemptOutcome::RateLimit
    } else if lowered.contains("402")
        || lowered.contains("payment required")
        || lowered.contains("spend limit")
    {
        AttemptOutcome::BillingLimit
    } else {
        AttemptOutcome::ProviderError
    }
}

/// Scan response text for JSON objects: the whole trimmed text first, then
/// every `{...}` substring.
fn extract_json_candidates(text: &str) -> Vec<Value> {
    let mut candidates = Vec::new();
    let stripped = text.trim();
    if stripped.is_empty() {
        return candidates;
    }

    if stripped.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(stripped) {
            candidates.push(Value::Object(map));
        }
    }

    for m in JSON_OBJECT_RE.find_iter(stripped) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(m.as_str()) {
            candidates.push(Value::Object(map));
        }
    }

    candidates
}

/// Parse the first JSON object carrying a usable `query` string.
pub fn parse_sql_payload(content: &str) -> Option<SqlCandidate> {
    for payload in extract_json_candidates(content) {
        let query = payload.get("query").and_then(Value::as_str).unwrap_or("");
        if query.trim().is_empty() {
            continue;
        }
        let explain = payload
            .get("explain")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let risk = payload
            .get("risk")
            .and_then(Value::as_str)
            .map(Risk::parse)
            .unwrap_or(Risk::Med);
        return Some(SqlCandidate {
            query: query.trim().to_string(),
            explain,
            risk,
        });
    }
    None
}

/// Multi-model generation orchestrator.
///
/// Stateless across calls except for the most recently successful model
/// identifier, kept for reporting only.
pub struct Orchestrator {
    provider: Arc<dyn ProviderClient>,
    fallback_models: Vec<String>,
    last_model_used: Mutex<Option<String>>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ProviderClient>, fallback_models: Vec<String>) -> Self {
        Self {
            provider,
            fallback_models,
            last_model_used: Mutex::new(None),
        }
    }

    /// The model that served the most recent successful generation.
    pub fn last_model_used(&self) -> Option<String> {
        self.last_model_used.lock().expect("lock poisoned").clone()
    }

    /// Ordered, de-duplicated candidate list: primary first, then fallbacks.
    pub fn candidate_models(&self, primary: &str) -> Vec<String> {
        let mut unique: Vec<String> = Vec::with_capacity(1 + self.fallback_models.len());
        for model in std::iter::once(primary).chain(self.fallback_models.iter().map(String::as_str))
        {
            if !unique.iter().any(|m| m == model) {
                unique.push(model.to_string());
            }
        }
        unique
    }

    /// Build the prompt body plus memory and history prefixes.
    pub fn build_prompt(
        &self,
        question: &str,
        allowed_views: &[String],
        context: &str,
        hints: &[String],
        history: &[ConversationTurn],
        memory_notes: &str,
    ) -> String {
        let allowed = if allowed_views.is_empty() {
            "none".to_string()
        } else {
            allowed_views.join(", ")
        };
        let hint_text = if hints.is_empty() {
            "none".to_string()
        } else {
            hints.join("\n")
        };

        let mut prompt = format!(
            "Question: {question}\n\
             Allowed views: {allowed}\n\
             RAG context:\n{context}\n\
             Semantic hints:\n{hint_text}\n\
             Hard rules:\n\
             - one statement only\n\
             - SELECT or WITH...SELECT only\n\
             - no INSERT/UPDATE/DELETE/DDL\n\
             - use only allowed views\n\
             - LIMIT <= 200\n\
             Return JSON only: {{\"query\":\"...\",\"explain\":\"...\",\"risk\":\"low|med|high\"}}."
        );

        if !history.is_empty() {
            let start = history.len().saturating_sub(HISTORY_TURNS);
            let rendered = history[start..]
                .iter()
                .map(|turn| format!("{}: {}", turn.role, turn.content))
                .collect::<Vec<_>>()
                .join("\n");
            prompt = format!("Conversation history:\n{rendered}\n\n{prompt}");
        }

        if !memory_notes.is_empty() {
            prompt = format!("Conversation memory:\n{memory_notes}\n\n{prompt}");
        }

        prompt
    }

    /// Run the fallback chain until one model yields a usable payload.
    ///
    /// Each candidate model gets exactly one attempt; outcomes are recorded
    /// in order. Exhaustion fails with a composite message encoding every
    /// attempted model and its classified outcome.
    pub async fn generate(
        &self,
        question: &str,
        allowed_views: &[String],
        context: &str,
        hints: &[String],
        primary_model: &str,
        history: &[ConversationTurn],
        memory_notes: &str,
    ) -> Result<(SqlCandidate, Provenance)> {
        let prompt =
            self.build_prompt(question, allowed_views, context, hints, history, memory_notes);
        let messages = vec![
            ChatMessage::system(SQL_SYSTEM_INSTRUCTIONS),
            ChatMessage::user(prompt.clone()),
        ];

        let mut attempts: Vec<ModelAttempt> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for model in self.candidate_models(primary_model) {
            debug!("Attempting SQL generation with model {}", model);

            let outcome = match self.provider.send(&messages, &model).await {
                Err(failure) => {
                    let outcome = classify_failure(&failure);
                    warn!("Model {} failed: {} ({})", model, failure, outcome.as_str());
                    outcome
                }
                Ok(reply) if reply.content.trim().is_empty() => {
                    warn!("Model {} returned an empty response", model);
                    AttemptOutcome::ProviderErrorEmpty
                }
                Ok(reply) => match parse_sql_payload(&reply.content) {
                    Some(candidate) => {
                        attempts.push(ModelAttempt {
                            model: model.clone(),
                            status: AttemptOutcome::Ok,
                        });
                        *self.last_model_used.lock().expect("lock poisoned") =
                            Some(model.clone());
                        let provenance = self.provenance(&model, prompt, reply, attempts);
                        return Ok((candidate, provenance));
                    }
                    None => {
                        warn!("Model {} returned no usable query payload", model);
                        AttemptOutcome::ProviderErrorInvalidPayload
                    }
                },
            };

            attempts.push(ModelAttempt {
                model: model.clone(),
                status: outcome,
            });
            errors.push(format!("{}: {}", model, outcome.as_str()));
        }

        Err(Error::Generation(format!(
            "all_models_failed: {}",
            errors.join("; ")
        )))
    }

    fn provenance(
        &self,
        model: &str,
        prompt: String,
        reply: ProviderReply,
        attempts: Vec<ModelAttempt>,
    ) -> Provenance {
        Provenance {
            prompt,
            content: reply.content,
            reasoning_details: reply.reasoning_details,
            model: model.to_string(),
            provider_model: reply.model,
            response_id: reply.response_id,
            usage: reply.usage,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Scripted provider: one canned result per model id.
    struct ScriptedProvider {
        replies: HashMap<String, std::result::Result<String, ProviderFailure>>,
    }

    impl ScriptedProvider {
        fn new(entries: Vec<(&str, std::result::Result<String, ProviderFailure>)>) -> Arc<Self> {
            Arc::new(Self {
                replies: entries
                    .into_iter()
                    .map(|(m, r)| (m.to_string(), r))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        async fn send(
            &self,
            _messages: &[ChatMessage],
            model: &str,
        ) -> std::result::Result<ProviderReply, ProviderFailure> {
            match self.replies.get(model) {
                Some(Ok(content)) => Ok(ProviderReply {
                    content: content.clone(),
                    usage: TokenUsage::default(),
                    reasoning_details: None,
                    model: model.to_string(),
                    response_id: format!("resp-{model}"),
                }),
                Some(Err(failure)) => Err(failure.clone()),
                None => Err(ProviderFailure::Transport("unscripted model".to_string())),
            }
        }
    }

    fn good_payload() -> String {
        r#"{"query":"SELECT customer_id FROM v_payment_scoped LIMIT 10","explain":"top","risk":"low"}"#
            .to_string()
    }

    fn rate_limited() -> ProviderFailure {
        ProviderFailure::Status {
            status: 429,
            body: "Too Many Requests".to_string(),
        }
    }

    #[test]
    fn test_candidate_models_dedupes_preserving_order() {
        let orchestrator = Orchestrator::new(
            ScriptedProvider::new(vec![]),
            vec!["m2".to_string(), "m1".to_string(), "m3".to_string()],
        );
        assert_eq!(orchestrator.candidate_models("m1"), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_parse_payload_whole_text() {
        let candidate = parse_sql_payload(&good_payload()).unwrap();
        assert_eq!(candidate.query, "SELECT customer_id FROM v_payment_scoped LIMIT 10");
        assert_eq!(candidate.risk, Risk::Low);
    }

    #[test]
    fn test_parse_payload_embedded_in_prose() {
        let text = format!("Here is the query:\n```json\n{}\n```\nDone.", good_payload());
        let candidate = parse_sql_payload(&text).unwrap();
        assert!(candidate.query.starts_with("SELECT"));
    }

    #[test]
    fn test_parse_payload_skips_objects_without_query() {
        let text = r#"{"note":"x"} {"query":"SELECT 1","risk":"HIGH"}"#;
        let candidate = parse_sql_payload(text).unwrap();
        assert_eq!(candidate.query, "SELECT 1");
        assert_eq!(candidate.risk, Risk::High);
        assert_eq!(candidate.explain, "");
    }

    #[test]
    fn test_parse_payload_rejects_garbage() {
        assert!(parse_sql_payload("no json here").is_none());
        assert!(parse_sql_payload("").is_none());
        assert!(parse_sql_payload(r#"{"query":"   "}"#).is_none());
    }

    #[test]
    fn test_risk_parse_defaults_to_med() {
        assert_eq!(Risk::parse("LOW"), Risk::Low);
        assert_eq!(Risk::parse("weird"), Risk::Med);
    }

    #[test]
    fn test_classify_failure_priority() {
        assert_eq!(classify_failure(&rate_limited()), AttemptOutcome::RateLimit);
        assert_eq!(
            classify_failure(&ProviderFailure::Transport("Rate Limit hit".to_string())),
            AttemptOutcome::RateLimit
        );
        assert_eq!(
            classify_failure(&ProviderFailure::Status {
                status: 402,
                body: "Payment Required".to_string()
            }),
            AttemptOutcome::BillingLimit
        );
        assert_eq!(
            classify_failure(&ProviderFailure::Transport("spend limit reached".to_string())),
            AttemptOutcome::BillingLimit
        );
        assert_eq!(
            classify_failure(&ProviderFailure::Transport("connection reset".to_string())),
            AttemptOutcome::ProviderError
        );
        assert_eq!(
            classify_failure(&ProviderFailure::MissingApiKey),
            AttemptOutcome::ProviderError
        );
    }

    #[test]
    fn test_prompt_layout() {
        let orchestrator = Orchestrator::new(ScriptedProvider::new(vec![]), vec![]);
        let prompt = orchestrator.build_prompt(
            "top customers",
            &["v_payment_scoped".to_string()],
            "ctx",
            &["SELECT 1".to_string()],
            &[],
            "",
        );
        assert!(prompt.starts_with("Question: top customers\n"));
        assert!(prompt.contains("Allowed views: v_payment_scoped\n"));
        assert!(prompt.contains("Semantic hints:\nSELECT 1\n"));
        assert!(prompt.ends_with(r#"Return JSON only: {"query":"...","explain":"...","risk":"low|med|high"}."#));
    }

    #[test]
    fn test_prompt_empty_allowlist_and_hints_render_none() {
        let orchestrator = Orchestrator::new(ScriptedProvider::new(vec![]), vec![]);
        let prompt = orchestrator.build_prompt("q", &[], "ctx", &[], &[], "");
        assert!(prompt.contains("Allowed views: none\n"));
        assert!(prompt.contains("Semantic hints:\nnone\n"));
    }

    #[test]
    fn test_prompt_history_and_memory_prefixes() {
        use crate::provider::Role;

        let orchestrator = Orchestrator::new(ScriptedProvider::new(vec![]), vec![]);
        let history: Vec<ConversationTurn> = (0..10)
            .map(|i| ConversationTurn {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("turn {i}"),
                reasoning_details: None,
            })
            .collect();

        let prompt = orchestrator.build_prompt("q", &[], "ctx", &[], &history, "note");
        assert!(prompt.starts_with("Conversation memory:\nnote\n\nConversation history:\n"));
        // Only the last 8 of 10 turns are included.
        assert!(!prompt.contains("turn 0"));
        assert!(!prompt.contains("turn 1"));
        assert!(prompt.contains("user: turn 2"));
        assert!(prompt.contains("assistant: turn 9"));
    }

    #[tokio::test]
    async fn test_fallback_ordering_and_attempt_list() {
        let provider = ScriptedProvider::new(vec![
            ("primary", Err(rate_limited())),
            ("fb1", Err(rate_limited())),
            ("fb2", Ok(good_payload())),
        ]);
        let orchestrator =
            Orchestrator::new(provider, vec!["fb1".to_string(), "fb2".to_string()]);

        let (candidate, provenance) = orchestrator
            .generate("top customers", &[], "ctx", &[], "primary", &[], "")
            .await
            .unwrap();

        assert!(candidate.query.starts_with("SELECT"));
        assert_eq!(provenance.model, "fb2");
        assert_eq!(provenance.attempts.len(), 3);
        assert_eq!(provenance.attempts[0].model, "primary");
        assert_eq!(provenance.attempts[0].status, AttemptOutcome::RateLimit);
        assert_eq!(provenance.attempts[1].model, "fb1");
        assert_eq!(provenance.attempts[2].status, AttemptOutcome::Ok);
        assert_eq!(orchestrator.last_model_used(), Some("fb2".to_string()));
    }

    #[tokio::test]
    async fn test_empty_and_invalid_payload_outcomes() {
        let provider = ScriptedProvider::new(vec![
            ("primary", Ok("".to_string())),
            ("fb1", Ok("not json at all".to_string())),
        ]);
        let orchestrator = Orchestrator::new(provider, vec!["fb1".to_string()]);

        let err = orchestrator
            .generate("q", &[], "ctx", &[], "primary", &[], "")
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "all_models_failed: primary: provider_error_empty; fb1: provider_error_invalid_payload"
        );
    }

    #[tokio::test]
    async fn test_exhaustion_message_encodes_outcomes_in_order() {
        let provider = ScriptedProvider::new(vec![
            ("primary", Err(rate_limited())),
            (
                "fb1",
                Err(ProviderFailure::Status {
                    status: 402,
                    body: "spend limit".to_string(),
                }),
            ),
        ]);
        let orchestrator = Orchestrator::new(provider, vec!["fb1".to_string()]);

        let err = orchestrator
            .generate("q", &[], "ctx", &[], "primary", &[], "")
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "all_models_failed: primary: rate_limit; fb1: billing_limit"
        );
        // The composite maps to a rate-limited transport status.
        assert_eq!(err.status_hint(), 429);
        assert!(orchestrator.last_model_used().is_none());
    }

    #[tokio::test]
    async fn test_attempt_list_serializes_for_audit() {
        let provider = ScriptedProvider::new(vec![("primary", Ok(good_payload()))]);
        let orchestrator = Orchestrator::new(provider, vec![]);
        let (_, provenance) = orchestrator
            .generate("q", &[], "ctx", &[], "primary", &[], "")
            .await
            .unwrap();

        let json = serde_json::to_value(&provenance.attempts).unwrap();
        assert_eq!(json, serde_json::json!([{"model": "primary", "status": "ok"}]));
    }
}
