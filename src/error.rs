//! Custom error types for sqlsentry

use thiserror::Error;

/// Main error type for sqlsentry operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Generation(String),

    #[error("{0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'sqlsentry init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for sqlsentry
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}

impl Error {
    /// Audit error code for this failure.
    ///
    /// Auth and database failures map by variant; everything else falls back
    /// to the message-scanning table in [`error_code_from_message`], which is
    /// kept byte-compatible with existing audit rows.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth_error",
            Error::Database(_) => "db_error",
            other => error_code_from_message(&other.to_string()),
        }
    }

    /// HTTP-equivalent status for embedding callers that speak a transport.
    ///
    /// Generation failures are mapped by scanning the composite
    /// `all_models_failed` message for the per-model outcomes recorded by the
    /// orchestrator. The scan order is load-bearing: the aggregate
    /// rate-limit/billing cases must win over the single-attempt ones.
    pub fn status_hint(&self) -> u16 {
        match self {
            Error::Auth(msg) => {
                if msg.contains("not configured") {
                    500
                } else {
                    401
                }
            }
            Error::Validation(_) => 400,
            Error::Database(_) => 500,
            Error::Generation(msg) => {
                let lowered = msg.to_lowercase();
                if lowered.contains("all_models_failed") && lowered.contains("rate_limit") {
                    429
                } else if lowered.contains("all_models_failed") && lowered.contains("billing_limit")
                {
                    402
                } else if lowered.contains("rate limit") || lowered.contains("429") {
                    429
                } else if lowered.contains("billing_limit")
                    || lowered.contains("payment required")
                    || lowered.contains("402")
                    || lowered.contains("spend limit")
                {
                    402
                } else if lowered.contains("provider_error") {
                    503
                } else {
                    500
                }
            }
            _ => 500,
        }
    }

    /// Message safe to surface to the caller.
    ///
    /// Auth and validation messages are already caller-facing; database
    /// errors are replaced wholesale so schema details never leak; generation
    /// failures collapse to a retry-guidance string matching the status hint.
    pub fn public_message(&self) -> String {
        match self {
            Error::Auth(msg) | Error::Validation(msg) => msg.clone(),
            Error::Database(_) => "Database execution failed.".to_string(),
            Error::Generation(msg) => {
                let lowered = msg.to_lowercase();
                let text = if lowered.contains("all_models_failed")
                    && lowered.contains("rate_limit")
                {
                    "All configured models are rate-limited. Retry shortly."
                } else if lowered.contains("all_models_failed") && lowered.contains("billing_limit")
                {
                    "All configured models hit billing/spend limits."
                } else if lowered.contains("rate limit") || lowered.contains("429") {
                    "LLM rate limited. Retry in a few seconds."
                } else if lowered.contains("billing_limit")
                    || lowered.contains("payment required")
                    || lowered.contains("402")
                    || lowered.contains("spend limit")
                {
                    "LLM provider spend limit reached. Update key/limits."
                } else if lowered.contains("provider_error") {
                    "LLM provider temporary error. Please retry."
                } else {
                    "Analytics workflow failed."
                };
                text.to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Assign an audit error code by scanning a failure message.
///
/// The substring table and its ordering are preserved exactly for
/// compatibility with recorded audit rows, including the quirk that
/// statement-shape validation messages land on `unknown_error`.
pub fn error_code_from_message(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    if lowered.contains("view not allowed") {
        "out_of_scope"
    } else if lowered.contains("only select/cte") || lowered.contains("forbidden sql keyword") {
        "validation_error"
    } else if lowered.contains("rate limit") || lowered.contains("429") {
        "rate_limited"
    } else if lowered.contains("billing") || lowered.contains("spend limit") || lowered.contains("402")
    {
        "billing_limit"
    } else if lowered.contains("database execution failed") || lowered.contains("relation") {
        "db_error"
    } else if lowered.contains("provider returned error") || lowered.contains("provider_error") {
        "provider_error"
    } else {
        "unknown_error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_message_table() {
        assert_eq!(
            error_code_from_message("View not allowed: v_staff_private"),
            "out_of_scope"
        );
        assert_eq!(
            error_code_from_message("Only SELECT/CTE queries are allowed."),
            "validation_error"
        );
        assert_eq!(
            error_code_from_message("Forbidden SQL keyword: drop"),
            "validation_error"
        );
        assert_eq!(error_code_from_message("429 Too Many Requests"), "rate_limited");
        assert_eq!(
            error_code_from_message("provider spend limit reached"),
            "billing_limit"
        );
        assert_eq!(
            error_code_from_message("relation \"missing_table\" does not exist"),
            "db_error"
        );
        assert_eq!(
            error_code_from_message("all_models_failed: m: provider_error"),
            "provider_error"
        );
        assert_eq!(error_code_from_message("something else entirely"), "unknown_error");
    }

    #[test]
    fn test_statement_shape_messages_stay_unknown() {
        // Statement-count rejections predate the code table and were never
        // given their own code; they must keep mapping to unknown_error.
        assert_eq!(
            error_code_from_message("Only single SQL statement is allowed."),
            "unknown_error"
        );
        assert_eq!(
            error_code_from_message("Semicolon is allowed only at query end."),
            "unknown_error"
        );
    }

    #[test]
    fn test_auth_variant_code_and_status() {
        let unconfigured = Error::Auth("INTERNAL_TOKEN is not configured.".to_string());
        assert_eq!(unconfigured.error_code(), "auth_error");
        assert_eq!(unconfigured.status_hint(), 500);

        let invalid = Error::Auth("Invalid internal token.".to_string());
        assert_eq!(invalid.error_code(), "auth_error");
        assert_eq!(invalid.status_hint(), 401);
    }

    #[test]
    fn test_generation_composite_status_mapping() {
        let rate = Error::Generation("all_models_failed: a: rate_limit; b: rate_limit".to_string());
        assert_eq!(rate.status_hint(), 429);
        assert_eq!(
            rate.public_message(),
            "All configured models are rate-limited. Retry shortly."
        );

        let billing =
            Error::Generation("all_models_failed: a: billing_limit".to_string());
        assert_eq!(billing.status_hint(), 402);

        let mixed =
            Error::Generation("all_models_failed: a: provider_error; b: provider_error".to_string());
        assert_eq!(mixed.status_hint(), 503);
        assert_eq!(mixed.error_code(), "provider_error");
    }

    #[test]
    fn test_validation_status_and_public_message() {
        let err = Error::Validation("View not allowed: v_secret".to_string());
        assert_eq!(err.status_hint(), 400);
        assert_eq!(err.error_code(), "out_of_scope");
        assert_eq!(err.public_message(), "View not allowed: v_secret");
    }
}
