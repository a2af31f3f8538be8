//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "".to_string()
}

/// Default collection name for reference documents
pub fn default_collection_name() -> String {
    "sqlsentry_docs".to_string()
}

/// Default embedding dimension for the feature-hash embedding
pub fn default_embedding_dimension() -> usize {
    1536
}

/// Default number of documents retrieved per question
pub fn default_retrieval_k() -> usize {
    5
}

/// Default model-provider base URL (OpenAI-compatible chat completions)
pub fn default_provider_base_url() -> String {
    std::env::var("OPENROUTER_BASE_URL")
        .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string())
}

/// Default environment variable name for the provider API key
pub fn default_provider_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

/// Default primary model
pub fn default_provider_model() -> String {
    std::env::var("OPENROUTER_MODEL")
        .unwrap_or_else(|_| "meta-llama/llama-3.2-3b-instruct:free".to_string())
}

/// Default fallback models, comma-separated in the environment
pub fn default_fallback_models() -> Vec<String> {
    std::env::var("OPENROUTER_FALLBACK_MODELS")
        .unwrap_or_default()
        .split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

/// Default provider request timeout in seconds
pub fn default_provider_timeout() -> u64 {
    45
}

/// Default: request reasoning metadata from the provider
pub fn default_reasoning_enabled() -> bool {
    true
}

/// Default Postgres connection URL
///
/// Prefers DATABASE_URL; otherwise composes one from the POSTGRES_* pieces.
pub fn default_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        let host = std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
        let db = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "pagila".to_string());
        let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
        let password =
            std::env::var("POSTGRES_PASSWORD").unwrap_or_else(|_| "postgres".to_string());
        format!("postgres://{user}:{password}@{host}:{port}/{db}")
    })
}

/// Default maximum database connections
pub fn default_db_max_connections() -> u32 {
    5
}

/// Default per-statement timeout in seconds for analytics queries
pub fn default_statement_timeout() -> u64 {
    30
}

/// Default internal token expected from callers
pub fn default_internal_token() -> String {
    std::env::var("INTERNAL_TOKEN").unwrap_or_default()
}

/// Default conversation history capacity (messages)
pub fn default_history_limit() -> usize {
    8
}

/// Default session-note capacity
pub fn default_note_limit() -> usize {
    20
}
