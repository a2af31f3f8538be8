//! sqlsentry - natural-language analytics over Postgres
//!
//! This crate provides:
//! - A guarded SQL-generation pipeline: retrieval context, multi-model
//!   fallback, a static safety validator, scoped execution
//! - Qdrant-backed reference-document retrieval with deterministic
//!   feature-hash embeddings
//! - Audit persistence for every pipeline run

pub mod answer;
pub mod audit;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod embed;
pub mod error;
pub mod generate;
pub mod index;
pub mod memory;
pub mod pipeline;
pub mod provider;
pub mod validate;

pub use config::Config;
pub use error::{Error, Result};
