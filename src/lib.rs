//! Kommo Lead Scorer Library
//!
//! Scores Kommo CRM leads with a language model, tags each lead with its
//! score and moves high-scoring leads into a target pipeline.
//!
//! # Modules
//!
//! - `circuit_breaker`: Circuit breaker around language-model calls.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `kommo_client`: Kommo CRM gateway (trait and REST client).
//! - `models`: Leads, pipelines and scoring results.
//! - `openai_client`: Language-model completion client.
//! - `processor`: Batch orchestration (score, tag, move).
//! - `scorer`: Prompt construction and response parsing for one lead.
//! - `summarizer`: Lead-to-text rendering.

pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod kommo_client;
pub mod models;
pub mod openai_client;
pub mod processor;
pub mod scorer;
pub mod summarizer;
