//! Lead Quality API Library
//!
//! Verifies business leads against Google Places and Yelp, discovers official
//! websites, and scores each lead 0-100 with supporting evidence.
//!
//! # Modules
//!
//! - `api_client`: Rate-limited, retrying HTTP client shared by both providers.
//! - `batch`: Bounded-parallel batch scoring with per-row failure isolation.
//! - `config`: Configuration management.
//! - `enrichment`: Lead verification and scoring.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `rate_limiter`: Sliding-window rate limiting per provider.
//! - `services`: Google Places and Yelp verifiers.
//! - `website_finder`: Official website discovery via web search.

pub mod api_client;
pub mod batch;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod rate_limiter;
pub mod services;
pub mod website_finder;
