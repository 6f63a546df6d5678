//! Creator Profile API Library
//!
//! Backend services for the creator dashboard: fit scoring for unclaimed
//! profiles, request rate limiting, subscription plan changes, tipping
//! handles, social links with domain verification, and ad-pixel settings.
//!
//! # Modules
//!
//! - `api`: HTTP layer.
//! - `core`: Domain logic, shared errors and models.
//! - `data`: Data access layer.
//! - `integrations`: External service clients.
//! - `obs`: Tracing setup and error reporting.
//! - `billing_client`: Billing provider client (Stripe).
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres repositories.
//! - `dns_client`: DNS-over-HTTPS TXT lookups.
//! - `errors`: Error handling types.
//! - `fit_score`: Fit-score calculation.
//! - `fit_score_service`: Fit-score persistence and batch jobs.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `pixels`: Ad-pixel settings validation.
//! - `plan_change`: Plan upgrade/downgrade flow.
//! - `rate_limit`: Fixed-window rate limiter with Redis and in-memory backends.
//! - `routes`: HTTP route table and middleware stack.
//! - `social_links`: Social links and domain verification.
//! - `tipping`: Tipping handle validation.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;
pub mod obs;

// Re-export primary modules for shared use in tests and other binaries
pub mod billing_client;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dns_client;
pub mod errors;
pub mod fit_score;
pub mod fit_score_service;
pub mod handlers;
pub mod models;
pub mod pixels;
pub mod plan_change;
pub mod rate_limit;
pub mod routes;
pub mod social_links;
pub mod tipping;
