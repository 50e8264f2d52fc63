//! Support-ticket lifecycle service: SLA policy, field-level authorization,
//! an append-only audit timeline, idempotent mutations and optimistic
//! concurrency over a SQLite store, served over HTTP with axum.

pub mod api;
pub mod audit;
pub mod clock;
pub mod config;
pub mod db;
pub mod directory;
pub mod engine;
pub mod idempotency;
pub mod lifecycle;
pub mod logging;
