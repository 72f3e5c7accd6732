//! opds-catalog: OPDS catalog document engine for self-hosted e-book libraries.
//!
//! The crate turns already-fetched catalog records into Atom/OPDS feeds
//! that e-reader clients can consume, and serves them over HTTP.
//!
//! # Features
//!
//! - Feed/entry document model with a sanitizing builder API
//! - Two protocol variants (OPDS 1.0 legacy and OPDS 1.2 current)
//! - Well-formed XML rendering with best-effort HTML tag repair
//! - Rendered-feed cache keyed on request fingerprint and data freshness
//! - ETag / conditional response support
//! - Request parameter validation with typed errors

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Cached feed storage and freshness tracking.
pub mod cache;
/// Configuration and CLI.
pub mod config;
/// Catalog data store.
pub mod db;
/// Error types.
pub mod error;
/// OPDS document model and rendering.
pub mod opds;
/// Text sanitization and XML escaping.
pub mod sanitize;
/// HTTP server.
pub mod server;
/// Request parameter validation.
pub mod validate;

#[cfg(test)]
mod tests;

pub use cache::CacheManager;
pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use opds::{Entry, Feed, Link, Variant};
pub use server::AppState;
