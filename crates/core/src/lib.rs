//! Core types and shared functionality for waypost.
//!
//! This crate provides:
//! - The durable cache store (generations, entries, deferred-write queue)
//!   with a SQLite backend
//! - Request/response values shared by the store and the engine
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod http;

pub use cache::{CacheDb, GenerationInfo, GenerationPurpose, QueuedWrite, StoredEntry};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use http::{Destination, InterceptedRequest, ResponseSnapshot};
