//! SQLite-backed cache store for response generations and deferred writes.
//!
//! This module provides the durable half of the engine using SQLite with
//! async access via tokio-rusqlite. It supports:
//!
//! - Named cache generations, each a key → response mapping
//! - Request identity keys using SHA-256 hashing
//! - A persistent queue of mutating requests awaiting replay
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//!
//! Every public operation is a single statement or a single transaction,
//! so writes are atomic per key and an entry is never stored half-written.

pub mod connection;
pub mod entries;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod queue;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::StoredEntry;
pub use generations::{GenerationInfo, GenerationPurpose};
pub use queue::QueuedWrite;
