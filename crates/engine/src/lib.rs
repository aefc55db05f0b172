//! The waypost interception engine.
//!
//! This crate provides:
//! - Request classification into resource classes
//! - The cache-first, network-first and stale-while-revalidate strategies
//! - Cache generation install and activation
//! - The deferred write queue and its replay protocol
//! - The lifecycle state machine and its control messages
//! - The upstream fetch pipeline behind the [`Fetcher`] trait

pub mod classify;
pub mod engine;
pub mod fetch;
pub mod lifecycle;
pub mod manager;
pub mod notify;
pub mod strategy;
pub mod sync;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use classify::{Classifier, ResourceClass};
pub use engine::{Engine, Outcome};
pub use fetch::{FetchClient, FetchConfig, Fetcher, fetch_with_timeout};
pub use lifecycle::{ControlMessage, ControlReply, LifecycleController, LifecycleState, LifecycleStatus};
pub use manager::{GenerationManager, GenerationNames, InstallReport};
pub use notify::{Notification, NotificationAction, Notifier};
pub use strategy::{ResponseSource, Served, Strategy, StrategyEngine};
pub use sync::{DeferredWriteQueue, ReplayReport};
pub use tasks::BackgroundTasks;
