//! Offline-first request interception.
//!
//! Requests are routed to a caching strategy, forwarded, or captured for
//! later replay. Responses live in generation-scoped cache partitions that
//! are replaced wholesale when the generation changes.

pub mod cache;
pub mod config;
pub mod db;
pub mod fallback;
pub mod interceptor;
pub mod lifecycle;
pub mod network;
pub mod push;
pub mod queue;
pub mod router;
pub mod strategy;

pub use config::Config;
pub use interceptor::{Intercepted, Interceptor, SyncTrigger, WorkerMessage};
