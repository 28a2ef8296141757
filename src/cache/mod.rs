//! Atrium cache layer
//!
//! Snapshots produced by the page loaders are stored as JSON envelopes in a
//! key-value store (Redis in production, an in-process LRU otherwise).
//!
//! - **Keys**: deterministic namespace per resource and audience
//! - **Client**: fail-open reads bounded by `op_timeout_ms`
//! - **Invalidator**: synchronous deletion of every affected key before a
//!   write is acknowledged, then a best-effort broadcast to peers
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! public_ttl_secs = 300
//! user_ttl_secs = 30
//! # ... see config.rs for all options
//! ```

mod broadcast;
mod client;
mod config;
mod events;
mod glob;
mod invalidator;
mod keys;
mod lock;
mod planner;
mod store;

pub use broadcast::{BROADCAST_PATH, BroadcastConfig, Broadcaster, SECRET_HEADER};
pub use client::{CacheClient, CacheEntry};
pub use config::{CacheBackend, CacheConfig};
pub use events::{
    BroadcastData, BroadcastMessage, InvalidationRequest, InvalidationScope, Origin, ResourceType,
};
pub use glob::glob_match;
pub use invalidator::{InvalidationReport, Invalidator};
pub use keys::{Audience, CacheKey, KeyPattern};
pub(crate) use lock::mutex_lock;
pub use planner::InvalidationPlan;
pub use store::{CacheStore, MemoryStore, Pipeline, PipelineOp, StoreError};
