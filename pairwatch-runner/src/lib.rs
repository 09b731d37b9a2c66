//! Pairwatch Runner: user-facing services on top of `pairwatch-core`.
//!
//! This crate provides:
//! - Process configuration (TOML file plus environment overrides)
//! - The access validator gating every pair operation
//! - User and tracked-pair management
//! - Artifact rendering, token caching and delivery
//! - The rate-limited bulk sync job and its periodic scheduler

pub mod access;
pub mod artifact;
pub mod config;
pub mod scheduler;
pub mod sync;
pub mod users;

pub use access::{parse_pair, AccessStage, AccessValidator};
pub use artifact::{
    ArtifactKind, ArtifactRenderer, ArtifactService, ArtifactSpec, CacheKey, CommandRenderer,
    DeliveryOutcome, DeliverySource, MemoryTokenCache, Messenger, RedisTokenCache,
    TelegramMessenger, TokenCache,
};
pub use config::{ConfigError, Settings};
pub use scheduler::SyncScheduler;
pub use sync::{
    AdminNotifier, BulkSync, FailureNotifier, FailurePolicy, LogNotifier, SyncPlan, SyncProgress,
    SyncSummary, TracingProgress,
};
pub use users::{AddPairOutcome, UserService};
