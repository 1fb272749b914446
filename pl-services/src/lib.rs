//! Parley Services - execution contexts and the subsystems that run on them.
//!
//! This crate provides:
//! - Serial execution contexts (UI-facing and background/sync) with per-context metadata
//! - Content classification and the per-message category cache
//! - Batched, cancellable asset collection scans
//! - Per-context destruction timer registries for ephemeral messages
//! - Event bus (typed notification of timer outcomes)
//! - Lifecycle management (startup restore, shutdown teardown)

pub mod asset_collection;
pub mod category_cache;
pub mod classifier;
pub mod context;
pub mod destruction_timer;
pub mod event_bus;
pub mod lifecycle;
pub mod service;

// Re-export key types
pub use asset_collection::{collect_unbatched, AssetCollection, CollectionEvent, FetchResult, ScanOptions};
pub use category_cache::CategoryCache;
pub use classifier::{ContentClassifier, DefaultClassifier};
pub use context::{ContextStack, ContextState, ManagedContext};
pub use destruction_timer::DestructionTimer;
pub use event_bus::{AppEvent, EventBus};
pub use lifecycle::{LifecyclePhase, LifecycleService, StartupReport};
pub use service::{Service, ServiceState};
