//! Storage backends: Redis (counters, routing config, artifact cache) and
//! PostgreSQL (append-only action telemetry).

pub mod artifact_cache;
pub mod kv;
pub mod slots;
pub mod telemetry;

pub use artifact_cache::ArtifactCache;
pub use kv::Kv;
pub use slots::SlotController;
pub use telemetry::{Action, Telemetry};
