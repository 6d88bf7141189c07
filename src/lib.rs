// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod analyze;
pub mod collect;
pub mod config;
pub mod decide;
pub mod insight;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod report;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::Config;
pub use crate::decide::{DecisionEngine, Disposition};
pub use crate::insight::{Insight, Priority, Snapshot};
pub use crate::notify::{Channel, DeliveryManager};
pub use crate::orchestrator::Orchestrator;
pub use crate::store::Store;
