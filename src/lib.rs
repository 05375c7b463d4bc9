// ============================================================================
// DocTrack Library
// ============================================================================
//
// Change tracking with optimistic concurrency for document stores. Entities
// are attached to a `TrackingContext`, mutated in memory, and saved as
// minimal version-filtered writes; a write that no longer matches its
// expected version surfaces as a concurrency conflict.
//
// ============================================================================

pub mod core;
pub mod diff;
pub mod driver;
pub mod prelude;
pub mod tracking;
pub mod write;

// Re-export main types for convenience
pub use crate::core::{DocValue, Document, Result, TrackError, to_document};
pub use diff::DiffPolicy;
pub use driver::{DriverError, InMemoryClient};
pub use tracking::{
    CancellationSignal, NoopRunLogger, RunLogger, SaveChangesOptions, TracingRunLogger,
    TrackingContext, TrackingHandle, TrackingRegistry,
};
