// ============================================================================
// Tracking Module
// ============================================================================
//
// Unit-of-work change tracking on top of the diff engine:
//
// - registry: per-type identity / version field names
// - entry:    attach-time snapshot and the handle given back to callers
// - context:  attach + save (grouping, retries, transactions, conflicts)
// - options:  save configuration
// - logger:   injected run logger
// - cancel:   cooperative cancellation
//
// ============================================================================

pub mod cancel;
pub mod context;
pub mod entry;
pub mod logger;
pub mod options;
pub mod registry;

pub use cancel::CancellationSignal;
pub use context::TrackingContext;
pub use entry::{TrackedSnapshot, TrackingHandle};
pub use logger::{NoopRunLogger, RunLogger, TracingRunLogger};
pub use options::SaveChangesOptions;
pub use registry::{TrackingMetadata, TrackingRegistry};
