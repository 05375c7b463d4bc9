//! Recommended API entrypoints.
//!
//! The glob import covers attaching, saving and configuring. `advanced`
//! exposes the diff and write-instruction layers for callers building their
//! own save loop or driver.

pub use crate::doc;
pub use crate::{
    CancellationSignal, DiffPolicy, DocValue, Document, InMemoryClient, NoopRunLogger, Result,
    RunLogger, SaveChangesOptions, TrackError, TracingRunLogger, TrackingContext,
    TrackingHandle, TrackingRegistry,
};

pub mod advanced {
    //! Escape hatch for diff and driver internals.
    pub use crate::diff::{ArrayChange, UpdateOps, build_patch, classify, compute_diff};
    pub use crate::driver::{ClientSession, DocumentClient, DocumentCollection, DriverError};
    pub use crate::tracking::TrackedSnapshot;
    pub use crate::write::{Filter, UpdateOperation, WriteInstruction};
}
