// ============================================================================
// Destination Driver
// ============================================================================
//
// The seam between the tracking context and whatever executes writes:
//
// - DocumentCollection: a destination that accepts batched write instructions
// - DocumentClient:     starts sessions spanning its collections
// - ClientSession:      transaction start / commit / abort
//
// `memory` provides an in-process implementation.
//
// ============================================================================

mod apply;
pub mod memory;

pub use memory::{InMemoryClient, InMemoryCollection, InMemorySession};

use crate::write::{BulkWriteOptions, BulkWriteResult, WriteInstruction};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    /// Position of the failing instruction within the batch.
    pub index: usize,
    pub message: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.index, self.message)
    }
}

fn join_write_errors(errors: &[WriteError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Not primary: {0}")]
    NotPrimary(String),

    #[error("Node is recovering: {0}")]
    NodeRecovering(String),

    #[error("Execution timeout: {0}")]
    ExecutionTimeout(String),

    #[error("Write concern timeout: {0}")]
    WriteConcernTimeout(String),

    #[error("Bulk write failed (matched={matched}, modified={modified}): {}", join_write_errors(.errors))]
    WriteErrors {
        matched: u64,
        modified: u64,
        errors: Vec<WriteError>,
    },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Driver error: {0}")]
    Other(String),
}

impl DriverError {
    /// Infrastructure failures that may succeed when the same batch is
    /// re-submitted.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_)
                | Self::NotPrimary(_)
                | Self::NodeRecovering(_)
                | Self::ExecutionTimeout(_)
                | Self::WriteConcernTimeout(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionLost(_) => "connection_lost",
            Self::NotPrimary(_) => "not_primary",
            Self::NodeRecovering(_) => "node_recovering",
            Self::ExecutionTimeout(_) => "execution_timeout",
            Self::WriteConcernTimeout(_) => "write_concern_timeout",
            Self::WriteErrors { .. } => "write_errors",
            Self::Transaction(_) => "transaction",
            Self::Session(_) => "session",
            Self::Other(_) => "other",
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Fully qualified destination name (`database.collection`). Writes are
    /// grouped by this value.
    fn namespace(&self) -> &str;

    fn client(&self) -> Arc<dyn DocumentClient>;

    /// Submits a batch of single-document writes. Upserts are never requested
    /// by the tracking context.
    async fn bulk_write(
        &self,
        session: Option<&mut dyn ClientSession>,
        writes: &[WriteInstruction],
        options: BulkWriteOptions,
    ) -> DriverResult<BulkWriteResult>;
}

#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn start_session(&self) -> DriverResult<Box<dyn ClientSession>>;
}

#[async_trait]
pub trait ClientSession: Send {
    async fn start_transaction(&mut self) -> DriverResult<()>;

    async fn commit_transaction(&mut self) -> DriverResult<()>;

    async fn abort_transaction(&mut self) -> DriverResult<()>;

    fn in_transaction(&self) -> bool;

    /// Lets a driver recover its concrete session type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
