use crate::write::BulkWriteOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Save configuration
///
/// Controls batch ordering, transient-failure retries and whether all
/// destination groups run inside one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveChangesOptions {
    /// Apply writes within a group in order, stopping at the first failure
    pub ordered: bool,

    /// Retries per destination group for transient driver failures
    pub max_retries: u32,

    /// Wrap every group in a single session transaction
    pub use_transaction: bool,

    /// Delay before the first retry; doubles on each further retry
    pub retry_base_delay_ms: u64,
}

impl Default for SaveChangesOptions {
    fn default() -> Self {
        Self {
            ordered: false,
            max_retries: 2,
            use_transaction: false,
            retry_base_delay_ms: 80,
        }
    }
}

impl SaveChangesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn use_transaction(mut self, enabled: bool) -> Self {
        self.use_transaction = enabled;
        self
    }

    pub fn retry_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    pub fn bulk_write_options(&self) -> BulkWriteOptions {
        BulkWriteOptions {
            ordered: self.ordered,
        }
    }
}
