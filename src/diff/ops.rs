// ============================================================================
// Update Operation Buckets
// ============================================================================
//
// Accumulates the field-level primitives produced by one diff. A path lives
// in at most one bucket: inserting into a bucket evicts the path from all
// the others.
//
// ============================================================================

use crate::core::DocValue;
use crate::write::UpdateOperation;
use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// Signed increment tagged with the integer width of the field it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericDelta {
    Int32(i32),
    Int64(i64),
}

impl NumericDelta {
    /// Delta that turns `original` into `current`, when both are integers of
    /// the same width and the difference fits that width.
    pub fn between(original: &DocValue, current: &DocValue) -> Option<Self> {
        match (original, current) {
            (DocValue::Int32(o), DocValue::Int32(c)) => c.checked_sub(*o).map(Self::Int32),
            (DocValue::Int64(o), DocValue::Int64(c)) => c.checked_sub(*o).map(Self::Int64),
            _ => None,
        }
    }

    /// Sums two deltas of the same width. `None` on width mismatch or
    /// overflow.
    pub fn checked_add(self, other: NumericDelta) -> Option<Self> {
        match (self, other) {
            (Self::Int32(a), Self::Int32(b)) => a.checked_add(b).map(Self::Int32),
            (Self::Int64(a), Self::Int64(b)) => a.checked_add(b).map(Self::Int64),
            _ => None,
        }
    }

    pub fn is_zero(self) -> bool {
        matches!(self, Self::Int32(0) | Self::Int64(0))
    }

    pub fn to_value(self) -> DocValue {
        match self {
            Self::Int32(v) => DocValue::Int32(v),
            Self::Int64(v) => DocValue::Int64(v),
        }
    }
}

impl fmt::Display for NumericDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}L"),
        }
    }
}

/// Why an increment could not be folded into the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementRejected {
    WidthMismatch,
    Overflow,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOps {
    sets: IndexMap<String, DocValue>,
    unsets: IndexSet<String>,
    incs: IndexMap<String, NumericDelta>,
    pushes: IndexMap<String, Vec<DocValue>>,
    pulls: IndexMap<String, Vec<DocValue>>,
}

impl UpdateOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: DocValue) {
        let path = path.into();
        self.evict(&path);
        self.sets.insert(path, value);
    }

    pub fn unset(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.evict(&path);
        self.unsets.insert(path);
    }

    /// Adds `delta` to the increment recorded for `path`.
    ///
    /// On rejection the bucket is left untouched and the caller is expected
    /// to fall back to a Set for the path.
    pub fn add_increment(&mut self, path: &str, delta: NumericDelta) -> Result<(), IncrementRejected> {
        let combined = match self.incs.get(path) {
            None => delta,
            Some(existing) => match (existing, delta) {
                (NumericDelta::Int32(_), NumericDelta::Int32(_))
                | (NumericDelta::Int64(_), NumericDelta::Int64(_)) => existing
                    .checked_add(delta)
                    .ok_or(IncrementRejected::Overflow)?,
                _ => return Err(IncrementRejected::WidthMismatch),
            },
        };

        self.evict(path);
        if !combined.is_zero() {
            self.incs.insert(path.to_string(), combined);
        }
        Ok(())
    }

    pub fn push(&mut self, path: impl Into<String>, values: Vec<DocValue>) {
        let path = path.into();
        self.evict(&path);
        self.pushes.insert(path, values);
    }

    pub fn pull(&mut self, path: impl Into<String>, values: Vec<DocValue>) {
        let path = path.into();
        self.evict(&path);
        self.pulls.insert(path, values);
    }

    fn evict(&mut self, path: &str) {
        self.sets.shift_remove(path);
        self.unsets.shift_remove(path);
        self.pushes.shift_remove(path);
        self.pulls.shift_remove(path);
        self.incs.shift_remove(path);
    }

    pub fn sets(&self) -> &IndexMap<String, DocValue> {
        &self.sets
    }

    pub fn unsets(&self) -> &IndexSet<String> {
        &self.unsets
    }

    pub fn incs(&self) -> &IndexMap<String, NumericDelta> {
        &self.incs
    }

    pub fn pushes(&self) -> &IndexMap<String, Vec<DocValue>> {
        &self.pushes
    }

    pub fn pulls(&self) -> &IndexMap<String, Vec<DocValue>> {
        &self.pulls
    }

    /// Total number of bucket entries, used for the patch-vs-replace decision.
    pub fn field_ops_count(&self) -> usize {
        self.sets.len() + self.unsets.len() + self.incs.len() + self.pushes.len() + self.pulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_ops_count() == 0
    }

    /// Flattens the buckets into update operations: sets, unsets, increments,
    /// pushes, pulls.
    pub fn into_operations(self) -> Vec<UpdateOperation> {
        let mut operations = Vec::with_capacity(self.field_ops_count());

        for (path, value) in self.sets {
            operations.push(UpdateOperation::Set { path, value });
        }

        for path in self.unsets {
            operations.push(UpdateOperation::Unset { path });
        }

        for (path, delta) in self.incs {
            operations.push(UpdateOperation::Inc { path, delta });
        }

        for (path, mut values) in self.pushes {
            if values.len() == 1 {
                let value = values.remove(0);
                operations.push(UpdateOperation::Push { path, value });
            } else {
                operations.push(UpdateOperation::PushEach { path, values });
            }
        }

        for (path, mut values) in self.pulls {
            if values.len() == 1 {
                let value = values.remove(0);
                operations.push(UpdateOperation::Pull { path, value });
            } else {
                operations.push(UpdateOperation::PullAll { path, values });
            }
        }

        operations
    }
}
