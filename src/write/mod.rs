// ============================================================================
// Write Instructions
// ============================================================================
//
// Driver-neutral description of a single-document write: an identity +
// version filter and either a list of update operators or a replacement
// document. The destination driver turns batches of these into network
// calls.
//
// ============================================================================

use crate::core::{DocValue, Document};
use crate::diff::NumericDelta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Matches exactly one document at exactly one version.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub id_field: String,
    pub id: DocValue,
    pub version_field: String,
    pub version: i64,
}

impl Filter {
    pub fn new(
        id_field: impl Into<String>,
        id: DocValue,
        version_field: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            id_field: id_field.into(),
            id,
            version_field: version_field.into(),
            version,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let id_matches = doc
            .get(&self.id_field)
            .is_some_and(|id| id.filter_eq(&self.id));
        let version_matches = doc
            .get(&self.version_field)
            .is_some_and(|version| version.filter_eq(&DocValue::Int64(self.version)));

        id_matches && version_matches
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ {}: {}, {}: {} }}",
            self.id_field, self.id, self.version_field, self.version
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    Set { path: String, value: DocValue },
    Unset { path: String },
    Inc { path: String, delta: NumericDelta },
    Push { path: String, value: DocValue },
    PushEach { path: String, values: Vec<DocValue> },
    Pull { path: String, value: DocValue },
    PullAll { path: String, values: Vec<DocValue> },
}

impl UpdateOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Unset { path }
            | Self::Inc { path, .. }
            | Self::Push { path, .. }
            | Self::PushEach { path, .. }
            | Self::Pull { path, .. }
            | Self::PullAll { path, .. } => path,
        }
    }

    /// Operator name as used by document databases (`$set`, `$inc`, ...).
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Set { .. } => "$set",
            Self::Unset { .. } => "$unset",
            Self::Inc { .. } => "$inc",
            Self::Push { .. } | Self::PushEach { .. } => "$push",
            Self::Pull { .. } => "$pull",
            Self::PullAll { .. } => "$pullAll",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteInstruction {
    UpdateOne {
        filter: Filter,
        update: Vec<UpdateOperation>,
        upsert: bool,
    },
    ReplaceOne {
        filter: Filter,
        replacement: Document,
        upsert: bool,
    },
}

impl WriteInstruction {
    pub fn filter(&self) -> &Filter {
        match self {
            Self::UpdateOne { filter, .. } | Self::ReplaceOne { filter, .. } => filter,
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, Self::ReplaceOne { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateOne { .. } => "updateOne",
            Self::ReplaceOne { .. } => "replaceOne",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkWriteOptions {
    /// Stop at the first failing write instead of attempting every write.
    pub ordered: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub matched: u64,
    pub modified: u64,
}
