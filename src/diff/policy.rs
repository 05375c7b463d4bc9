use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub type PathPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub const DEFAULT_MAX_FIELD_OPS_BEFORE_DOC_REPLACE: usize = 32;

/// Controls how a diff is turned into update operations.
#[derive(Clone)]
pub struct DiffPolicy {
    /// Above this many field operations the whole document is replaced.
    pub max_field_ops_before_doc_replace: usize,

    /// Whether an integer field may be updated with an increment instead of
    /// an overwrite. Defaults to never.
    pub allow_inc_path: Option<PathPredicate>,

    /// Whether a removed field becomes an unset rather than an explicit null.
    /// Defaults to always.
    pub allow_unset_path: Option<PathPredicate>,
}

impl Default for DiffPolicy {
    fn default() -> Self {
        Self {
            max_field_ops_before_doc_replace: DEFAULT_MAX_FIELD_OPS_BEFORE_DOC_REPLACE,
            allow_inc_path: None,
            allow_unset_path: None,
        }
    }
}

impl DiffPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that allows increments on exactly the given paths.
    pub fn with_inc<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: HashSet<String> = paths.into_iter().map(Into::into).collect();
        Self::new().allow_inc_path(move |path| paths.contains(path))
    }

    /// Set the patch-to-replace ceiling
    pub fn max_field_ops_before_doc_replace(mut self, max: usize) -> Self {
        self.max_field_ops_before_doc_replace = max;
        self
    }

    /// Set the increment predicate
    pub fn allow_inc_path(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.allow_inc_path = Some(Arc::new(predicate));
        self
    }

    /// Set the unset predicate
    pub fn allow_unset_path(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.allow_unset_path = Some(Arc::new(predicate));
        self
    }

    pub fn allows_inc(&self, path: &str) -> bool {
        self.allow_inc_path
            .as_ref()
            .is_some_and(|predicate| predicate(path))
    }

    pub fn allows_unset(&self, path: &str) -> bool {
        self.allow_unset_path
            .as_ref()
            .is_none_or(|predicate| predicate(path))
    }
}

impl fmt::Debug for DiffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffPolicy")
            .field(
                "max_field_ops_before_doc_replace",
                &self.max_field_ops_before_doc_replace,
            )
            .field("allow_inc_path", &self.allow_inc_path.is_some())
            .field("allow_unset_path", &self.allow_unset_path.is_some())
            .finish()
    }
}

/// Serializable form of [`DiffPolicy`] for loading from configuration files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiffPolicyConfig {
    pub max_field_ops_before_doc_replace: usize,
    /// Paths that may be updated with an increment.
    pub inc_paths: Vec<String>,
    /// Paths whose removal is written as an explicit null instead of an unset.
    pub keep_null_paths: Vec<String>,
}

impl Default for DiffPolicyConfig {
    fn default() -> Self {
        Self {
            max_field_ops_before_doc_replace: DEFAULT_MAX_FIELD_OPS_BEFORE_DOC_REPLACE,
            inc_paths: Vec::new(),
            keep_null_paths: Vec::new(),
        }
    }
}

impl From<DiffPolicyConfig> for DiffPolicy {
    fn from(value: DiffPolicyConfig) -> Self {
        let mut policy = DiffPolicy::with_inc(value.inc_paths)
            .max_field_ops_before_doc_replace(value.max_field_ops_before_doc_replace);

        if !value.keep_null_paths.is_empty() {
            let keep: HashSet<String> = value.keep_null_paths.into_iter().collect();
            policy = policy.allow_unset_path(move |path| !keep.contains(path));
        }

        policy
    }
}
