// ============================================================================
// Diff Module
// ============================================================================
//
// Structural diff between a snapshot and the current document:
//
// - array:  append-only / remove-only / mixed classification
// - ops:    per-path operation buckets (set, unset, inc, push, pull)
// - policy: patch-vs-replace ceiling and per-path predicates
// - engine: recursive walk producing a version-filtered write instruction
//
// ============================================================================

pub mod array;
pub mod engine;
pub mod ops;
pub mod policy;

pub use array::{ArrayChange, append_only, change_ratio, classify, remove_only};
pub use engine::{build_patch, compute_diff};
pub use ops::{IncrementRejected, NumericDelta, UpdateOps};
pub use policy::{DiffPolicy, DiffPolicyConfig, PathPredicate};
