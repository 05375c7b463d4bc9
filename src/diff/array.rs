// ============================================================================
// Array Change Classifier
// ============================================================================
//
// Detects array mutations that can be expressed as a single push or pull
// instead of a whole-array rewrite.
//
// A pull removes every element equal to the pulled value, so a remove-only
// change must drop all occurrences of each removed value. Removing one of
// several duplicates is reported as mixed.
//
// ============================================================================

use crate::core::DocValue;
use std::collections::{HashMap, HashSet};

/// Shape of the change between two arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayChange<'a> {
    Unchanged,
    /// Elements appended after an unchanged prefix.
    Append(&'a [DocValue]),
    /// Distinct values whose every occurrence was removed.
    Remove(Vec<&'a DocValue>),
    Mixed { change_ratio: f64 },
}

/// Returns the appended tail if `current` is `original` followed by zero or
/// more new elements.
pub fn append_only<'a>(original: &[DocValue], current: &'a [DocValue]) -> Option<&'a [DocValue]> {
    if current.len() < original.len() {
        return None;
    }

    if original.iter().zip(current).any(|(o, c)| o != c) {
        return None;
    }

    Some(&current[original.len()..])
}

/// Returns the removed values (one entry per distinct value, in original
/// order) if `current` is `original` with every occurrence of those values
/// removed and nothing else changed.
pub fn remove_only<'a>(original: &'a [DocValue], current: &[DocValue]) -> Option<Vec<&'a DocValue>> {
    if current.len() >= original.len() {
        return None;
    }

    let mut original_counts: HashMap<&DocValue, usize> = HashMap::new();
    for value in original {
        *original_counts.entry(value).or_default() += 1;
    }

    let mut current_counts: HashMap<&DocValue, usize> = HashMap::new();
    for value in current {
        let remaining = original_counts.get(value).copied().unwrap_or(0);
        let seen = current_counts.entry(value).or_default();
        *seen += 1;
        if *seen > remaining {
            return None;
        }
    }

    let mut removed = Vec::new();
    let mut reported: HashSet<&DocValue> = HashSet::new();
    for value in original {
        let before = original_counts[value];
        let after = current_counts.get(value).copied().unwrap_or(0);
        if after == before {
            continue;
        }
        // Partially removed duplicates cannot be expressed as a pull.
        if after != 0 {
            return None;
        }
        if reported.insert(value) {
            removed.push(value);
        }
    }

    let survivors = original.iter().filter(|value| !reported.contains(value));
    if !survivors.eq(current.iter()) {
        return None;
    }

    // A pull matches numbers across widths; it must not reach a survivor.
    if current
        .iter()
        .any(|kept| removed.iter().any(|gone| gone.filter_eq(kept)))
    {
        return None;
    }

    Some(removed)
}

/// Fraction of positions that differ between the two arrays, in `[0, 1]`.
pub fn change_ratio(original: &[DocValue], current: &[DocValue]) -> f64 {
    if original.is_empty() {
        return if current.is_empty() { 0.0 } else { 1.0 };
    }

    let min_len = original.len().min(current.len());
    let max_len = original.len().max(current.len());
    let size_delta = original.len().abs_diff(current.len());
    let common = original
        .iter()
        .zip(current)
        .filter(|(o, c)| o == c)
        .count();

    (min_len - common + size_delta) as f64 / max_len as f64
}

pub fn classify<'a>(original: &'a [DocValue], current: &'a [DocValue]) -> ArrayChange<'a> {
    if original == current {
        return ArrayChange::Unchanged;
    }

    if let Some(appended) = append_only(original, current) {
        return ArrayChange::Append(appended);
    }

    if let Some(removed) = remove_only(original, current) {
        return ArrayChange::Remove(removed);
    }

    ArrayChange::Mixed {
        change_ratio: change_ratio(original, current),
    }
}
