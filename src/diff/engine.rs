// ============================================================================
// Diff Engine
// ============================================================================
//
// Walks the attach-time snapshot and the current document side by side and
// produces one version-filtered write instruction:
//
//   - no change            -> None
//   - few field operations -> UpdateOne (operators + version increment)
//   - many field operations-> ReplaceOne (whole document, version + 1)
//
// The identity and version fields are skipped at the root only; nested
// fields with the same names are diffed normally.
//
// ============================================================================

use super::array::{self, ArrayChange};
use super::ops::{NumericDelta, UpdateOps};
use super::policy::DiffPolicy;
use crate::core::{DocValue, Document, Result, TrackError, path};
use crate::tracking::TrackedSnapshot;
use crate::write::{UpdateOperation, WriteInstruction};

/// Builds the write instruction converging the stored document to `current`.
///
/// Returns `Ok(None)` when nothing changed.
pub fn build_patch(
    tracked: &TrackedSnapshot,
    mut current: Document,
    policy: &DiffPolicy,
) -> Result<Option<WriteInstruction>> {
    match current.get(&tracked.id_field) {
        Some(id) if id != &tracked.id => {
            return Err(TrackError::IdentityMutated {
                field: tracked.id_field.clone(),
            });
        }
        Some(_) => {}
        None => current.insert_first(tracked.id_field.clone(), tracked.id.clone()),
    }

    let ops = compute_diff(tracked, &current, policy);
    if ops.is_empty() {
        return Ok(None);
    }

    if ops.field_ops_count() > policy.max_field_ops_before_doc_replace {
        return replace_instruction(tracked, current).map(Some);
    }

    let mut update = ops.into_operations();
    update.push(UpdateOperation::Inc {
        path: tracked.version_field.clone(),
        delta: NumericDelta::Int64(1),
    });

    Ok(Some(WriteInstruction::UpdateOne {
        filter: tracked.filter(),
        update,
        upsert: false,
    }))
}

/// Diffs the snapshot against `current` without building an instruction.
pub fn compute_diff(tracked: &TrackedSnapshot, current: &Document, policy: &DiffPolicy) -> UpdateOps {
    let reserved = [tracked.id_field.as_str(), tracked.version_field.as_str()];
    let mut ops = UpdateOps::new();
    diff_document("", &tracked.snapshot, current, &reserved, &mut ops, policy);
    ops
}

fn diff_document(
    prefix: &str,
    original: &Document,
    current: &Document,
    reserved: &[&str],
    ops: &mut UpdateOps,
    policy: &DiffPolicy,
) {
    let skipped = |key: &str| prefix.is_empty() && reserved.contains(&key);

    for key in original.keys() {
        if skipped(key) || current.contains_key(key) {
            continue;
        }

        let field_path = path::join(prefix, key);
        if policy.allows_unset(&field_path) {
            ops.unset(field_path);
        } else {
            ops.set(field_path, DocValue::Null);
        }
    }

    for (key, current_value) in current.iter() {
        if skipped(key) {
            continue;
        }

        let field_path = path::join(prefix, key);
        match original.get(key) {
            None => ops.set(field_path, current_value.clone()),
            Some(original_value) => {
                diff_value(&field_path, original_value, current_value, reserved, ops, policy)
            }
        }
    }
}

fn diff_value(
    field_path: &str,
    original: &DocValue,
    current: &DocValue,
    reserved: &[&str],
    ops: &mut UpdateOps,
    policy: &DiffPolicy,
) {
    if original == current {
        return;
    }

    match (original, current) {
        (DocValue::Document(o), DocValue::Document(c)) => {
            diff_document(field_path, o, c, reserved, ops, policy);
        }
        (DocValue::Array(o), DocValue::Array(c)) => diff_array(field_path, o, c, ops),
        _ if policy.allows_inc(field_path) => diff_increment(field_path, original, current, ops),
        _ => ops.set(field_path, current.clone()),
    }
}

fn diff_array(field_path: &str, original: &[DocValue], current: &[DocValue], ops: &mut UpdateOps) {
    match array::classify(original, current) {
        ArrayChange::Unchanged => {}
        ArrayChange::Append(appended) => {
            if !appended.is_empty() {
                ops.push(field_path, appended.to_vec());
            }
        }
        ArrayChange::Remove(removed) => {
            ops.pull(field_path, removed.into_iter().cloned().collect());
        }
        // Per-index patches are unsound under concurrent shifts; rewrite the
        // whole array regardless of how much of it changed.
        ArrayChange::Mixed { .. } => {
            ops.set(field_path, DocValue::Array(current.to_vec()));
        }
    }
}

fn diff_increment(field_path: &str, original: &DocValue, current: &DocValue, ops: &mut UpdateOps) {
    let Some(delta) = NumericDelta::between(original, current) else {
        ops.set(field_path, current.clone());
        return;
    };

    if ops.add_increment(field_path, delta).is_err() {
        ops.set(field_path, current.clone());
    }
}

fn replace_instruction(tracked: &TrackedSnapshot, mut current: Document) -> Result<WriteInstruction> {
    let next_version = tracked
        .expected_version
        .checked_add(1)
        .ok_or_else(|| TrackError::InvalidVersion {
            field: tracked.version_field.clone(),
        })?;

    current.remove(&tracked.id_field);
    current.remove(&tracked.version_field);
    current.insert_first(tracked.id_field.clone(), tracked.id.clone());
    current.insert(tracked.version_field.clone(), DocValue::Int64(next_version));

    Ok(WriteInstruction::ReplaceOne {
        filter: tracked.filter(),
        replacement: current,
        upsert: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn tracked(snapshot: Document, expected_version: i64) -> TrackedSnapshot {
        let id = snapshot.get("_id").cloned().unwrap();
        TrackedSnapshot {
            id_field: "_id".into(),
            version_field: "version".into(),
            id,
            expected_version,
            snapshot,
        }
    }

    fn player() -> Document {
        doc! {
            "_id" => "p1",
            "version" => 0i64,
            "level" => 1,
            "gold" => 100i64,
            "items" => vec!["a", "b"],
        }
    }

    fn update_ops(instruction: WriteInstruction) -> Vec<UpdateOperation> {
        match instruction {
            WriteInstruction::UpdateOne { update, upsert, .. } => {
                assert!(!upsert);
                update
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_documents_produce_nothing() {
        let t = tracked(player(), 0);
        assert_eq!(build_patch(&t, player(), &DiffPolicy::default()).unwrap(), None);
    }

    #[test]
    fn test_root_version_change_is_ignored() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.insert("version", 9i64);
        assert_eq!(build_patch(&t, current, &DiffPolicy::default()).unwrap(), None);
    }

    #[test]
    fn test_identity_mutation_fails() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.insert("_id", "p2");
        let err = build_patch(&t, current, &DiffPolicy::default()).unwrap_err();
        assert!(matches!(err, TrackError::IdentityMutated { field } if field == "_id"));
    }

    #[test]
    fn test_set_and_version_increment() {
        let t = tracked(player(), 4);
        let mut current = player();
        current.insert("level", 2);

        let instruction = build_patch(&t, current, &DiffPolicy::default()).unwrap().unwrap();
        assert_eq!(instruction.filter().version, 4);
        assert_eq!(
            update_ops(instruction),
            vec![
                UpdateOperation::Set { path: "level".into(), value: DocValue::Int32(2) },
                UpdateOperation::Inc { path: "version".into(), delta: NumericDelta::Int64(1) },
            ]
        );
    }

    #[test]
    fn test_increment_when_allowed() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.insert("gold", 90i64);

        let ops = compute_diff(&t, &current, &DiffPolicy::with_inc(["gold"]));
        assert_eq!(ops.incs().get("gold"), Some(&NumericDelta::Int64(-10)));
        assert!(ops.sets().is_empty());
    }

    #[test]
    fn test_width_change_falls_back_to_set() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.insert("level", 5i64);

        let ops = compute_diff(&t, &current, &DiffPolicy::with_inc(["level"]));
        assert!(ops.incs().is_empty());
        assert_eq!(ops.sets().get("level"), Some(&DocValue::Int64(5)));
    }

    #[test]
    fn test_double_with_inc_allowed_is_set() {
        let t = tracked(doc! { "_id" => "p1", "version" => 0i64, "ratio" => 0.5 }, 0);
        let current = doc! { "_id" => "p1", "version" => 0i64, "ratio" => 0.75 };
        let ops = compute_diff(&t, &current, &DiffPolicy::with_inc(["ratio"]));
        assert_eq!(ops.sets().get("ratio"), Some(&DocValue::Double(0.75)));
    }

    #[test]
    fn test_removed_field_unset_or_null() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.remove("level");

        let ops = compute_diff(&t, &current, &DiffPolicy::default());
        assert!(ops.unsets().contains("level"));

        let keep_null = DiffPolicy::new().allow_unset_path(|_| false);
        let ops = compute_diff(&t, &current, &keep_null);
        assert_eq!(ops.sets().get("level"), Some(&DocValue::Null));
    }

    #[test]
    fn test_nested_documents_recurse() {
        let mut original = player();
        original.insert("stats", doc! { "hp" => 10, "mp" => 5, "version" => 1 });
        let t = tracked(original.clone(), 0);

        let mut current = original;
        current.insert("stats", doc! { "hp" => 12, "mp" => 5, "version" => 2 });

        let ops = compute_diff(&t, &current, &DiffPolicy::default());
        assert_eq!(ops.sets().get("stats.hp"), Some(&DocValue::Int32(12)));
        // Only the root-level version field is reserved.
        assert_eq!(ops.sets().get("stats.version"), Some(&DocValue::Int32(2)));
        assert_eq!(ops.field_ops_count(), 2);
    }

    #[test]
    fn test_array_append_push_each() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.insert("items", vec!["a", "b", "c", "d"]);

        let ops = compute_diff(&t, &current, &DiffPolicy::default());
        assert_eq!(
            ops.pushes().get("items"),
            Some(&vec![DocValue::from("c"), DocValue::from("d")])
        );
    }

    #[test]
    fn test_array_partial_duplicate_removal_replaces_array() {
        let mut original = player();
        original.insert("items", vec!["a", "b", "a"]);
        let t = tracked(original.clone(), 0);
        let mut current = original;
        current.insert("items", vec!["a", "b"]);

        let ops = compute_diff(&t, &current, &DiffPolicy::default());
        assert!(ops.pulls().is_empty());
        assert_eq!(ops.sets().get("items"), Some(&DocValue::from(vec!["a", "b"])));
    }

    #[test]
    fn test_replace_when_over_ceiling() {
        let t = tracked(player(), 3);
        let mut current = player();
        current.insert("level", 99);
        current.insert("gold", 1i64);

        let policy = DiffPolicy::new().max_field_ops_before_doc_replace(1);
        let instruction = build_patch(&t, current, &policy).unwrap().unwrap();
        let WriteInstruction::ReplaceOne { filter, replacement, upsert } = instruction else {
            panic!("expected replace");
        };
        assert!(!upsert);
        assert_eq!(filter.version, 3);
        assert_eq!(replacement.keys().next(), Some("_id"));
        assert_eq!(replacement.get("_id"), Some(&DocValue::from("p1")));
        assert_eq!(replacement.get("version"), Some(&DocValue::Int64(4)));
        assert_eq!(replacement.get("level"), Some(&DocValue::Int32(99)));
    }

    #[test]
    fn test_ceiling_is_exclusive() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.insert("level", 2);

        let policy = DiffPolicy::new().max_field_ops_before_doc_replace(1);
        let instruction = build_patch(&t, current, &policy).unwrap().unwrap();
        assert!(!instruction.is_replace());
    }

    #[test]
    fn test_missing_identity_is_restored() {
        let t = tracked(player(), 0);
        let mut current = player();
        current.remove("_id");
        current.insert("level", 3);

        let policy = DiffPolicy::new().max_field_ops_before_doc_replace(0);
        let instruction = build_patch(&t, current, &policy).unwrap().unwrap();
        let WriteInstruction::ReplaceOne { replacement, .. } = instruction else {
            panic!("expected replace");
        };
        assert_eq!(replacement.get("_id"), Some(&DocValue::from("p1")));
    }
}
