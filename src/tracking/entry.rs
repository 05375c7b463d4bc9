use super::registry::TrackingMetadata;
use crate::core::{DocValue, Document, Result, TrackError, to_document};
use crate::driver::DocumentCollection;
use crate::write::Filter;
use serde::Serialize;
use std::any::type_name;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// What was read at attach time: identity, expected version and the full
/// document snapshot the diff runs against.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedSnapshot {
    pub id_field: String,
    pub version_field: String,
    pub id: DocValue,
    pub expected_version: i64,
    pub snapshot: Document,
}

impl TrackedSnapshot {
    /// Reads identity and version out of `snapshot`.
    ///
    /// An explicit `expected_version` wins over the stored field; otherwise
    /// the field must hold a non-negative 32- or 64-bit integer.
    pub fn capture(
        metadata: &TrackingMetadata,
        type_name: &str,
        snapshot: Document,
        expected_version: Option<i64>,
    ) -> Result<Self> {
        let id = match snapshot.get(&metadata.id_field) {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                return Err(TrackError::MissingIdentity {
                    type_name: type_name.to_string(),
                    field: metadata.id_field.clone(),
                });
            }
        };

        let expected_version = match expected_version {
            Some(version) => version,
            None => snapshot
                .get(&metadata.version_field)
                .and_then(DocValue::as_i64)
                .ok_or_else(|| TrackError::InvalidVersion {
                    field: metadata.version_field.clone(),
                })?,
        };
        if expected_version < 0 {
            return Err(TrackError::InvalidVersion {
                field: metadata.version_field.clone(),
            });
        }

        Ok(Self {
            id_field: metadata.id_field.clone(),
            version_field: metadata.version_field.clone(),
            id,
            expected_version,
            snapshot,
        })
    }

    /// Identity + expected-version filter every write for this entry uses.
    pub fn filter(&self) -> Filter {
        Filter::new(
            self.id_field.clone(),
            self.id.clone(),
            self.version_field.clone(),
            self.expected_version,
        )
    }
}

/// Type-erased view of an entry, so one context can hold many entity types.
pub(crate) trait TrackedEntry: Send + Sync {
    fn tracked(&self) -> &TrackedSnapshot;

    fn collection(&self) -> &Arc<dyn DocumentCollection>;

    /// Serializes the entity as it is now.
    fn current_document(&self) -> Result<Document>;
}

pub(crate) struct TrackingEntry<T> {
    pub(crate) tracked: TrackedSnapshot,
    pub(crate) entity: Arc<RwLock<T>>,
    pub(crate) collection: Arc<dyn DocumentCollection>,
}

impl<T> TrackedEntry for TrackingEntry<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn tracked(&self) -> &TrackedSnapshot {
        &self.tracked
    }

    fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    fn current_document(&self) -> Result<Document> {
        let entity = self.entity.read()?;
        to_document(&*entity).map_err(|err| match err {
            TrackError::Serialization(message) => TrackError::Serialization(format!(
                "{} ({}): {message}",
                type_name::<T>(),
                self.tracked.id
            )),
            other => other,
        })
    }
}

/// Returned by `attach`; shares the entity with the context.
#[derive(Debug)]
pub struct TrackingHandle<T> {
    entity: Arc<RwLock<T>>,
    id: DocValue,
    expected_version: i64,
    namespace: String,
}

impl<T> Clone for TrackingHandle<T> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            id: self.id.clone(),
            expected_version: self.expected_version,
            namespace: self.namespace.clone(),
        }
    }
}

impl<T> TrackingHandle<T> {
    pub(crate) fn new(entity: Arc<RwLock<T>>, tracked: &TrackedSnapshot, namespace: &str) -> Self {
        Self {
            entity,
            id: tracked.id.clone(),
            expected_version: tracked.expected_version,
            namespace: namespace.to_string(),
        }
    }

    pub fn id(&self) -> &DocValue {
        &self.id
    }

    pub fn expected_version(&self) -> i64 {
        self.expected_version
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entity(&self) -> &Arc<RwLock<T>> {
        &self.entity
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>> {
        Ok(self.entity.read()?)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>> {
        Ok(self.entity.write()?)
    }

    /// Runs `f` against the entity under its write lock.
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut entity = self.entity.write()?;
        Ok(f(&mut entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn metadata() -> TrackingMetadata {
        TrackingMetadata::new("_id", "version").unwrap()
    }

    #[test]
    fn test_capture_reads_stored_version() {
        let snapshot = doc! { "_id" => "p1", "version" => 7 };
        let tracked = TrackedSnapshot::capture(&metadata(), "Player", snapshot, None).unwrap();
        assert_eq!(tracked.expected_version, 7);
        assert_eq!(tracked.id, DocValue::from("p1"));
        assert_eq!(tracked.filter(), Filter::new("_id", DocValue::from("p1"), "version", 7));
    }

    #[test]
    fn test_explicit_version_wins() {
        let snapshot = doc! { "_id" => "p1", "version" => 7i64 };
        let tracked = TrackedSnapshot::capture(&metadata(), "Player", snapshot, Some(3)).unwrap();
        assert_eq!(tracked.expected_version, 3);
    }

    #[test]
    fn test_missing_or_null_identity() {
        for snapshot in [doc! { "version" => 1 }, doc! { "_id" => DocValue::Null, "version" => 1 }] {
            let err = TrackedSnapshot::capture(&metadata(), "Player", snapshot, None).unwrap_err();
            assert!(matches!(err, TrackError::MissingIdentity { .. }));
        }
    }

    #[test]
    fn test_invalid_versions() {
        let cases = [
            (doc! { "_id" => 1 }, None),
            (doc! { "_id" => 1, "version" => "7" }, None),
            (doc! { "_id" => 1, "version" => 1.5 }, None),
            (doc! { "_id" => 1, "version" => -1i64 }, None),
            (doc! { "_id" => 1, "version" => 1i64 }, Some(-2)),
        ];
        for (snapshot, explicit) in cases {
            let err = TrackedSnapshot::capture(&metadata(), "Player", snapshot, explicit).unwrap_err();
            assert!(matches!(err, TrackError::InvalidVersion { field } if field == "version"));
        }
    }
}
