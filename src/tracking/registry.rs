use crate::core::{Result, TrackError};
use lazy_static::lazy_static;
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<TrackingRegistry> = Arc::new(TrackingRegistry::new());
}

/// Names of the identity and version fields of a tracked type, as they
/// appear in its serialized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingMetadata {
    pub id_field: String,
    pub version_field: String,
}

impl TrackingMetadata {
    pub fn new(id_field: impl Into<String>, version_field: impl Into<String>) -> Result<Self> {
        let id_field = id_field.into();
        let version_field = version_field.into();

        if id_field.is_empty() || version_field.is_empty() {
            return Err(TrackError::InvalidMetadata(
                "identity and version field names cannot be empty".into(),
            ));
        }
        if id_field == version_field {
            return Err(TrackError::InvalidMetadata(format!(
                "identity and version fields must differ (both are `{id_field}`)"
            )));
        }

        Ok(Self {
            id_field,
            version_field,
        })
    }
}

/// Per-type tracking metadata, registered once at startup and consulted on
/// every attach.
#[derive(Debug, Default)]
pub struct TrackingRegistry {
    types: RwLock<HashMap<TypeId, TrackingMetadata>>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by `TrackingContext::new`.
    pub fn global() -> Arc<TrackingRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Registers (or re-registers) `T`.
    pub fn register<T: 'static>(
        &self,
        id_field: impl Into<String>,
        version_field: impl Into<String>,
    ) -> Result<()> {
        let metadata = TrackingMetadata::new(id_field, version_field)?;
        self.types.write()?.insert(TypeId::of::<T>(), metadata);
        Ok(())
    }

    pub fn resolve<T: 'static>(&self) -> Result<TrackingMetadata> {
        self.types
            .read()?
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| TrackError::UntrackedType(type_name::<T>().to_string()))
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.types
            .read()
            .is_ok_and(|types| types.contains_key(&TypeId::of::<T>()))
    }

    pub fn unregister<T: 'static>(&self) -> Result<bool> {
        Ok(self.types.write()?.remove(&TypeId::of::<T>()).is_some())
    }

    pub fn len(&self) -> usize {
        self.types.read().map_or(0, |types| types.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
