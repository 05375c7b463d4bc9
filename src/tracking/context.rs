// ============================================================================
// Tracking Context
// ============================================================================
//
// Unit of work over tracked entities:
//
//   attach*  -> snapshot + identity/version captured, duplicates rejected
//   save     -> diff every entry, group writes by destination, bulk write
//               each group (retrying transient failures), optionally inside
//               one transaction, then compare requested vs matched
//
// A save always drains the context, whatever its outcome.
//
// ============================================================================

use super::cancel::CancellationSignal;
use super::entry::{TrackedEntry, TrackedSnapshot, TrackingEntry, TrackingHandle};
use super::logger::RunLogger;
use super::options::SaveChangesOptions;
use super::registry::TrackingRegistry;
use crate::core::{DocValue, Result, TrackError, to_document};
use crate::diff::{DiffPolicy, build_patch};
use crate::driver::{ClientSession, DocumentCollection};
use crate::write::{BulkWriteResult, WriteInstruction};
use indexmap::IndexMap;
use serde::Serialize;
use std::any::{TypeId, type_name};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Writes bound for one destination collection, in attach order.
struct WriteGroup {
    collection: Arc<dyn DocumentCollection>,
    writes: Vec<WriteInstruction>,
}

/// Tracks entities read from document collections and persists their
/// changes with optimistic concurrency.
///
/// A context belongs to one logical unit of work. `save_changes` takes
/// `&mut self`, so a single owner drives it.
///
/// # Examples
///
/// ```
/// use doctrack::prelude::*;
/// use serde::Serialize;
/// use std::sync::{Arc, RwLock};
///
/// #[derive(Serialize)]
/// struct Player {
///     #[serde(rename = "_id")]
///     id: String,
///     version: i64,
///     level: i32,
/// }
///
/// # #[tokio::main]
/// # async fn main() -> doctrack::Result<()> {
/// let registry = Arc::new(TrackingRegistry::new());
/// registry.register::<Player>("_id", "version")?;
///
/// let client = InMemoryClient::new();
/// let players = client.collection("game", "players");
/// players.insert_one(doc! { "_id" => "p1", "version" => 0i64, "level" => 1 }).await;
///
/// let player = Arc::new(RwLock::new(Player { id: "p1".into(), version: 0, level: 1 }));
/// let mut ctx = TrackingContext::with_registry(registry);
/// let handle = ctx.attach(&players, &player, None)?;
/// handle.modify(|p| p.level = 2)?;
///
/// let changed = ctx.save_changes_default(&DiffPolicy::default(), &NoopRunLogger).await?;
/// assert_eq!(changed, 1);
/// # Ok(())
/// # }
/// ```
pub struct TrackingContext {
    registry: Arc<TrackingRegistry>,
    entries: Vec<Box<dyn TrackedEntry>>,
    attached: HashSet<(TypeId, DocValue)>,
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingContext {
    /// Context resolving metadata through [`TrackingRegistry::global`].
    pub fn new() -> Self {
        Self::with_registry(TrackingRegistry::global())
    }

    pub fn with_registry(registry: Arc<TrackingRegistry>) -> Self {
        Self {
            registry,
            entries: Vec::new(),
            attached: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TrackingRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts tracking `entity`, stored in `collection`.
    ///
    /// The entity is serialized now; that snapshot is what `save_changes`
    /// diffs against. `expected_version` overrides the version read from the
    /// snapshot.
    pub fn attach<T, C>(
        &mut self,
        collection: &Arc<C>,
        entity: &Arc<RwLock<T>>,
        expected_version: Option<i64>,
    ) -> Result<TrackingHandle<T>>
    where
        T: Serialize + Send + Sync + 'static,
        C: DocumentCollection + 'static,
    {
        let metadata = self.registry.resolve::<T>()?;
        let snapshot = {
            let guard = entity.read()?;
            to_document(&*guard)?
        };
        let tracked =
            TrackedSnapshot::capture(&metadata, type_name::<T>(), snapshot, expected_version)?;

        let key = (TypeId::of::<T>(), tracked.id.clone());
        if self.attached.contains(&key) {
            return Err(TrackError::AlreadyAttached {
                type_name: type_name::<T>().to_string(),
                id: tracked.id.to_string(),
            });
        }

        let collection: Arc<dyn DocumentCollection> = collection.clone();
        let handle = TrackingHandle::new(entity.clone(), &tracked, collection.namespace());

        self.attached.insert(key);
        self.entries.push(Box::new(TrackingEntry {
            tracked,
            entity: entity.clone(),
            collection,
        }));

        Ok(handle)
    }

    /// Saves with default options and no cancellation.
    pub async fn save_changes_default(
        &mut self,
        policy: &DiffPolicy,
        logger: &dyn RunLogger,
    ) -> Result<u64> {
        self.save_changes(policy, logger, SaveChangesOptions::default(), None)
            .await
    }

    /// Persists every change made to attached entities since attach.
    ///
    /// Returns the number of documents written. Fails with
    /// [`TrackError::ConcurrencyConflict`] when some writes no longer
    /// matched their expected version. The context is empty afterwards
    /// in every case.
    pub async fn save_changes(
        &mut self,
        policy: &DiffPolicy,
        logger: &dyn RunLogger,
        options: SaveChangesOptions,
        cancel: Option<&CancellationSignal>,
    ) -> Result<u64> {
        let entries = std::mem::take(&mut self.entries);
        self.attached.clear();

        if entries.is_empty() {
            return Ok(0);
        }

        let result = save_entries(&entries, policy, logger, &options, cancel).await;
        if let Err(err) = &result {
            logger.error(&format!("SaveChanges failed: {err}"));
        }
        result
    }
}

async fn save_entries(
    entries: &[Box<dyn TrackedEntry>],
    policy: &DiffPolicy,
    logger: &dyn RunLogger,
    options: &SaveChangesOptions,
    cancel: Option<&CancellationSignal>,
) -> Result<u64> {
    let groups = plan_writes(entries, policy)?;
    let Some(first) = groups.values().next() else {
        return Ok(0);
    };

    let mut session = if options.use_transaction {
        let mut session = first.collection.client().start_session().await?;
        session.start_transaction().await?;
        Some(session)
    } else {
        None
    };

    let outcome = match write_groups(&groups, &mut session, logger, options, cancel).await {
        Ok(counts) => match session.as_mut() {
            Some(session) => session
                .commit_transaction()
                .await
                .map(|()| counts)
                .map_err(TrackError::from),
            None => Ok(counts),
        },
        Err(err) => Err(err),
    };

    let (requested, matched) = match outcome {
        Ok(counts) => counts,
        Err(err) => {
            if let Some(session) = session.as_mut()
                && session.in_transaction()
                && let Err(abort_err) = session.abort_transaction().await
            {
                logger.warn(&format!("Transaction abort failed: {abort_err}"));
            }
            return Err(err);
        }
    };

    if requested > matched {
        return Err(TrackError::ConcurrencyConflict {
            conflicts: requested - matched,
        });
    }

    Ok(requested)
}

/// Diffs every entry and groups the resulting writes by namespace.
fn plan_writes(
    entries: &[Box<dyn TrackedEntry>],
    policy: &DiffPolicy,
) -> Result<IndexMap<String, WriteGroup>> {
    let mut groups: IndexMap<String, WriteGroup> = IndexMap::new();
    let mut seen: HashSet<(String, DocValue)> = HashSet::new();

    for entry in entries {
        let tracked = entry.tracked();
        let current = entry.current_document()?;
        let Some(write) = build_patch(tracked, current, policy)? else {
            continue;
        };

        let namespace = entry.collection().namespace().to_string();
        if !seen.insert((namespace.clone(), tracked.id.clone())) {
            return Err(TrackError::DuplicateDocument {
                namespace,
                id: tracked.id.to_string(),
            });
        }

        groups
            .entry(namespace)
            .or_insert_with(|| WriteGroup {
                collection: entry.collection().clone(),
                writes: Vec::new(),
            })
            .writes
            .push(write);
    }

    Ok(groups)
}

/// Runs every group in order; returns `(requested, matched)`.
async fn write_groups(
    groups: &IndexMap<String, WriteGroup>,
    session: &mut Option<Box<dyn ClientSession>>,
    logger: &dyn RunLogger,
    options: &SaveChangesOptions,
    cancel: Option<&CancellationSignal>,
) -> Result<(u64, u64)> {
    let mut requested = 0u64;
    let mut matched = 0u64;

    for (namespace, group) in groups {
        if cancel.is_some_and(CancellationSignal::is_cancelled) {
            return Err(TrackError::Cancelled);
        }

        let result = write_group(namespace, group, session, logger, options, cancel).await?;
        logger.info(&format!(
            "BulkWrite OK {namespace} req={} matched={} modified={}",
            group.writes.len(),
            result.matched,
            result.modified
        ));

        requested += group.writes.len() as u64;
        matched += result.matched;
    }

    Ok((requested, matched))
}

async fn write_group(
    namespace: &str,
    group: &WriteGroup,
    session: &mut Option<Box<dyn ClientSession>>,
    logger: &dyn RunLogger,
    options: &SaveChangesOptions,
    cancel: Option<&CancellationSignal>,
) -> Result<BulkWriteResult> {
    let bulk_options = options.bulk_write_options();
    let mut attempt = 0u32;

    loop {
        let outcome = match session.as_mut() {
            Some(session) => {
                group
                    .collection
                    .bulk_write(Some(session.as_mut()), &group.writes, bulk_options)
                    .await
            }
            None => {
                group
                    .collection
                    .bulk_write(None, &group.writes, bulk_options)
                    .await
            }
        };

        match outcome {
            Ok(result) => return Ok(result),
            Err(err) if err.is_transient() && attempt < options.max_retries => {
                attempt += 1;
                let delay = options.retry_delay(attempt);
                logger.warn(&format!(
                    "Transient error on {namespace} (retry {attempt}/{}, waiting {}ms): {err}",
                    options.max_retries,
                    delay.as_millis()
                ));
                backoff(delay, cancel).await?;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn backoff(delay: Duration, cancel: Option<&CancellationSignal>) -> Result<()> {
    match cancel {
        Some(signal) => tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = signal.cancelled() => Err(TrackError::Cancelled),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::driver::{DriverError, InMemoryClient};
    use crate::tracking::NoopRunLogger;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Item {
        #[serde(rename = "_id")]
        id: i64,
        version: i64,
        qty: i32,
    }

    #[derive(Serialize)]
    struct OtherItem {
        #[serde(rename = "_id")]
        id: i64,
        version: i64,
        label: String,
    }

    fn registry() -> Arc<TrackingRegistry> {
        let registry = Arc::new(TrackingRegistry::new());
        registry.register::<Item>("_id", "version").unwrap();
        registry.register::<OtherItem>("_id", "version").unwrap();
        registry
    }

    fn item(id: i64, qty: i32) -> Arc<RwLock<Item>> {
        Arc::new(RwLock::new(Item { id, version: 0, qty }))
    }

    #[test]
    fn test_attach_rejects_duplicates() {
        let client = InMemoryClient::new();
        let items = client.collection("shop", "items");
        let mut ctx = TrackingContext::with_registry(registry());

        ctx.attach(&items, &item(1, 1), None).unwrap();
        let err = ctx.attach(&items, &item(1, 5), None).unwrap_err();
        assert!(matches!(err, TrackError::AlreadyAttached { .. }));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_attach_untracked_type() {
        let client = InMemoryClient::new();
        let items = client.collection("shop", "items");
        let mut ctx = TrackingContext::with_registry(Arc::new(TrackingRegistry::new()));

        let err = ctx.attach(&items, &item(1, 1), None).unwrap_err();
        assert!(matches!(err, TrackError::UntrackedType(_)));
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_same_document_through_two_types_is_rejected_at_save() {
        let client = InMemoryClient::new();
        let items = client.collection("shop", "items");
        items.insert_one(doc! { "_id" => 1i64, "version" => 0i64, "qty" => 1 }).await;

        let mut ctx = TrackingContext::with_registry(registry());
        let first = ctx.attach(&items, &item(1, 1), None).unwrap();
        let other = Arc::new(RwLock::new(OtherItem { id: 1, version: 0, label: "a".into() }));
        let second = ctx.attach(&items, &other, None).unwrap();

        first.modify(|i| i.qty = 2).unwrap();
        second.modify(|o| o.label = "b".into()).unwrap();
        let err = ctx
            .save_changes_default(&DiffPolicy::default(), &NoopRunLogger)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::DuplicateDocument { .. }));
        assert!(ctx.is_empty());
        assert_eq!(client.bulk_write_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_context_saves_nothing() {
        let mut ctx = TrackingContext::with_registry(registry());
        let saved = ctx
            .save_changes_default(&DiffPolicy::default(), &NoopRunLogger)
            .await
            .unwrap();
        assert_eq!(saved, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_propagates_last_error() {
        let client = InMemoryClient::new();
        let items = client.collection("shop", "items");
        items.insert_one(doc! { "_id" => 1i64, "version" => 0i64, "qty" => 1 }).await;
        for _ in 0..3 {
            items.fail_next(DriverError::ExecutionTimeout("slow".into()));
        }

        let mut ctx = TrackingContext::with_registry(registry());
        let handle = ctx.attach(&items, &item(1, 1), None).unwrap();
        handle.modify(|i| i.qty = 3).unwrap();

        let options = SaveChangesOptions::new().retry_base_delay_ms(1);
        let err = ctx
            .save_changes(&DiffPolicy::default(), &NoopRunLogger, options, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::Driver(DriverError::ExecutionTimeout(_))));
        assert_eq!(client.bulk_write_calls(), 3);
    }
}
