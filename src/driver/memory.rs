// ============================================================================
// In-Memory Driver
// ============================================================================
//
// Process-local document store implementing the driver traits. Useful as a
// test double and as a reference for the semantics the tracking context
// relies on:
//
// - filtered single-document writes reporting matched / modified counts
// - ordered batches stop at the first failing write, unordered ones don't
// - transactions: the session holds the store lock and a staged copy;
//   commit publishes the copy, abort (or drop) discards it
// - fault injection for exercising retry paths
//
// ============================================================================

use super::apply::apply_operation;
use super::{
    ClientSession, DocumentClient, DocumentCollection, DriverError, DriverResult, WriteError,
};
use crate::core::{DocValue, Document};
use crate::write::{BulkWriteOptions, BulkWriteResult, Filter, WriteInstruction};
use async_trait::async_trait;
use log::{debug, warn};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct StoreState {
    collections: HashMap<String, Vec<Document>>,
}

#[derive(Default)]
struct ClientShared {
    state: Arc<Mutex<StoreState>>,
    faults: StdMutex<HashMap<String, VecDeque<DriverError>>>,
    bulk_write_calls: AtomicU64,
    sessions_started: AtomicU64,
}

/// Handle to an in-memory store. Cloning shares the store.
#[derive(Clone, Default)]
pub struct InMemoryClient {
    shared: Arc<ClientShared>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, database: &str, name: &str) -> Arc<InMemoryCollection> {
        Arc::new(InMemoryCollection {
            namespace: format!("{database}.{name}"),
            client: self.clone(),
        })
    }

    /// Number of `bulk_write` calls received, including failed attempts.
    pub fn bulk_write_calls(&self) -> u64 {
        self.shared.bulk_write_calls.load(Ordering::Relaxed)
    }

    pub fn sessions_started(&self) -> u64 {
        self.shared.sessions_started.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentClient for InMemoryClient {
    async fn start_session(&self) -> DriverResult<Box<dyn ClientSession>> {
        self.shared.sessions_started.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(InMemorySession {
            shared: self.shared.clone(),
            transaction: None,
        }))
    }
}

pub struct InMemoryCollection {
    namespace: String,
    client: InMemoryClient,
}

impl InMemoryCollection {
    pub async fn insert_one(&self, doc: Document) {
        let mut state = self.client.shared.state.lock().await;
        state
            .collections
            .entry(self.namespace.clone())
            .or_default()
            .push(doc);
    }

    pub async fn insert_many(&self, docs: impl IntoIterator<Item = Document>) {
        let mut state = self.client.shared.state.lock().await;
        state
            .collections
            .entry(self.namespace.clone())
            .or_default()
            .extend(docs);
    }

    /// First stored document whose `field` equals `value`.
    pub async fn find_one(&self, field: &str, value: &DocValue) -> Option<Document> {
        let state = self.client.shared.state.lock().await;
        state
            .collections
            .get(&self.namespace)?
            .iter()
            .find(|doc| doc.get(field).is_some_and(|v| v.filter_eq(value)))
            .cloned()
    }

    pub async fn documents(&self) -> Vec<Document> {
        let state = self.client.shared.state.lock().await;
        state
            .collections
            .get(&self.namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count(&self) -> usize {
        let state = self.client.shared.state.lock().await;
        state.collections.get(&self.namespace).map_or(0, Vec::len)
    }

    /// Makes the next `bulk_write` on this collection fail with `error`.
    /// Calls queue up: each injected error is consumed by one call.
    pub fn fail_next(&self, error: DriverError) {
        let mut faults = self
            .client
            .shared
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        faults
            .entry(self.namespace.clone())
            .or_default()
            .push_back(error);
    }

    fn take_fault(&self) -> Option<DriverError> {
        let mut faults = self
            .client
            .shared
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        faults.get_mut(&self.namespace)?.pop_front()
    }
}

#[async_trait]
impl DocumentCollection for InMemoryCollection {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn client(&self) -> Arc<dyn DocumentClient> {
        Arc::new(self.client.clone())
    }

    async fn bulk_write(
        &self,
        session: Option<&mut dyn ClientSession>,
        writes: &[WriteInstruction],
        options: BulkWriteOptions,
    ) -> DriverResult<BulkWriteResult> {
        self.client
            .shared
            .bulk_write_calls
            .fetch_add(1, Ordering::Relaxed);

        if let Some(fault) = self.take_fault() {
            warn!(
                "injected fault on '{}': {} ({} write(s) not applied)",
                self.namespace,
                fault,
                writes.len()
            );
            return Err(fault);
        }

        let Some(session) = session else {
            let mut state = self.client.shared.state.lock().await;
            return apply_batch(&mut state, &self.namespace, writes, options);
        };

        let session = session
            .as_any_mut()
            .downcast_mut::<InMemorySession>()
            .ok_or_else(|| {
                DriverError::Session("session was not started by an in-memory client".into())
            })?;

        if !Arc::ptr_eq(&session.shared, &self.client.shared) {
            return Err(DriverError::Session(format!(
                "session belongs to a different client than '{}'",
                self.namespace
            )));
        }

        match session.transaction.as_mut() {
            Some(transaction) => apply_batch(&mut transaction.staged, &self.namespace, writes, options),
            None => {
                let mut state = self.client.shared.state.lock().await;
                apply_batch(&mut state, &self.namespace, writes, options)
            }
        }
    }
}

struct PendingTransaction {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
}

/// Session over an [`InMemoryClient`].
///
/// While a transaction is open the session owns the store lock, so other
/// writers wait until commit or abort. Dropping the session aborts.
pub struct InMemorySession {
    shared: Arc<ClientShared>,
    transaction: Option<PendingTransaction>,
}

#[async_trait]
impl ClientSession for InMemorySession {
    async fn start_transaction(&mut self) -> DriverResult<()> {
        if self.transaction.is_some() {
            return Err(DriverError::Transaction(
                "transaction already in progress".into(),
            ));
        }

        let guard = self.shared.state.clone().lock_owned().await;
        let staged = (*guard).clone();
        self.transaction = Some(PendingTransaction { guard, staged });
        Ok(())
    }

    async fn commit_transaction(&mut self) -> DriverResult<()> {
        let PendingTransaction { mut guard, staged } = self
            .transaction
            .take()
            .ok_or_else(|| DriverError::Transaction("no transaction in progress".into()))?;
        *guard = staged;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> DriverResult<()> {
        self.transaction
            .take()
            .map(drop)
            .ok_or_else(|| DriverError::Transaction("no transaction in progress".into()))
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn apply_batch(
    state: &mut StoreState,
    namespace: &str,
    writes: &[WriteInstruction],
    options: BulkWriteOptions,
) -> DriverResult<BulkWriteResult> {
    let docs = state.collections.entry(namespace.to_string()).or_default();
    let mut result = BulkWriteResult::default();
    let mut errors = Vec::new();

    for (index, write) in writes.iter().enumerate() {
        match apply_write(docs, write) {
            Ok((matched, modified)) => {
                result.matched += matched;
                result.modified += modified;
            }
            Err(message) => {
                errors.push(WriteError { index, message });
                if options.ordered {
                    break;
                }
            }
        }
    }

    debug!(
        "bulk write on '{}': req={} matched={} modified={} errors={}",
        namespace,
        writes.len(),
        result.matched,
        result.modified,
        errors.len()
    );

    if errors.is_empty() {
        Ok(result)
    } else {
        Err(DriverError::WriteErrors {
            matched: result.matched,
            modified: result.modified,
            errors,
        })
    }
}

fn upsert_seed(filter: &Filter) -> Document {
    let mut doc = Document::new();
    doc.insert(filter.id_field.clone(), filter.id.clone());
    doc.insert(filter.version_field.clone(), DocValue::Int64(filter.version));
    doc
}

/// Applies one write; returns `(matched, modified)`.
fn apply_write(docs: &mut Vec<Document>, write: &WriteInstruction) -> Result<(u64, u64), String> {
    match write {
        WriteInstruction::UpdateOne {
            filter,
            update,
            upsert,
        } => {
            let Some(doc) = docs.iter_mut().find(|doc| filter.matches(doc)) else {
                if *upsert {
                    let mut seeded = upsert_seed(filter);
                    for operation in update {
                        apply_operation(&mut seeded, operation)?;
                    }
                    docs.push(seeded);
                }
                return Ok((0, 0));
            };

            // Operators apply to a copy so a failing operator leaves the
            // stored document untouched.
            let mut updated = doc.clone();
            for operation in update {
                apply_operation(&mut updated, operation)?;
            }
            let modified = updated != *doc;
            *doc = updated;
            Ok((1, u64::from(modified)))
        }
        WriteInstruction::ReplaceOne {
            filter,
            replacement,
            upsert,
        } => {
            if let Some(id) = replacement.get(&filter.id_field)
                && !id.filter_eq(&filter.id)
            {
                return Err(format!(
                    "replacement cannot change the `{}` field",
                    filter.id_field
                ));
            }

            let mut replacement = replacement.clone();
            if !replacement.contains_key(&filter.id_field) {
                replacement.insert_first(filter.id_field.clone(), filter.id.clone());
            }

            let Some(doc) = docs.iter_mut().find(|doc| filter.matches(doc)) else {
                if *upsert {
                    docs.push(replacement);
                }
                return Ok((0, 0));
            };

            let modified = *doc != replacement;
            *doc = replacement;
            Ok((1, u64::from(modified)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::NumericDelta;
    use crate::doc;
    use crate::write::UpdateOperation;

    fn bump(id: &str, version: i64) -> WriteInstruction {
        WriteInstruction::UpdateOne {
            filter: Filter::new("_id", DocValue::from(id), "version", version),
            update: vec![UpdateOperation::Inc {
                path: "version".into(),
                delta: NumericDelta::Int64(1),
            }],
            upsert: false,
        }
    }

    #[tokio::test]
    async fn test_bulk_write_counts_matches() {
        let client = InMemoryClient::new();
        let players = client.collection("game", "players");
        players
            .insert_many(vec![
                doc! { "_id" => "a", "version" => 0i64 },
                doc! { "_id" => "b", "version" => 5i64 },
            ])
            .await;

        let result = players
            .bulk_write(None, &[bump("a", 0), bump("b", 0)], BulkWriteOptions::default())
            .await
            .unwrap();

        assert_eq!(result, BulkWriteResult { matched: 1, modified: 1 });
        let a = players.find_one("_id", &DocValue::from("a")).await.unwrap();
        assert_eq!(a.get("version"), Some(&DocValue::Int64(1)));
    }

    #[tokio::test]
    async fn test_ordered_batch_stops_at_first_error() {
        let client = InMemoryClient::new();
        let players = client.collection("game", "players");
        players
            .insert_many(vec![
                doc! { "_id" => "a", "version" => 0i64, "name" => "x" },
                doc! { "_id" => "b", "version" => 0i64 },
            ])
            .await;

        let broken = WriteInstruction::UpdateOne {
            filter: Filter::new("_id", DocValue::from("a"), "version", 0),
            update: vec![UpdateOperation::Inc {
                path: "name".into(),
                delta: NumericDelta::Int32(1),
            }],
            upsert: false,
        };

        let err = players
            .bulk_write(None, &[broken.clone(), bump("b", 0)], BulkWriteOptions { ordered: true })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::WriteErrors { matched: 0, .. }));

        let err = players
            .bulk_write(None, &[broken, bump("b", 0)], BulkWriteOptions { ordered: false })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::WriteErrors { matched: 1, .. }));

        let a = players.find_one("_id", &DocValue::from("a")).await.unwrap();
        assert_eq!(a.get("version"), Some(&DocValue::Int64(0)));
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let client = InMemoryClient::new();
        let players = client.collection("game", "players");
        players.fail_next(DriverError::NotPrimary("stepdown".into()));

        let err = players
            .bulk_write(None, &[], BulkWriteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let ok = players.bulk_write(None, &[], BulkWriteOptions::default()).await;
        assert!(ok.is_ok());
        assert_eq!(client.bulk_write_calls(), 2);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_abort() {
        let client = InMemoryClient::new();
        let players = client.collection("game", "players");
        players.insert_one(doc! { "_id" => "a", "version" => 0i64 }).await;

        let mut session = client.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        players
            .bulk_write(Some(session.as_mut()), &[bump("a", 0)], BulkWriteOptions::default())
            .await
            .unwrap();
        session.abort_transaction().await.unwrap();

        let a = players.find_one("_id", &DocValue::from("a")).await.unwrap();
        assert_eq!(a.get("version"), Some(&DocValue::Int64(0)));

        session.start_transaction().await.unwrap();
        players
            .bulk_write(Some(session.as_mut()), &[bump("a", 0)], BulkWriteOptions::default())
            .await
            .unwrap();
        session.commit_transaction().await.unwrap();

        let a = players.find_one("_id", &DocValue::from("a")).await.unwrap();
        assert_eq!(a.get("version"), Some(&DocValue::Int64(1)));
    }

    #[tokio::test]
    async fn test_session_from_other_client_is_rejected() {
        let players = InMemoryClient::new().collection("game", "players");
        let mut foreign = InMemoryClient::new().start_session().await.unwrap();

        let err = players
            .bulk_write(Some(foreign.as_mut()), &[], BulkWriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Session(_)));
    }

    #[tokio::test]
    async fn test_replace_keeps_identity() {
        let client = InMemoryClient::new();
        let players = client.collection("game", "players");
        players.insert_one(doc! { "_id" => "a", "version" => 2i64, "level" => 1 }).await;

        let replace = WriteInstruction::ReplaceOne {
            filter: Filter::new("_id", DocValue::from("a"), "version", 2),
            replacement: doc! { "version" => 3i64, "level" => 9 },
            upsert: false,
        };
        let result = players
            .bulk_write(None, &[replace], BulkWriteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.matched, 1);

        let a = players.find_one("_id", &DocValue::from("a")).await.unwrap();
        assert_eq!(a, doc! { "_id" => "a", "version" => 3i64, "level" => 9 });
    }
}
