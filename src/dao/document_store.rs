//! Live, multi-writer document store shared by every actor of every encounter.
//!
//! Documents live under slash separated paths (see [`keys`]). Every mutation goes
//! through an optimistic transaction: reads record the revision they observed,
//! writes are buffered, and commit re-validates every read (including prefix
//! listings) under the store lock before applying all writes at once. A
//! transaction that lost a race is re-run from scratch against fresh data.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::session::{
    AbilityRequest, AnswerSubmission, BattleLogEntry, HostBinding, ResourceRecord, SessionRecord,
};

/// Global, monotonically increasing commit counter. `0` means "absent".
pub type Revision = u64;

const CHANGE_FEED_CAPACITY: usize = 1024;

/// Every document kind the store can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Encounter Session Record.
    Session(SessionRecord),
    /// Participant HP/MP pool.
    Resource(ResourceRecord),
    /// One participant's answer for one round.
    Answer(AnswerSubmission),
    /// Queued ability activation.
    AbilityRequest(AbilityRequest),
    /// Battle log line.
    LogEntry(BattleLogEntry),
    /// Host to encounter binding.
    HostBinding(HostBinding),
}

/// Typed access to one [`Document`] variant.
pub trait DocumentBody: Clone + Sized {
    /// Wrap the value.
    fn into_document(self) -> Document;
    /// Borrow the value if `document` holds this type.
    fn from_document(document: &Document) -> Option<&Self>;
}

macro_rules! document_body {
    ($ty:ty, $variant:ident) => {
        impl DocumentBody for $ty {
            fn into_document(self) -> Document {
                Document::$variant(self)
            }

            fn from_document(document: &Document) -> Option<&Self> {
                match document {
                    Document::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

document_body!(SessionRecord, Session);
document_body!(ResourceRecord, Resource);
document_body!(AnswerSubmission, Answer);
document_body!(AbilityRequest, AbilityRequest);
document_body!(BattleLogEntry, LogEntry);
document_body!(HostBinding, HostBinding);

/// A committed write or delete, pushed to every subscriber in commit order.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Document path.
    pub key: String,
    /// Revision of the commit.
    pub revision: Revision,
    /// New content, `None` for deletes.
    pub document: Option<Document>,
}

/// Errors raised by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The document at `key` is not of the requested type.
    #[error("document `{key}` does not hold the requested type")]
    TypeMismatch {
        /// Offending path.
        key: String,
    },
    /// Commit kept conflicting with concurrent writers.
    #[error("transaction abandoned after {attempts} conflicting attempts")]
    Contention {
        /// Attempts made.
        attempts: u32,
    },
}

struct Entry {
    revision: Revision,
    document: Document,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, Entry>,
    revision: Revision,
}

impl Inner {
    fn revision_of(&self, key: &str) -> Revision {
        self.documents.get(key).map_or(0, |entry| entry.revision)
    }

    fn listing(&self, prefix: &str) -> Vec<(String, Revision)> {
        self.documents
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.revision))
            .collect()
    }
}

/// In-process document store with optimistic transactions and a change feed.
pub struct DocumentStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<Change>,
    max_attempts: u32,
}

impl DocumentStore {
    /// Create an empty store. Transactions give up after `max_attempts`
    /// conflicting commits.
    pub fn new(max_attempts: u32) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
            max_attempts: max_attempts.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to every committed change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    /// Revision of the last commit.
    pub fn revision(&self) -> Revision {
        self.lock().revision
    }

    /// Read one document outside any transaction.
    pub fn get<T: DocumentBody>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let inner = self.lock();
        inner
            .documents
            .get(key)
            .map(|entry| typed(key, &entry.document))
            .transpose()
    }

    /// List every document under `prefix`, ordered by path, outside any
    /// transaction.
    pub fn list<T: DocumentBody>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let inner = self.lock();
        inner
            .documents
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| typed(key, &entry.document))
            .collect()
    }

    /// Paths of every document under `prefix`, outside any transaction.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .listing(prefix)
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// Run `work` inside an optimistic transaction, retrying it from scratch
    /// whenever the commit detects a conflicting write.
    ///
    /// An error returned by `work` aborts the attempt without writing anything.
    pub async fn run_transaction<T, E, F>(&self, mut work: F) -> Result<T, E>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = self.attempt(&mut work)? {
                return Ok(value);
            }
            debug!(attempt, "transaction conflict, retrying");
            tokio::task::yield_now().await;
        }
        Err(StoreError::Contention {
            attempts: self.max_attempts,
        }
        .into())
    }

    fn attempt<T, E, F>(&self, work: &mut F) -> Result<Option<T>, E>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, E>,
    {
        let mut tx = self.begin();
        let value = work(&mut tx)?;
        Ok(tx.commit().then_some(value))
    }

    pub(crate) fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            reads: HashMap::new(),
            ranges: Vec::new(),
            writes: BTreeMap::new(),
        }
    }
}

fn typed<T: DocumentBody>(key: &str, document: &Document) -> Result<T, StoreError> {
    T::from_document(document)
        .cloned()
        .ok_or_else(|| StoreError::TypeMismatch {
            key: key.to_string(),
        })
}

/// Read-tracking, write-buffering view of the store.
pub struct Transaction<'a> {
    store: &'a DocumentStore,
    reads: HashMap<String, (Revision, Option<Document>)>,
    ranges: Vec<(String, Vec<(String, Revision)>)>,
    writes: BTreeMap<String, Option<Document>>,
}

impl Transaction<'_> {
    fn observe(&mut self, key: &str) -> Option<Document> {
        if let Some((_, document)) = self.reads.get(key) {
            return document.clone();
        }
        let store = self.store;
        let inner = store.lock();
        let observed = inner
            .documents
            .get(key)
            .map(|entry| (entry.revision, Some(entry.document.clone())))
            .unwrap_or((0, None));
        drop(inner);
        self.reads.insert(key.to_string(), observed.clone());
        observed.1
    }

    /// Read one document. Sees this transaction's own buffered writes.
    pub fn get<T: DocumentBody>(&mut self, key: &str) -> Result<Option<T>, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return pending
                .as_ref()
                .map(|document| typed(key, document))
                .transpose();
        }
        self.observe(key)
            .map(|document| typed(key, &document))
            .transpose()
    }

    /// List documents under `prefix`, ordered by path. The whole range is
    /// validated at commit, so a concurrent insert or delete under the prefix
    /// is a conflict.
    pub fn list<T: DocumentBody>(&mut self, prefix: &str) -> Result<Vec<(String, T)>, StoreError> {
        let store = self.store;
        let mut merged: BTreeMap<String, Document> = {
            let inner = store.lock();
            let listing = inner.listing(prefix);
            let documents = listing
                .iter()
                .filter_map(|(key, _)| {
                    inner
                        .documents
                        .get(key)
                        .map(|entry| (key.clone(), entry.document.clone()))
                })
                .collect();
            self.ranges.push((prefix.to_string(), listing));
            documents
        };

        for (key, pending) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match pending {
                Some(document) => {
                    merged.insert(key.clone(), document.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        merged
            .into_iter()
            .map(|(key, document)| {
                let value = typed(&key, &document)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Paths under `prefix`, whatever their type. Validated like [`Transaction::list`].
    pub fn keys(&mut self, prefix: &str) -> Vec<String> {
        let store = self.store;
        let mut keys: Vec<String> = {
            let listing = store.lock().listing(prefix);
            let keys = listing.iter().map(|(key, _)| key.clone()).collect();
            self.ranges.push((prefix.to_string(), listing));
            keys
        };
        for (key, pending) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match pending {
                Some(_) if !keys.contains(key) => keys.push(key.clone()),
                None => keys.retain(|existing| existing != key),
                _ => {}
            }
        }
        keys.sort();
        keys
    }

    /// Buffer a create-or-replace.
    pub fn set<T: DocumentBody>(&mut self, key: impl Into<String>, value: T) {
        self.writes.insert(key.into(), Some(value.into_document()));
    }

    /// Buffer a delete. Deleting a missing document is a no-op.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.insert(key.into(), None);
    }

    /// Validate every read and apply the buffered writes atomically. Returns
    /// `false` on conflict, in which case nothing was written.
    pub(crate) fn commit(self) -> bool {
        let store = self.store;
        let mut inner = store.lock();

        let reads_valid = self
            .reads
            .iter()
            .all(|(key, (revision, _))| inner.revision_of(key) == *revision);
        let ranges_valid = self
            .ranges
            .iter()
            .all(|(prefix, listing)| inner.listing(prefix) == *listing);
        if !(reads_valid && ranges_valid) {
            return false;
        }
        if self.writes.is_empty() {
            return true;
        }

        inner.revision += 1;
        let revision = inner.revision;
        for (key, pending) in self.writes {
            match pending {
                Some(document) => {
                    inner.documents.insert(
                        key.clone(),
                        Entry {
                            revision,
                            document: document.clone(),
                        },
                    );
                    let _ = store.changes.send(Change {
                        key,
                        revision,
                        document: Some(document),
                    });
                }
                None => {
                    if inner.documents.remove(&key).is_some() {
                        let _ = store.changes.send(Change {
                            key,
                            revision,
                            document: None,
                        });
                    }
                }
            }
        }
        true
    }
}

/// Document paths.
pub mod keys {
    use uuid::Uuid;

    const ENCOUNTERS: &str = "encounters/";

    /// Session Record of an encounter.
    pub fn session(encounter_id: Uuid) -> String {
        format!("{ENCOUNTERS}{encounter_id}")
    }

    /// Prefix of every document belonging to an encounter, the record excluded.
    pub fn encounter_children(encounter_id: Uuid) -> String {
        format!("{ENCOUNTERS}{encounter_id}/")
    }

    /// Prefix of the resource records of an encounter.
    pub fn resources(encounter_id: Uuid) -> String {
        format!("{ENCOUNTERS}{encounter_id}/resources/")
    }

    /// Resource record of one participant.
    pub fn resource(encounter_id: Uuid, participant_id: Uuid) -> String {
        format!("{}{participant_id}", resources(encounter_id))
    }

    /// Prefix of every answer of an encounter.
    pub fn all_answers(encounter_id: Uuid) -> String {
        format!("{ENCOUNTERS}{encounter_id}/answers/")
    }

    /// Prefix of the answers of one round.
    pub fn answers(encounter_id: Uuid, round_index: u32) -> String {
        format!("{}{round_index:010}/", all_answers(encounter_id))
    }

    /// Answer of one participant for one round.
    pub fn answer(encounter_id: Uuid, round_index: u32, participant_id: Uuid) -> String {
        format!("{}{participant_id}", answers(encounter_id, round_index))
    }

    /// Prefix of the queued ability requests of an encounter.
    pub fn requests(encounter_id: Uuid) -> String {
        format!("{ENCOUNTERS}{encounter_id}/requests/")
    }

    /// One queued ability request.
    pub fn request(encounter_id: Uuid, request_id: Uuid) -> String {
        format!("{}{request_id}", requests(encounter_id))
    }

    /// Prefix of the battle log of an encounter.
    pub fn log(encounter_id: Uuid) -> String {
        format!("{ENCOUNTERS}{encounter_id}/log/")
    }

    /// One battle log entry.
    pub fn log_entry(encounter_id: Uuid, seq: u64) -> String {
        format!("{}{seq:020}", log(encounter_id))
    }

    /// Binding of a host to its active encounter.
    pub fn host(host_id: Uuid) -> String {
        format!("hosts/{host_id}")
    }

    /// Encounter a document path belongs to.
    pub fn encounter_of(key: &str) -> Option<Uuid> {
        let rest = key.strip_prefix(ENCOUNTERS)?;
        let id = rest.split('/').next()?;
        Uuid::parse_str(id).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;

    fn resource(id: Uuid, hp: u32) -> ResourceRecord {
        ResourceRecord {
            participant_id: id,
            display_name: "p".into(),
            hp,
            max_hp: 1_000,
            mp: 0,
            max_mp: 0,
            level: 1,
        }
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let store = DocumentStore::new(8);
        let id = Uuid::new_v4();
        let mut tx = store.begin();
        tx.set("a/1", resource(id, 3));
        let read: Option<ResourceRecord> = tx.get("a/1").unwrap();
        assert_eq!(read.unwrap().hp, 3);
        let listed: Vec<(String, ResourceRecord)> = tx.list("a/").unwrap();
        assert_eq!(listed.len(), 1);
        tx.delete("a/1");
        assert!(tx.get::<ResourceRecord>("a/1").unwrap().is_none());
    }

    #[test]
    fn stale_read_fails_commit() {
        let store = DocumentStore::new(8);
        let id = Uuid::new_v4();
        let mut setup = store.begin();
        setup.set("a/1", resource(id, 1));
        assert!(setup.commit());

        let mut slow = store.begin();
        let _: Option<ResourceRecord> = slow.get("a/1").unwrap();
        slow.set("a/1", resource(id, 10));

        let mut fast = store.begin();
        fast.set("a/1", resource(id, 2));
        assert!(fast.commit());

        assert!(!slow.commit());
        assert_eq!(store.get::<ResourceRecord>("a/1").unwrap().unwrap().hp, 2);
    }

    #[test]
    fn insert_under_listed_prefix_fails_commit() {
        let store = DocumentStore::new(8);
        let mut reader = store.begin();
        let listed: Vec<(String, ResourceRecord)> = reader.list("answers/").unwrap();
        assert!(listed.is_empty());
        reader.set("summary", resource(Uuid::new_v4(), 0));

        let mut writer = store.begin();
        writer.set("answers/x", resource(Uuid::new_v4(), 1));
        assert!(writer.commit());

        assert!(!reader.commit());
    }

    #[test]
    fn keys_span_every_document_type() {
        let store = DocumentStore::new(8);
        let encounter = Uuid::new_v4();
        let mut setup = store.begin();
        setup.set(keys::resource(encounter, Uuid::new_v4()), resource(Uuid::new_v4(), 1));
        setup.set(
            keys::log_entry(encounter, 0),
            BattleLogEntry {
                seq: 0,
                round_index: 0,
                actor_id: None,
                text: "start".into(),
                at: std::time::SystemTime::UNIX_EPOCH,
            },
        );
        assert!(setup.commit());

        let prefix = keys::encounter_children(encounter);
        assert_eq!(store.keys(&prefix).len(), 2);

        let mut tx = store.begin();
        for key in tx.keys(&prefix) {
            tx.delete(key);
        }
        assert!(tx.keys(&prefix).is_empty());
        assert!(tx.commit());
        assert!(store.keys(&prefix).is_empty());
    }

    #[test]
    fn wrong_type_is_reported() {
        let store = DocumentStore::new(8);
        let mut tx = store.begin();
        tx.set(
            "hosts/h",
            HostBinding {
                encounter_id: Uuid::new_v4(),
            },
        );
        assert!(tx.commit());
        let err = store.get::<ResourceRecord>("hosts/h").unwrap_err();
        assert_eq!(
            err,
            StoreError::TypeMismatch {
                key: "hosts/h".into()
            }
        );
    }

    #[tokio::test]
    async fn change_feed_carries_commits_in_order() {
        let store = DocumentStore::new(8);
        let mut feed = store.subscribe();
        let id = Uuid::new_v4();
        store
            .run_transaction(|tx| {
                tx.set("a/1", resource(id, 1));
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();
        store
            .run_transaction(|tx| {
                tx.delete("a/1");
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();

        let first = feed.recv().await.unwrap();
        let second = feed.recv().await.unwrap();
        assert_eq!(first.revision, 1);
        assert!(first.document.is_some());
        assert_eq!(second.revision, 2);
        assert!(second.document.is_none());
    }

    #[tokio::test]
    async fn aborted_work_writes_nothing() {
        let store = DocumentStore::new(8);
        let result: Result<(), StoreError> = store
            .run_transaction(|tx| {
                tx.set("a/1", resource(Uuid::new_v4(), 1));
                Err(StoreError::Contention { attempts: 0 })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(DocumentStore::new(10_000));
        let id = Uuid::new_v4();
        store
            .run_transaction(|tx| {
                tx.set("counter", resource(id, 0));
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .run_transaction(|tx| {
                        let mut record: ResourceRecord =
                            tx.get("counter")?.expect("counter exists");
                        record.hp += 1;
                        tx.set("counter", record);
                        Ok::<_, StoreError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record: ResourceRecord = store.get("counter").unwrap().unwrap();
        assert_eq!(record.hp, 32);
    }

    #[test]
    fn keys_sort_and_parse() {
        let encounter = Uuid::new_v4();
        assert!(keys::answer(encounter, 2, Uuid::new_v4()).starts_with(&keys::answers(encounter, 2)));
        assert!(keys::log_entry(encounter, 9) < keys::log_entry(encounter, 10));
        assert_eq!(keys::encounter_of(&keys::session(encounter)), Some(encounter));
        assert_eq!(
            keys::encounter_of(&keys::request(encounter, Uuid::new_v4())),
            Some(encounter)
        );
        assert_eq!(keys::encounter_of("hosts/x"), None);
    }
}
