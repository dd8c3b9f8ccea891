//! Keyed record store contract and pre-write hooks.
//!
//! A store is anything that can insert and update records by key. Before
//! each write it stamps the sink-managed timestamps and then runs every
//! registered [`PreWriteHook`]; that is the extension point the attribution
//! hook plugs into.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::StoreError;

/// Kind of write a hook is called for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Insert,
    Update,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Attribution fields a record may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributionField {
    CreatedBy,
    UpdatedBy,
}

impl AttributionField {
    /// Fields stamped for a given kind of write.
    pub fn stamped_on(kind: WriteKind) -> &'static [AttributionField] {
        match kind {
            WriteKind::Insert => &[Self::CreatedBy, Self::UpdatedBy],
            WriteKind::Update => &[Self::UpdatedBy],
        }
    }
}

/// A record whose writes are timestamped and may be attributed.
///
/// Attribution fields are optional capabilities: a record exposes a slot
/// only for the fields it actually has.
pub trait AuditedRecord: Send + Sync {
    /// Set `created_at`/`updated_at` for a write happening at `now`.
    fn touch(&mut self, kind: WriteKind, now: DateTime<Utc>);

    /// Mutable access to an attribution field, if the record declares it.
    fn attribution_slot(&mut self, _field: AttributionField) -> Option<&mut Option<String>> {
        None
    }

    /// Mutable access to the creation timestamp, if the record tracks one.
    fn created_at_slot(&mut self) -> Option<&mut Option<DateTime<Utc>>> {
        None
    }
}

/// Copy `created_at` and `created_by` from the stored version of a record.
///
/// An update never changes who created a record or when, whatever the
/// caller passes in.
fn keep_creation_fields(stored: &mut dyn AuditedRecord, record: &mut dyn AuditedRecord) {
    if let (Some(from), Some(to)) = (stored.created_at_slot(), record.created_at_slot()) {
        *to = *from;
    }
    if let (Some(from), Some(to)) = (
        stored.attribution_slot(AttributionField::CreatedBy),
        record.attribution_slot(AttributionField::CreatedBy),
    ) {
        to.clone_from(from);
    }
}

/// Callback run before every insert and update.
pub trait PreWriteHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Adjust `record` before it is written. Must not fail the write.
    fn before_write(&self, kind: WriteKind, record: &mut dyn AuditedRecord);
}

/// Ordered set of pre-write hooks owned by a store.
#[derive(Clone, Default)]
pub struct WriteHooks {
    hooks: Vec<Arc<dyn PreWriteHook>>,
}

impl WriteHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook; hooks run in registration order.
    pub fn register(&mut self, hook: Arc<dyn PreWriteHook>) {
        self.hooks.push(hook);
    }

    /// Registered hook names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Prepare an update of `stored`: keep its creation fields, then
    /// [`prepare`](Self::prepare) as [`WriteKind::Update`].
    pub fn prepare_update(
        &self,
        stored: &mut dyn AuditedRecord,
        record: &mut dyn AuditedRecord,
        now: DateTime<Utc>,
    ) {
        keep_creation_fields(stored, record);
        self.prepare(WriteKind::Update, record, now);
    }

    /// Stamp timestamps, then run every hook.
    pub fn prepare(&self, kind: WriteKind, record: &mut dyn AuditedRecord, now: DateTime<Utc>) {
        record.touch(kind, now);
        for hook in &self.hooks {
            trace!(hook = hook.name(), %kind, "Running pre-write hook");
            hook.before_write(kind, record);
        }
    }
}

impl fmt::Debug for WriteHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Key-addressed durable store.
#[async_trait]
pub trait RecordStore<R>: Send + Sync {
    /// Insert a new record; fails if `key` is taken. Returns the record as written.
    async fn insert(&self, key: &str, record: R) -> Result<R, StoreError>;

    /// Replace an existing record; fails if `key` is unknown. Returns the record as written.
    async fn update(&self, key: &str, record: R) -> Result<R, StoreError>;

    /// Fetch a record by key.
    async fn get(&self, key: &str) -> Result<Option<R>, StoreError>;
}

/// In-memory [`RecordStore`] that honours pre-write hooks.
pub struct MemoryRecordStore<R> {
    records: RwLock<HashMap<String, R>>,
    hooks: WriteHooks,
}

impl<R> MemoryRecordStore<R>
where
    R: AuditedRecord + Clone + 'static,
{
    pub fn new() -> Self {
        Self::with_hooks(WriteHooks::new())
    }

    pub fn with_hooks(hooks: WriteHooks) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            hooks,
        }
    }

    /// Add a pre-write hook.
    pub fn register_hook(&mut self, hook: Arc<dyn PreWriteHook>) {
        self.hooks.register(hook);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records, in no particular order.
    pub async fn all(&self) -> Vec<R> {
        self.records.read().await.values().cloned().collect()
    }
}

impl<R> Default for MemoryRecordStore<R>
where
    R: AuditedRecord + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> RecordStore<R> for MemoryRecordStore<R>
where
    R: AuditedRecord + Clone + 'static,
{
    async fn insert(&self, key: &str, mut record: R) -> Result<R, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        self.hooks.prepare(WriteKind::Insert, &mut record, Utc::now());
        records.insert(key.to_string(), record.clone());
        Ok(record)
    }

    async fn update(&self, key: &str, mut record: R) -> Result<R, StoreError> {
        let mut records = self.records.write().await;
        let Some(slot) = records.get_mut(key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };

        self.hooks.prepare_update(&mut *slot, &mut record, Utc::now());
        *slot = record.clone();
        Ok(record)
    }

    async fn get(&self, key: &str) -> Result<Option<R>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Note {
        text: String,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    }

    impl AuditedRecord for Note {
        fn touch(&mut self, kind: WriteKind, now: DateTime<Utc>) {
            if kind == WriteKind::Insert {
                self.created_at = Some(now);
            }
            self.updated_at = Some(now);
        }

        fn created_at_slot(&mut self) -> Option<&mut Option<DateTime<Utc>>> {
            Some(&mut self.created_at)
        }
    }

    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<(&'static str, WriteKind)>>>,
    }

    impl PreWriteHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn before_write(&self, kind: WriteKind, _record: &mut dyn AuditedRecord) {
            self.calls.lock().unwrap().push((self.name, kind));
        }
    }

    #[test]
    fn stamped_fields_per_write_kind() {
        assert_eq!(
            AttributionField::stamped_on(WriteKind::Insert),
            &[AttributionField::CreatedBy, AttributionField::UpdatedBy]
        );
        assert_eq!(
            AttributionField::stamped_on(WriteKind::Update),
            &[AttributionField::UpdatedBy]
        );
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = MemoryRecordStore::new();
        let written = store
            .insert("n1", Note { text: "hi".into(), ..Default::default() })
            .await
            .unwrap();

        assert!(written.created_at.is_some());
        assert_eq!(written.created_at, written.updated_at);

        let fetched = store.get("n1").await.unwrap().unwrap();
        assert_eq!(fetched.text, "hi");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_key() {
        let store = MemoryRecordStore::new();
        store.insert("n1", Note::default()).await.unwrap();

        let err = store.insert("n1", Note::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(key) if key == "n1"));
    }

    #[tokio::test]
    async fn update_requires_existing_record_and_keeps_created_at() {
        let store = MemoryRecordStore::new();
        assert!(matches!(
            store.update("missing", Note::default()).await,
            Err(StoreError::NotFound(_))
        ));

        let inserted = store.insert("n1", Note::default()).await.unwrap();
        let mut edited = inserted.clone();
        edited.text = "edited".into();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let updated = store.update("n1", edited).await.unwrap();
        assert_eq!(updated.created_at, inserted.created_at);
        assert!(updated.updated_at > inserted.updated_at);
    }

    #[tokio::test]
    async fn update_with_fresh_record_keeps_stored_created_at() {
        let store = MemoryRecordStore::new();
        let inserted = store.insert("n1", Note::default()).await.unwrap();

        let updated = store
            .update("n1", Note { text: "replacement".into(), ..Default::default() })
            .await
            .unwrap();

        assert!(inserted.created_at.is_some());
        assert_eq!(updated.created_at, inserted.created_at);
        assert_eq!(store.get("n1").await.unwrap().unwrap().created_at, inserted.created_at);
        assert_eq!(updated.text, "replacement");
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order_for_each_write() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut store = MemoryRecordStore::new();
        store.register_hook(Arc::new(Recorder { name: "first", calls: Arc::clone(&calls) }));
        store.register_hook(Arc::new(Recorder { name: "second", calls: Arc::clone(&calls) }));

        store.insert("n1", Note::default()).await.unwrap();
        store.update("n1", Note::default()).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                ("first", WriteKind::Insert),
                ("second", WriteKind::Insert),
                ("first", WriteKind::Update),
                ("second", WriteKind::Update),
            ]
        );
    }

    #[test]
    fn records_without_attribution_fields_expose_no_slots() {
        let mut note = Note::default();
        assert!(note.attribution_slot(AttributionField::CreatedBy).is_none());
        assert!(note.attribution_slot(AttributionField::UpdatedBy).is_none());
    }
}
