//! Scripted engine for exercising the collection layer without a real store.
//!
//! Records live in a flat list keyed by their `id` field. Writes apply
//! immediately; the flags on [`MockState`] record whether the caller
//! committed or aborted, and can make cursors fail on demand.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document};
use parking_lot::Mutex;

use crate::{
    backend::{
        CursorDirection, CursorEntry, OpenedConnection, StoreBackend, StoreConnection,
        StoreCursor, StoreTransaction, TransactionMode, VersionChange, VersionChangeListener,
    },
    config::StoreSchema,
    connection::ConnectionHandle,
    error::{DocumentStoreError, DocumentStoreResult},
};

pub(crate) const MOCK_STORE: &str = "mock";

/// State shared by one mock connection and everything it starts.
#[derive(Default)]
pub(crate) struct MockState {
    pub records: Mutex<Vec<Document>>,
    /// Zero-based cursor step that fails instead of yielding a record.
    pub fail_next_at: Mutex<Option<usize>>,
    pub fail_update: AtomicBool,
    pub committed: AtomicBool,
    pub aborted: AtomicBool,
    closed: AtomicBool,
    listener: Mutex<Option<VersionChangeListener>>,
}

impl MockState {
    pub fn with_records(records: Vec<Document>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            ..Self::default()
        })
    }

    /// Wraps a connection to this state in a handle named [`MOCK_STORE`].
    pub fn handle(self: &Arc<Self>) -> ConnectionHandle {
        ConnectionHandle::new(
            MOCK_STORE.to_string(),
            1,
            Arc::new(MockConnection { state: self.clone() }),
        )
    }

    /// Invokes the installed version-change listener, as another connection's upgrade would.
    pub fn fire(&self, new_version: Option<u32>) {
        let change = VersionChange {
            name: MOCK_STORE.to_string(),
            old_version: 1,
            new_version,
        };

        if let Some(listener) = self.listener.lock().as_ref() {
            listener(&change);
        }
    }

    pub fn committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockState")
            .field("records", &self.records.lock().len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Backend handing out a fresh [`MockState`] per open.
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    states: Mutex<Vec<Arc<MockState>>>,
    opens: AtomicUsize,
    /// Makes every open wait forever.
    pub hang: AtomicBool,
}

impl MockBackend {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Returns the state behind the `index`-th completed open.
    pub fn state(&self, index: usize) -> Arc<MockState> {
        self.states.lock()[index].clone()
    }
}

#[async_trait]
impl StoreBackend for MockBackend {
    async fn open(
        &self,
        _name: &str,
        _version: u32,
        _schema: &StoreSchema,
    ) -> DocumentStoreResult<OpenedConnection> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let state = Arc::new(MockState::default());
        self.states.lock().push(state.clone());

        Ok(OpenedConnection {
            connection: Box::new(MockConnection { state }),
            blocked: false,
            upgraded: false,
        })
    }
}

#[derive(Debug)]
struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl StoreConnection for MockConnection {
    fn name(&self) -> &str {
        MOCK_STORE
    }

    fn version(&self) -> u32 {
        1
    }

    fn object_store_names(&self) -> Vec<String> {
        vec![MOCK_STORE.to_string()]
    }

    fn set_version_change_listener(&self, listener: VersionChangeListener) {
        *self.state.listener.lock() = Some(listener);
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    async fn transaction(
        &self,
        _stores: &[&str],
        _mode: TransactionMode,
    ) -> DocumentStoreResult<Box<dyn StoreTransaction>> {
        if self.is_closed() {
            return Err(DocumentStoreError::Backend(
                "InvalidStateError: The database connection is closing".to_string(),
            ));
        }

        Ok(Box::new(MockTransaction { state: self.state.clone() }))
    }
}

struct MockTransaction {
    state: Arc<MockState>,
}

#[async_trait]
impl StoreTransaction for MockTransaction {
    async fn add(&self, _store: &str, record: Document) -> DocumentStoreResult<Bson> {
        let key = record.get("id").cloned().unwrap_or(Bson::Null);
        let mut records = self.state.records.lock();

        if records.iter().any(|existing| existing.get("id") == Some(&key)) {
            return Err(DocumentStoreError::Backend(
                "ConstraintError: Key already exists in the object store".to_string(),
            ));
        }

        records.push(record);
        Ok(key)
    }

    async fn get_all(&self, _store: &str, count: Option<usize>) -> DocumentStoreResult<Vec<Document>> {
        let records = self.state.records.lock();
        Ok(records.iter().take(count.unwrap_or(usize::MAX)).cloned().collect())
    }

    async fn open_cursor(
        &self,
        _store: &str,
        _direction: CursorDirection,
    ) -> DocumentStoreResult<Box<dyn StoreCursor>> {
        Ok(Box::new(MockCursor {
            state: self.state.clone(),
            position: 0,
        }))
    }

    async fn commit(self: Box<Self>) -> DocumentStoreResult<()> {
        self.state.committed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        self.state.aborted.store(true, Ordering::SeqCst);
    }
}

struct MockCursor {
    state: Arc<MockState>,
    position: usize,
}

#[async_trait]
impl StoreCursor for MockCursor {
    async fn next(&mut self) -> DocumentStoreResult<Option<CursorEntry>> {
        if *self.state.fail_next_at.lock() == Some(self.position) {
            return Err(DocumentStoreError::Backend(
                "UnknownError: The cursor could not advance".to_string(),
            ));
        }

        let entry = self.state.records.lock().get(self.position).map(|value| CursorEntry {
            key: value.get("id").cloned().unwrap_or(Bson::Null),
            value: value.clone(),
        });
        self.position += 1;

        Ok(entry)
    }

    async fn update(&mut self, record: Document) -> DocumentStoreResult<Bson> {
        if self.state.fail_update.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Backend(
                "DataError: The record could not be written".to_string(),
            ));
        }

        let key = record.get("id").cloned().unwrap_or(Bson::Null);
        let mut records = self.state.records.lock();

        if let Some(slot) = self.position.checked_sub(1).and_then(|index| records.get_mut(index)) {
            *slot = record;
        }

        Ok(key)
    }
}
