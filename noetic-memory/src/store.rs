//! In-memory storage engine.
//!
//! This module provides a versioned, transactional engine that keeps every
//! database in process memory behind async-aware read-write locks. It follows
//! the open/upgrade model of browser-style key-value engines closely enough
//! to exercise the whole collection layer: databases have versions, opens at
//! a higher version run an upgrade step, and existing connections are told
//! when another party changes the version.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use parking_lot::Mutex;

use noetic_core::{
    backend::{
        OpenedConnection, StoreBackend, StoreBackendBuilder, StoreConnection, StoreTransaction,
        TransactionMode, VersionChange, VersionChangeListener,
    },
    config::StoreSchema,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::{key::StoreKey, transaction::MemoryTransaction};

/// One object store: records in key order plus the auto-increment generator.
#[derive(Debug, Clone)]
pub(crate) struct ObjectStore {
    pub schema: StoreSchema,
    pub records: BTreeMap<StoreKey, (Bson, Document)>,
    pub next_key: i64,
}

impl ObjectStore {
    fn new(schema: StoreSchema) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
            next_key: 1,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Database {
    pub version: u32,
    pub stores: HashMap<String, ObjectStore>,
    /// Taken by every read-write transaction for its whole lifetime.
    pub writer: Arc<WriteLock>,
}

type WriteLock = mea::mutex::Mutex<()>;

pub(crate) type DatabaseMap = HashMap<String, Database>;

type ConnectionMap = HashMap<String, Vec<Weak<ConnectionState>>>;

/// Thread-safe in-memory storage engine.
///
/// `InMemoryStore` is cloneable and every clone shares the same databases,
/// so a test can keep one clone to drive the hooks below while a registry
/// owns another.
///
/// # Hooks
///
/// Besides [`StoreBackend::open`], the store exposes operations that simulate
/// other parties acting on the same engine:
///
/// - [`InMemoryStore::bump_version`] upgrades a database as a newer client would
/// - [`InMemoryStore::delete_database`] deletes a database
/// - [`InMemoryStore::fail_next_open`] makes the next open of a database fail
/// - [`InMemoryStore::open_count`] counts engine opens per database
///
/// # Example
///
/// ```ignore
/// use noetic_memory::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// let registry = Registry::register(store.clone(), vec![CollectionConfig::new("users")])?;
///
/// registry.collection("users")?.get_all().await?;
/// assert_eq!(store.open_count("users"), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    databases: Arc<RwLock<DatabaseMap>>,
    connections: Arc<Mutex<ConnectionMap>>,
    open_counts: Arc<Mutex<HashMap<String, usize>>>,
    open_failures: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStore {
    /// Creates a new engine holding no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }

    /// Returns how many times [`StoreBackend::open`] was called for `name`.
    pub fn open_count(&self, name: &str) -> usize {
        self.open_counts.lock().get(name).copied().unwrap_or(0)
    }

    /// Makes the next open of `name` fail with `reason`.
    pub fn fail_next_open(&self, name: &str, reason: impl Into<String>) {
        self.open_failures.lock().insert(name.to_string(), reason.into());
    }

    /// Returns the stored version of `name`, or `None` if the database does not exist.
    pub async fn database_version(&self, name: &str) -> Option<u32> {
        self.databases.read().await.get(name).map(|database| database.version)
    }

    /// Raises the version of `name` by one, as another client opening it at a
    /// newer version would. Open connections receive a version change first.
    ///
    /// Returns the new version.
    pub async fn bump_version(&self, name: &str) -> DocumentStoreResult<u32> {
        let mut databases = self.databases.write().await;
        let database = databases.get_mut(name).ok_or_else(|| {
            DocumentStoreError::Backend(format!("NotFoundError: Database \"{name}\" does not exist"))
        })?;

        let new_version = database.version + 1;
        self.notify_version_change(name, Some(new_version));
        database.version = new_version;

        tracing::debug!(target: "noetic::memory", database = %name, version = new_version, "Database version bumped");

        Ok(new_version)
    }

    /// Deletes the database `name` and every record in it.
    ///
    /// Open connections receive a version change with no new version first.
    /// Returns `true` if the database existed.
    pub async fn delete_database(&self, name: &str) -> bool {
        let mut databases = self.databases.write().await;

        self.notify_version_change(name, None);
        let existed = databases.remove(name).is_some();

        tracing::debug!(target: "noetic::memory", database = %name, existed, "Database deleted");

        existed
    }

    /// Fires the version-change listener of every open connection to `name`.
    ///
    /// Returns `true` if any connection stayed open afterwards.
    fn notify_version_change(&self, name: &str, new_version: Option<u32>) -> bool {
        let live = {
            let mut connections = self.connections.lock();
            let Some(entries) = connections.get_mut(name) else {
                return false;
            };

            entries.retain(|entry| entry.upgrade().is_some_and(|state| !state.is_closed()));
            entries.iter().filter_map(Weak::upgrade).collect::<Vec<_>>()
        };

        for state in &live {
            state.fire(&VersionChange {
                name: name.to_string(),
                old_version: state.version,
                new_version,
            });
        }

        live.iter().any(|state| !state.is_closed())
    }

    fn register_connection(&self, state: &Arc<ConnectionState>) {
        self.connections
            .lock()
            .entry(state.name.clone())
            .or_default()
            .push(Arc::downgrade(state));
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn open(
        &self,
        name: &str,
        version: u32,
        schema: &StoreSchema,
    ) -> DocumentStoreResult<OpenedConnection> {
        *self.open_counts.lock().entry(name.to_string()).or_default() += 1;

        let injected = self.open_failures.lock().remove(name);

        if let Some(reason) = injected {
            return Err(DocumentStoreError::Backend(reason));
        }

        if version == 0 {
            return Err(DocumentStoreError::Backend(
                "TypeError: The version must be a positive integer".to_string(),
            ));
        }

        if schema.key_path.is_compound() && schema.auto_increment {
            return Err(DocumentStoreError::Backend(
                "InvalidAccessError: An auto-increment object store cannot use a compound key path"
                    .to_string(),
            ));
        }

        let mut databases = self.databases.write().await;

        let (upgraded, blocked) = match databases.get_mut(name) {
            None => {
                let mut database = Database {
                    version,
                    stores: HashMap::new(),
                    writer: Arc::new(WriteLock::new(())),
                };
                database
                    .stores
                    .insert(name.to_string(), ObjectStore::new(schema.clone()));
                databases.insert(name.to_string(), database);

                tracing::debug!(target: "noetic::memory", database = %name, version, "Created object store");

                (true, false)
            }
            Some(database) if database.version > version => {
                return Err(DocumentStoreError::Backend(format!(
                    "VersionError: The requested version ({version}) is less than the existing version ({})",
                    database.version
                )));
            }
            Some(database) if database.version < version => {
                let blocked = self.notify_version_change(name, Some(version));

                database.version = version;
                database
                    .stores
                    .entry(name.to_string())
                    .or_insert_with(|| ObjectStore::new(schema.clone()));

                tracing::debug!(target: "noetic::memory", database = %name, version, blocked, "Upgraded database");

                (true, blocked)
            }
            Some(_) => (false, false),
        };

        let state = Arc::new(ConnectionState::new(name, version));
        self.register_connection(&state);

        Ok(OpenedConnection {
            connection: Box::new(MemoryConnection {
                state,
                databases: self.databases.clone(),
            }),
            blocked,
            upgraded,
        })
    }
}

/// Shared state of one connection, also referenced weakly by the engine.
pub(crate) struct ConnectionState {
    name: String,
    version: u32,
    closed: AtomicBool,
    listener: Mutex<Option<VersionChangeListener>>,
}

impl ConnectionState {
    fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_string(),
            version,
            closed: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn fire(&self, change: &VersionChange) {
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(change);
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// An open connection to one in-memory database.
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<ConnectionState>,
    databases: Arc<RwLock<DatabaseMap>>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn version(&self) -> u32 {
        self.state.version
    }

    fn object_store_names(&self) -> Vec<String> {
        // The only store an open creates is the one named after the database.
        vec![self.state.name.clone()]
    }

    fn set_version_change_listener(&self, listener: VersionChangeListener) {
        *self.state.listener.lock() = Some(listener);
    }

    fn close(&self) {
        self.state.close();
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    async fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> DocumentStoreResult<Box<dyn StoreTransaction>> {
        if self.is_closed() {
            return Err(DocumentStoreError::Backend(
                "InvalidStateError: The database connection is closing".to_string(),
            ));
        }

        let writer = match mode {
            TransactionMode::ReadWrite => {
                let lock = self
                    .databases
                    .read()
                    .await
                    .get(&self.state.name)
                    .map(|database| database.writer.clone())
                    .ok_or_else(database_gone)?;

                Some((lock.clone().lock_owned().await, lock))
            }
            TransactionMode::ReadOnly => None,
        };

        let databases = self.databases.read().await;
        let database = databases
            .get(&self.state.name)
            .filter(|database| {
                writer
                    .as_ref()
                    .is_none_or(|(_, lock)| Arc::ptr_eq(&database.writer, lock))
            })
            .ok_or_else(database_gone)?;

        let mut snapshot = HashMap::with_capacity(stores.len());

        for store in stores {
            let object_store = database.stores.get(*store).ok_or_else(|| {
                DocumentStoreError::Backend(format!(
                    "NotFoundError: Object store \"{store}\" was not found"
                ))
            })?;

            snapshot.insert(store.to_string(), object_store.clone());
        }

        Ok(Box::new(MemoryTransaction::new(
            self.state.name.clone(),
            database.version,
            mode,
            snapshot,
            self.databases.clone(),
            writer.map(|(guard, _)| guard),
        )))
    }
}

fn database_gone() -> DocumentStoreError {
    DocumentStoreError::Backend("InvalidStateError: The database no longer exists".to_string())
}

/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
