//! Connection lifecycle management.
//!
//! The [`ConnectionManager`] owns the table of open connections, one per
//! collection name. The table stores the *in-flight* open future rather than
//! the finished connection, so callers racing to open the same collection all
//! await the same engine open sequence.
//!
//! An entry leaves the table in three ways:
//!
//! - the open fails or times out, or an operation waiting on it times out,
//! - the engine reports an external version change, in which case the
//!   connection is closed as well,
//! - [`ConnectionManager::invalidate`] or [`ConnectionManager::close_all`] is called.
//!
//! Each entry carries a generation number. Eviction triggered by an old
//! connection only removes the entry if it still belongs to that generation,
//! so a stale listener never evicts the connection that replaced it.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::{
    backend::{StoreBackend, StoreConnection, VersionChange},
    config::{CollectionConfig, StoreOptions, StoreSchema},
    deadline::with_deadline,
    error::{DocumentStoreError, DocumentStoreResult},
};

type OpenFuture = Shared<BoxFuture<'static, DocumentStoreResult<Arc<ConnectionHandle>>>>;
type ConnectionCache = Mutex<HashMap<String, CacheEntry>>;

struct CacheEntry {
    generation: u64,
    open: OpenFuture,
}

/// A ready-to-use connection to one collection's object store.
///
/// Handles are shared by every operation issued against the collection until
/// the manager evicts them.
#[derive(Debug)]
pub struct ConnectionHandle {
    name: String,
    generation: u64,
    connection: Arc<dyn StoreConnection>,
}

impl ConnectionHandle {
    pub(crate) fn new(name: String, generation: u64, connection: Arc<dyn StoreConnection>) -> Self {
        Self { name, generation, connection }
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cache generation this handle was opened under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the underlying engine connection.
    pub fn connection(&self) -> &dyn StoreConnection {
        self.connection.as_ref()
    }

    /// Returns `true` while the underlying connection is open.
    pub fn is_open(&self) -> bool {
        !self.connection.is_closed()
    }
}

/// Opens and memoizes one connection per collection name.
pub struct ConnectionManager<B: StoreBackend> {
    backend: Arc<B>,
    options: StoreOptions,
    cache: Arc<ConnectionCache>,
    next_generation: AtomicU64,
}

impl<B: StoreBackend + 'static> ConnectionManager<B> {
    /// Creates a manager with an empty connection table.
    pub fn new(backend: B, options: StoreOptions) -> Self {
        Self {
            backend: Arc::new(backend),
            options,
            cache: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Returns the storage engine.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the options connections are opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Returns the connection for `config`, opening it on first use.
    ///
    /// Concurrent calls for the same collection share one open sequence. A
    /// failed or timed-out open is evicted, so the next call starts over.
    pub async fn open(&self, config: &CollectionConfig) -> DocumentStoreResult<Arc<ConnectionHandle>> {
        let (generation, open) = self.get_or_open(config);

        match self.options.open_timeout {
            Some(timeout) => {
                let result = with_deadline(Some(timeout), &config.name, "open", open).await;

                if let Err(DocumentStoreError::Timeout { .. }) = &result {
                    evict(&self.cache, &config.name, generation);
                }

                result
            }
            None => open.await,
        }
    }

    /// Drops the cached connection for `name`, closing it if the open had completed.
    ///
    /// Returns `true` if an entry was removed.
    pub fn invalidate(&self, name: &str) -> bool {
        let entry = self.cache.lock().remove(name);

        match entry {
            Some(entry) => {
                close_if_ready(&entry.open);
                tracing::debug!(target: "noetic::connection", collection = %name, "Connection invalidated");
                true
            }
            None => false,
        }
    }

    /// Drops the cached entry for `name` if its open has not completed yet.
    ///
    /// Used when an operation gives up waiting, so a hung open is not shared
    /// with every later call. Returns `true` if an entry was removed.
    pub fn evict_pending(&self, name: &str) -> bool {
        let mut cache = self.cache.lock();

        if !cache.get(name).is_some_and(|entry| entry.open.peek().is_none()) {
            return false;
        }

        cache.remove(name);
        tracing::debug!(target: "noetic::connection", collection = %name, "Evicted pending open");
        true
    }

    /// Closes and evicts every cached connection.
    pub fn close_all(&self) {
        let entries = self.cache.lock().drain().collect::<Vec<_>>();

        for (_, entry) in entries {
            close_if_ready(&entry.open);
        }
    }

    /// Returns `true` if `name` has a cached (possibly still opening) connection.
    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.lock().contains_key(name)
    }

    fn get_or_open(&self, config: &CollectionConfig) -> (u64, OpenFuture) {
        let mut cache = self.cache.lock();

        if let Some(entry) = cache.get(&config.name) {
            return (entry.generation, entry.open.clone());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let open = initialize(
            self.backend.clone(),
            Arc::downgrade(&self.cache),
            config.name.clone(),
            self.options.schema_version,
            config.schema(),
            generation,
        )
        .boxed()
        .shared();

        cache.insert(
            config.name.clone(),
            CacheEntry { generation, open: open.clone() },
        );

        (generation, open)
    }
}

impl<B: StoreBackend> fmt::Debug for ConnectionManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("backend", &self.backend)
            .field("options", &self.options)
            .field("cached", &self.cache.lock().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}

async fn initialize<B: StoreBackend>(
    backend: Arc<B>,
    cache: Weak<ConnectionCache>,
    name: String,
    version: u32,
    schema: StoreSchema,
    generation: u64,
) -> DocumentStoreResult<Arc<ConnectionHandle>> {
    let opened = match backend.open(&name, version, &schema).await {
        Ok(opened) => opened,
        Err(err) => {
            if let Some(cache) = cache.upgrade() {
                evict(&cache, &name, generation);
            }

            tracing::error!(
                target: "noetic::connection",
                collection = %name,
                error = %err,
                "Failed to open collection"
            );

            return Err(DocumentStoreError::open(&name, err));
        }
    };

    if opened.blocked {
        tracing::warn!(
            target: "noetic::connection",
            collection = %name,
            "Opening was blocked by other open connections"
        );
    }

    let connection: Arc<dyn StoreConnection> = Arc::from(opened.connection);
    let listener_connection = Arc::downgrade(&connection);
    let listener_name = name.clone();

    connection.set_version_change_listener(Box::new(move |change: &VersionChange| {
        if let Some(connection) = listener_connection.upgrade() {
            connection.close();
        }

        if let Some(cache) = cache.upgrade() {
            evict(&cache, &listener_name, generation);
        }

        tracing::warn!(
            target: "noetic::connection",
            collection = %listener_name,
            old_version = change.old_version,
            new_version = ?change.new_version,
            "Connection closed due to version change"
        );
    }));

    tracing::info!(
        target: "noetic::connection",
        collection = %name,
        version,
        upgraded = opened.upgraded,
        "Loaded object store"
    );

    Ok(Arc::new(ConnectionHandle::new(name, generation, connection)))
}

fn evict(cache: &ConnectionCache, name: &str, generation: u64) {
    let mut cache = cache.lock();

    if cache.get(name).is_some_and(|entry| entry.generation == generation) {
        cache.remove(name);
    }
}

fn close_if_ready(open: &OpenFuture) {
    if let Some(Ok(handle)) = open.peek() {
        handle.connection.close();
    }
}
