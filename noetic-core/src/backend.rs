//! Storage engine abstraction for collections.
//!
//! This module defines the traits a host storage engine implements so the
//! collection layer can drive it. The model is that of a versioned,
//! transactional key-value engine:
//!
//! - [`StoreBackend`] opens (and, when needed, upgrades) a named database,
//!   creating its object store as part of the upgrade step.
//! - [`StoreConnection`] is an open database. It starts transactions and
//!   notifies a listener when another party changes the database version.
//! - [`StoreTransaction`] is scoped to a set of object stores and a mode. It
//!   accepts add requests, snapshot reads and cursors, and either commits or
//!   aborts as a unit.
//! - [`StoreCursor`] walks the records of one object store in key order and
//!   can overwrite the record at its current position.
//!
//! Engines report their own failures as
//! [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend);
//! the collection layer re-labels them per operation.
//!
//! # Thread Safety
//!
//! All implementations must be `Send + Sync`. Connections are shared between
//! every operation issued against a collection; transactions and cursors are
//! owned by a single operation.

use std::fmt::Debug;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{config::StoreSchema, error::DocumentStoreResult};

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only. Write requests fail.
    ReadOnly,
    /// Reads and writes, applied atomically on commit.
    ReadWrite,
}

/// Traversal order of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    /// Ascending key order.
    #[default]
    Next,
    /// Descending key order.
    Prev,
}

/// Notification delivered when another party changes a database's version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChange {
    /// The database name.
    pub name: String,
    /// The version the connection was opened at.
    pub old_version: u32,
    /// The requested new version, or `None` when the database is being deleted.
    pub new_version: Option<u32>,
}

/// Callback invoked by a connection on an external version change.
pub type VersionChangeListener = Box<dyn Fn(&VersionChange) + Send + Sync>;

/// Result of a successful [`StoreBackend::open`].
#[derive(Debug)]
pub struct OpenedConnection {
    /// The open connection.
    pub connection: Box<dyn StoreConnection>,
    /// `true` when other connections stayed open while this open upgraded the database.
    pub blocked: bool,
    /// `true` when the open created or upgraded the database.
    pub upgraded: bool,
}

/// A record together with its primary key, as produced by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    /// The record's primary key.
    pub key: Bson,
    /// The stored record.
    pub value: Document,
}

/// Abstract interface for the host storage engine.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Opens the database `name` at `version`.
    ///
    /// If the database does not exist yet, or exists at a lower version, the
    /// engine performs its upgrade step, which creates the object store `name`
    /// with the given schema when it is missing. Opening at a version lower
    /// than the stored one fails.
    async fn open(
        &self,
        name: &str,
        version: u32,
        schema: &StoreSchema,
    ) -> DocumentStoreResult<OpenedConnection>;
}

/// An open database.
#[async_trait]
pub trait StoreConnection: Send + Sync + Debug {
    /// Returns the database name.
    fn name(&self) -> &str;

    /// Returns the version this connection was opened at.
    fn version(&self) -> u32;

    /// Lists the object stores present in the database.
    fn object_store_names(&self) -> Vec<String>;

    /// Installs the callback fired when another party changes the database version.
    ///
    /// Replaces any previously installed listener.
    fn set_version_change_listener(&self, listener: VersionChangeListener);

    /// Closes the connection. Transactions can no longer be started.
    fn close(&self);

    /// Returns `true` once the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Starts a transaction over the given object stores.
    async fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> DocumentStoreResult<Box<dyn StoreTransaction>>;
}

/// A transaction scoped to one or more object stores.
///
/// Dropping a transaction without committing it discards its writes.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Adds a record, failing if its key already exists. Returns the record's key.
    async fn add(&self, store: &str, record: Document) -> DocumentStoreResult<Bson>;

    /// Returns up to `count` records in key order.
    async fn get_all(&self, store: &str, count: Option<usize>) -> DocumentStoreResult<Vec<Document>>;

    /// Opens a cursor over every record of an object store.
    async fn open_cursor(
        &self,
        store: &str,
        direction: CursorDirection,
    ) -> DocumentStoreResult<Box<dyn StoreCursor>>;

    /// Commits the transaction and waits for completion.
    async fn commit(self: Box<Self>) -> DocumentStoreResult<()>;

    /// Aborts the transaction, discarding every staged write.
    fn abort(self: Box<Self>);
}

/// A stateful iterator over the records of one object store.
#[async_trait]
pub trait StoreCursor: Send + Sync {
    /// Advances to the next record. Returns `None` once the cursor is exhausted.
    async fn next(&mut self) -> DocumentStoreResult<Option<CursorEntry>>;

    /// Overwrites the record at the current position. Returns the record's key.
    async fn update(&mut self, record: Document) -> DocumentStoreResult<Bson>;
}

/// Factory for storage engines.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
