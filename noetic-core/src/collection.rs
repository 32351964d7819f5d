//! Collection facades returned by the registry.
//!
//! A [`Collection`] binds one registered declaration to the shared
//! [`ConnectionManager`]. Every operation opens (or reuses) the collection's
//! connection and runs in its own transaction; two operations on the same
//! collection are independent and may interleave.
//!
//! - [`Collection`] works with plain [`bson::Document`] records
//! - [`TypedCollection`] converts serde types to and from records
//!
//! # Example
//!
//! ```ignore
//! let movies = registry.collection("movies")?;
//!
//! movies.insert_one(doc! { "id": "rio", "name": "Rio", "rent_price": 9.99 }).await?;
//!
//! let rio = movies.query().find_one().field("id").eq("rio").await?;
//! let patched = movies
//!     .update()
//!     .one(doc! { "id": "rio" }, doc! { "rent_price": 7.99 })
//!     .await?;
//! ```

use std::{future::Future, marker::PhantomData, time::Duration};

use bson::{Bson, Document};

use crate::{
    backend::StoreBackend,
    config::CollectionConfig,
    connection::{ConnectionHandle, ConnectionManager},
    deadline::with_deadline,
    document::{Record, RecordExt},
    error::{DocumentStoreError, DocumentStoreResult},
    mutation,
    query::{Predicate, QueryBuilder, UpdateBuilder},
    scan,
    validate::validate_key,
};

/// Result of a successful insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    /// The record as submitted.
    pub item: Document,
    /// The key the engine stored it under.
    pub key: Bson,
}

/// Result of a successful match-based update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// The record before the patch.
    pub old: Document,
    /// The record as written back.
    pub new: Document,
}

/// Operations on one registered collection.
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    config: &'a CollectionConfig,
    connections: &'a ConnectionManager<B>,
    deadline: Option<Duration>,
}

impl<B: StoreBackend> Clone for Collection<'_, B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            connections: self.connections,
            deadline: self.deadline,
        }
    }
}

impl<'a, B: StoreBackend + 'static> Collection<'a, B> {
    pub(crate) fn new(config: &'a CollectionConfig, connections: &'a ConnectionManager<B>) -> Self {
        Self {
            config,
            connections,
            deadline: connections.options().operation_timeout,
        }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the declaration this collection was registered with.
    pub fn config(&self) -> &CollectionConfig {
        self.config
    }

    /// Returns a copy of this facade whose operations fail after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self { deadline: Some(timeout), ..self.clone() }
    }

    /// Returns the collection's connection, opening it on first use.
    pub async fn open(&self) -> DocumentStoreResult<std::sync::Arc<ConnectionHandle>> {
        self.run("open", async { self.connections.open(self.config).await })
            .await
    }

    /// Inserts one record.
    ///
    /// # Errors
    ///
    /// - [`Validation`](crate::error::DocumentStoreError::Validation) if the
    ///   collection is not auto-incrementing and the record has none of its key fields
    /// - [`EngineWrite`](crate::error::DocumentStoreError::EngineWrite) if the
    ///   engine rejects the add, e.g. because the key already exists
    pub async fn insert_one(&self, record: Document) -> DocumentStoreResult<InsertOutcome> {
        validate_key(self.config, &record).into_result(self.name(), &record, None)?;

        self.run("insert_one", async {
            let handle = self.connections.open(self.config).await?;
            mutation::insert_one(&handle, record).await
        })
        .await
    }

    /// Inserts a batch of records in one transaction.
    ///
    /// Every record is validated before anything is written. If any add then
    /// fails, the transaction is rolled back and the error names the item.
    pub async fn insert_many(&self, records: Vec<Document>) -> DocumentStoreResult<Vec<InsertOutcome>> {
        mutation::validate_all(self.config, &records)?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        self.run("insert_many", async {
            let handle = self.connections.open(self.config).await?;
            mutation::insert_many(&handle, records).await
        })
        .await
    }

    /// Returns every record in key order.
    pub async fn get_all(&self) -> DocumentStoreResult<Vec<Document>> {
        self.read_all(None).await
    }

    /// Returns at most `count` records in key order.
    pub async fn get_all_limited(&self, count: usize) -> DocumentStoreResult<Vec<Document>> {
        self.read_all(Some(count)).await
    }

    /// Returns the number of stored records.
    pub async fn count(&self) -> DocumentStoreResult<usize> {
        Ok(self.read_all(None).await?.len())
    }

    /// Returns `true` if the collection holds no records.
    pub async fn is_empty(&self) -> DocumentStoreResult<bool> {
        Ok(self.read_all(Some(1)).await?.is_empty())
    }

    /// Starts a query.
    pub fn query(&self) -> QueryBuilder<'a, B> {
        QueryBuilder::new(self.clone())
    }

    /// Starts an update.
    pub fn update(&self) -> UpdateBuilder<'a, B> {
        UpdateBuilder::new(self.clone())
    }

    /// Returns a typed view of this collection.
    pub fn typed<D: Record>(&self) -> TypedCollection<'a, B, D> {
        TypedCollection { inner: self.clone(), _marker: PhantomData }
    }

    pub(crate) async fn scan(&self, predicate: Predicate) -> DocumentStoreResult<Vec<Document>> {
        self.run("scan", async {
            let handle = self.connections.open(self.config).await?;
            scan::scan(&handle, &predicate).await
        })
        .await
    }

    pub(crate) async fn update_one(
        &self,
        matcher: Document,
        patch: Document,
    ) -> DocumentStoreResult<Option<UpdateOutcome>> {
        self.run("update_one", async {
            let handle = self.connections.open(self.config).await?;
            mutation::update_one(&handle, &matcher, &patch).await
        })
        .await
    }

    async fn read_all(&self, count: Option<usize>) -> DocumentStoreResult<Vec<Document>> {
        self.run("get_all", async {
            let handle = self.connections.open(self.config).await?;
            scan::get_all(&handle, count).await
        })
        .await
    }

    async fn run<T>(
        &self,
        operation: &str,
        future: impl Future<Output = DocumentStoreResult<T>>,
    ) -> DocumentStoreResult<T> {
        let result = with_deadline(self.deadline, self.name(), operation, future).await;

        if let Err(DocumentStoreError::Timeout { .. }) = &result {
            self.connections.evict_pending(self.name());
        }

        result
    }
}

/// Type-safe view of a collection for a serde type `D`.
#[derive(Debug)]
pub struct TypedCollection<'a, B: StoreBackend, D: Record> {
    inner: Collection<'a, B>,
    _marker: PhantomData<D>,
}

impl<'a, B: StoreBackend + 'static, D: Record> TypedCollection<'a, B, D> {
    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Converts this typed collection to a different record type.
    pub fn with_type<T: Record>(&self) -> TypedCollection<'a, B, T> {
        self.inner.typed::<T>()
    }

    /// Inserts one value, returning its key.
    pub async fn insert_one(&self, value: &D) -> DocumentStoreResult<Bson> {
        Ok(self.inner.insert_one(value.to_record()?).await?.key)
    }

    /// Inserts a batch of values in one transaction, returning their keys.
    pub async fn insert_many(&self, values: &[D]) -> DocumentStoreResult<Vec<Bson>> {
        let records = values
            .iter()
            .map(RecordExt::to_record)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        Ok(self
            .inner
            .insert_many(records)
            .await?
            .into_iter()
            .map(|outcome| outcome.key)
            .collect())
    }

    /// Returns every value in key order.
    pub async fn get_all(&self) -> DocumentStoreResult<Vec<D>> {
        self.inner
            .get_all()
            .await?
            .into_iter()
            .map(D::from_record)
            .collect()
    }

    /// Returns the first value whose `field` equals `value`.
    pub async fn find_one(
        &self,
        field: &str,
        value: impl Into<Bson>,
    ) -> DocumentStoreResult<Option<D>> {
        self.inner
            .query()
            .find_one()
            .field(field)
            .eq(value)
            .await?
            .map(D::from_record)
            .transpose()
    }

    /// Returns the values whose `field` equals `value`, up to `limit`.
    pub async fn find_many(
        &self,
        field: &str,
        value: impl Into<Bson>,
        limit: Option<usize>,
    ) -> DocumentStoreResult<Vec<D>> {
        let query = self.inner.query().find_many();
        let query = match limit {
            Some(limit) => query.limit(limit),
            None => query,
        };

        query
            .field(field)
            .eq(value)
            .await?
            .into_iter()
            .map(D::from_record)
            .collect()
    }
}
