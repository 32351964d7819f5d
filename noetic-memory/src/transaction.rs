//! Transactions and cursors of the in-memory engine.
//!
//! A transaction works on a private copy of the object stores in its scope.
//! Reads see that copy, including the transaction's own writes; nothing
//! reaches the shared databases until commit.
//!
//! Read-write transactions on one database run one at a time: starting one
//! waits until every earlier read-write transaction has committed, aborted or
//! been dropped, and its copy is taken only after that. Read-only
//! transactions never wait.

use std::{
    collections::HashMap,
    ops::Bound,
    sync::Arc,
};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::{mutex::OwnedMutexGuard, rwlock::RwLock};
use parking_lot::Mutex;

use noetic_core::{
    backend::{CursorDirection, CursorEntry, StoreCursor, StoreTransaction, TransactionMode},
    config::KeyPath,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::{
    key::{StoreKey, extract_key},
    store::{DatabaseMap, ObjectStore},
};

#[derive(Debug, Clone)]
enum Write {
    Add {
        store: String,
        key: StoreKey,
        bson_key: Bson,
        record: Document,
    },
    Put {
        store: String,
        key: StoreKey,
        bson_key: Bson,
        record: Document,
    },
}

#[derive(Debug)]
struct Staging {
    stores: HashMap<String, ObjectStore>,
    writes: Vec<Write>,
}

impl Staging {
    fn store_mut(&mut self, store: &str) -> DocumentStoreResult<&mut ObjectStore> {
        self.stores.get_mut(store).ok_or_else(|| not_in_scope(store))
    }
}

/// A transaction over one in-memory database.
#[derive(Debug)]
pub struct MemoryTransaction {
    database: String,
    version: u32,
    mode: TransactionMode,
    staging: Arc<Mutex<Staging>>,
    databases: Arc<RwLock<DatabaseMap>>,
    // Held by read-write transactions until commit, abort or drop.
    _writer: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    pub(crate) fn new(
        database: String,
        version: u32,
        mode: TransactionMode,
        stores: HashMap<String, ObjectStore>,
        databases: Arc<RwLock<DatabaseMap>>,
        writer: Option<OwnedMutexGuard<()>>,
    ) -> Self {
        Self {
            database,
            version,
            mode,
            staging: Arc::new(Mutex::new(Staging {
                stores,
                writes: Vec::new(),
            })),
            databases,
            _writer: writer,
        }
    }

    fn ensure_writable(&self) -> DocumentStoreResult<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(read_only()),
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn add(&self, store: &str, mut record: Document) -> DocumentStoreResult<Bson> {
        self.ensure_writable()?;

        let mut staging = self.staging.lock();
        let object_store = staging.store_mut(store)?;

        let bson_key = match extract_key(&object_store.schema, &record) {
            Some(key) => key,
            None if object_store.schema.auto_increment => {
                let generated = Bson::Int64(object_store.next_key);

                if let KeyPath::Single(field) = &object_store.schema.key_path {
                    record.insert(field.clone(), generated.clone());
                }

                generated
            }
            None => {
                return Err(DocumentStoreError::Backend(
                    "DataError: Evaluating the object store's key path did not yield a value"
                        .to_string(),
                ));
            }
        };

        let key = StoreKey::from_bson(&bson_key).ok_or_else(|| invalid_key(&bson_key))?;

        if object_store.records.contains_key(&key) {
            return Err(key_exists());
        }

        if object_store.schema.auto_increment {
            advance_generator(object_store, &key);
        }

        object_store
            .records
            .insert(key.clone(), (bson_key.clone(), record.clone()));

        staging.writes.push(Write::Add {
            store: store.to_string(),
            key,
            bson_key: bson_key.clone(),
            record,
        });

        Ok(bson_key)
    }

    async fn get_all(&self, store: &str, count: Option<usize>) -> DocumentStoreResult<Vec<Document>> {
        let staging = self.staging.lock();
        let object_store = staging.stores.get(store).ok_or_else(|| not_in_scope(store))?;

        Ok(object_store
            .records
            .values()
            .take(count.unwrap_or(usize::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn open_cursor(
        &self,
        store: &str,
        direction: CursorDirection,
    ) -> DocumentStoreResult<Box<dyn StoreCursor>> {
        if !self.staging.lock().stores.contains_key(store) {
            return Err(not_in_scope(store));
        }

        Ok(Box::new(MemoryCursor {
            staging: self.staging.clone(),
            store: store.to_string(),
            direction,
            writable: self.mode == TransactionMode::ReadWrite,
            position: None,
            exhausted: false,
        }))
    }

    async fn commit(self: Box<Self>) -> DocumentStoreResult<()> {
        let writes = std::mem::take(&mut self.staging.lock().writes);

        if writes.is_empty() {
            return Ok(());
        }

        let mut databases = self.databases.write().await;
        let database = databases
            .get_mut(&self.database)
            .filter(|database| database.version == self.version)
            .ok_or_else(|| {
                DocumentStoreError::Backend(
                    "AbortError: The database changed while the transaction was active".to_string(),
                )
            })?;

        // Replay on copies so a failing write leaves the shared stores untouched.
        let mut updated = HashMap::<String, ObjectStore>::new();

        for write in writes {
            let (store, key, bson_key, record, must_be_new) = match write {
                Write::Add { store, key, bson_key, record } => (store, key, bson_key, record, true),
                Write::Put { store, key, bson_key, record } => (store, key, bson_key, record, false),
            };

            if !updated.contains_key(&store) {
                let current = database.stores.get(&store).ok_or_else(|| not_in_scope(&store))?;
                updated.insert(store.clone(), current.clone());
            }

            let object_store = updated
                .get_mut(&store)
                .ok_or_else(|| not_in_scope(&store))?;

            if must_be_new && object_store.records.contains_key(&key) {
                return Err(key_exists());
            }

            if object_store.schema.auto_increment {
                advance_generator(object_store, &key);
            }

            object_store.records.insert(key, (bson_key, record));
        }

        database.stores.extend(updated);

        Ok(())
    }

    fn abort(self: Box<Self>) {
        let discarded = self.staging.lock().writes.len();

        tracing::debug!(target: "noetic::memory", database = %self.database, discarded, "Transaction aborted");
    }
}

/// A cursor over the staged copy of one object store.
pub struct MemoryCursor {
    staging: Arc<Mutex<Staging>>,
    store: String,
    direction: CursorDirection,
    writable: bool,
    position: Option<StoreKey>,
    exhausted: bool,
}

#[async_trait]
impl StoreCursor for MemoryCursor {
    async fn next(&mut self) -> DocumentStoreResult<Option<CursorEntry>> {
        if self.exhausted {
            return Ok(None);
        }

        let staging = self.staging.lock();
        let object_store = staging.stores.get(&self.store).ok_or_else(|| not_in_scope(&self.store))?;

        let entry = match (&self.direction, &self.position) {
            (CursorDirection::Next, None) => object_store.records.iter().next(),
            (CursorDirection::Next, Some(position)) => object_store
                .records
                .range((Bound::Excluded(position), Bound::Unbounded))
                .next(),
            (CursorDirection::Prev, None) => object_store.records.iter().next_back(),
            (CursorDirection::Prev, Some(position)) => object_store
                .records
                .range((Bound::Unbounded, Bound::Excluded(position)))
                .next_back(),
        };

        match entry {
            Some((key, (bson_key, record))) => {
                let entry = CursorEntry {
                    key: bson_key.clone(),
                    value: record.clone(),
                };
                self.position = Some(key.clone());
                Ok(Some(entry))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    async fn update(&mut self, mut record: Document) -> DocumentStoreResult<Bson> {
        if !self.writable {
            return Err(read_only());
        }

        let position = match (&self.position, self.exhausted) {
            (Some(position), false) => position.clone(),
            _ => {
                return Err(DocumentStoreError::Backend(
                    "InvalidStateError: The cursor is not positioned on a record".to_string(),
                ));
            }
        };

        let mut staging = self.staging.lock();
        let object_store = staging.store_mut(&self.store)?;

        let current_key = object_store
            .records
            .get(&position)
            .map(|(bson_key, _)| bson_key.clone())
            .ok_or_else(|| {
                DocumentStoreError::Backend(
                    "InvalidStateError: The record under the cursor no longer exists".to_string(),
                )
            })?;

        match extract_key(&object_store.schema, &record) {
            Some(bson_key) => {
                if StoreKey::from_bson(&bson_key).as_ref() != Some(&position) {
                    return Err(DocumentStoreError::Backend(
                        "DataError: The record's key does not match the cursor's position".to_string(),
                    ));
                }
            }
            None if object_store.schema.auto_increment => {
                if let KeyPath::Single(field) = &object_store.schema.key_path {
                    record.insert(field.clone(), current_key.clone());
                }
            }
            None => {
                return Err(DocumentStoreError::Backend(
                    "DataError: Evaluating the object store's key path did not yield a value"
                        .to_string(),
                ));
            }
        }

        object_store
            .records
            .insert(position.clone(), (current_key.clone(), record.clone()));

        let store = self.store.clone();
        staging.writes.push(Write::Put {
            store,
            key: position,
            bson_key: current_key.clone(),
            record,
        });

        Ok(current_key)
    }
}

/// Moves the generator past numeric keys, so explicit keys are never generated again.
fn advance_generator(object_store: &mut ObjectStore, key: &StoreKey) {
    match key {
        StoreKey::Int(value) if *value >= object_store.next_key => {
            object_store.next_key = value.saturating_add(1);
        }
        StoreKey::Float(value) => {
            let floor = value.floor();

            if floor >= object_store.next_key as f64 && floor < i64::MAX as f64 {
                object_store.next_key = floor as i64 + 1;
            }
        }
        _ => {}
    }
}

fn not_in_scope(store: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!(
        "NotFoundError: Object store \"{store}\" is not in the transaction's scope"
    ))
}

fn read_only() -> DocumentStoreError {
    DocumentStoreError::Backend("ReadOnlyError: The transaction is read-only".to_string())
}

fn key_exists() -> DocumentStoreError {
    DocumentStoreError::Backend("ConstraintError: Key already exists in the object store".to_string())
}

fn invalid_key(key: &Bson) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("DataError: {key} is not a valid key"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bson::doc;

    use noetic_core::{
        backend::{StoreBackend, StoreConnection},
        config::StoreSchema,
    };

    use super::*;
    use crate::InMemoryStore;

    async fn connect(schema: StoreSchema) -> Box<dyn StoreConnection> {
        InMemoryStore::new()
            .open("items", 1, &schema)
            .await
            .unwrap()
            .connection
    }

    fn keyed(field: &str) -> StoreSchema {
        StoreSchema {
            key_path: KeyPath::from(field),
            auto_increment: false,
        }
    }

    fn auto() -> StoreSchema {
        StoreSchema {
            key_path: KeyPath::from("id"),
            auto_increment: true,
        }
    }

    async fn write(connection: &dyn StoreConnection) -> Box<dyn StoreTransaction> {
        connection
            .transaction(&["items"], TransactionMode::ReadWrite)
            .await
            .unwrap()
    }

    async fn read(connection: &dyn StoreConnection) -> Vec<Document> {
        connection
            .transaction(&["items"], TransactionMode::ReadOnly)
            .await
            .unwrap()
            .get_all("items", None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn records_are_returned_in_key_order() {
        let connection = connect(keyed("id")).await;
        let transaction = write(connection.as_ref()).await;

        transaction.add("items", doc! { "id": "b" }).await.unwrap();
        transaction.add("items", doc! { "id": 3 }).await.unwrap();
        transaction.add("items", doc! { "id": "a" }).await.unwrap();
        transaction.commit().await.unwrap();

        assert_eq!(
            read(connection.as_ref()).await,
            vec![doc! { "id": 3 }, doc! { "id": "a" }, doc! { "id": "b" }]
        );
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() {
        let connection = connect(keyed("id")).await;
        let transaction = write(connection.as_ref()).await;

        transaction.add("items", doc! { "id": 1 }).await.unwrap();
        let err = transaction.add("items", doc! { "id": 1.0 }).await.unwrap_err();

        assert!(err.reason().starts_with("ConstraintError"));
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let connection = connect(keyed("id")).await;

        let transaction = write(connection.as_ref()).await;
        transaction.add("items", doc! { "id": 1 }).await.unwrap();
        transaction.abort();

        let transaction = write(connection.as_ref()).await;
        transaction.add("items", doc! { "id": 2 }).await.unwrap();
        drop(transaction);

        assert!(read(connection.as_ref()).await.is_empty());
    }

    #[tokio::test]
    async fn write_transactions_run_one_at_a_time() {
        let connection = connect(auto()).await;

        let first = write(connection.as_ref()).await;
        let first_key = first.add("items", doc! { "by": "first" }).await.unwrap();

        let (second, ()) = tokio::join!(
            connection.transaction(&["items"], TransactionMode::ReadWrite),
            async { first.commit().await.unwrap() },
        );
        let second = second.unwrap();

        let second_key = second.add("items", doc! { "by": "second" }).await.unwrap();
        second.commit().await.unwrap();

        assert_eq!(first_key, Bson::Int64(1));
        assert_eq!(second_key, Bson::Int64(2));
        assert_eq!(read(connection.as_ref()).await.len(), 2);
    }

    #[tokio::test]
    async fn later_writers_see_earlier_commits() {
        let connection = connect(keyed("id")).await;

        let first = write(connection.as_ref()).await;
        first.add("items", doc! { "id": 1, "by": "first" }).await.unwrap();

        let (second, ()) = tokio::join!(
            connection.transaction(&["items"], TransactionMode::ReadWrite),
            async { first.commit().await.unwrap() },
        );

        let err = second
            .unwrap()
            .add("items", doc! { "id": 1, "by": "second" })
            .await
            .unwrap_err();

        assert!(err.reason().starts_with("ConstraintError"));
        assert_eq!(read(connection.as_ref()).await, vec![doc! { "id": 1, "by": "first" }]);
    }

    #[tokio::test]
    async fn readers_do_not_wait_for_writers() {
        let connection = connect(keyed("id")).await;

        let writer = write(connection.as_ref()).await;
        writer.add("items", doc! { "id": 1 }).await.unwrap();

        let records = tokio::time::timeout(Duration::from_secs(1), read(connection.as_ref()))
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn read_only_transactions_reject_writes() {
        let connection = connect(keyed("id")).await;
        let transaction = connection
            .transaction(&["items"], TransactionMode::ReadOnly)
            .await
            .unwrap();

        let err = transaction.add("items", doc! { "id": 1 }).await.unwrap_err();

        assert!(err.reason().starts_with("ReadOnlyError"));
    }

    #[tokio::test]
    async fn missing_keys_are_data_errors() {
        let connection = connect(keyed("id")).await;
        let transaction = write(connection.as_ref()).await;

        let err = transaction.add("items", doc! { "name": "x" }).await.unwrap_err();
        assert!(err.reason().starts_with("DataError"));

        let err = transaction.add("items", doc! { "id": true }).await.unwrap_err();
        assert!(err.reason().starts_with("DataError"));
    }

    #[tokio::test]
    async fn auto_increment_injects_generated_keys() {
        let connection = connect(auto()).await;
        let transaction = write(connection.as_ref()).await;

        let first = transaction.add("items", doc! { "name": "a" }).await.unwrap();
        let explicit = transaction.add("items", doc! { "id": 10, "name": "b" }).await.unwrap();
        let next = transaction.add("items", doc! { "name": "c" }).await.unwrap();
        transaction.commit().await.unwrap();

        assert_eq!(first, Bson::Int64(1));
        assert_eq!(explicit, Bson::Int32(10));
        assert_eq!(next, Bson::Int64(11));
        assert_eq!(
            read(connection.as_ref()).await,
            vec![
                doc! { "name": "a", "id": 1_i64 },
                doc! { "id": 10, "name": "b" },
                doc! { "name": "c", "id": 11_i64 },
            ]
        );
    }

    #[tokio::test]
    async fn large_integer_keys_do_not_collide() {
        let connection = connect(keyed("id")).await;
        let transaction = write(connection.as_ref()).await;

        transaction.add("items", doc! { "id": 1_i64 << 53 }).await.unwrap();
        transaction.add("items", doc! { "id": (1_i64 << 53) + 1 }).await.unwrap();
        transaction.commit().await.unwrap();

        assert_eq!(
            read(connection.as_ref()).await,
            vec![doc! { "id": 1_i64 << 53 }, doc! { "id": (1_i64 << 53) + 1 }]
        );
    }

    #[tokio::test]
    async fn explicit_large_keys_advance_the_generator() {
        let connection = connect(auto()).await;
        let transaction = write(connection.as_ref()).await;

        transaction.add("items", doc! { "id": (1_i64 << 53) + 1 }).await.unwrap();
        let next = transaction.add("items", doc! { "name": "next" }).await.unwrap();

        assert_eq!(next, Bson::Int64((1 << 53) + 2));
    }

    #[tokio::test]
    async fn cursors_walk_in_both_directions() {
        let connection = connect(keyed("id")).await;
        let transaction = write(connection.as_ref()).await;
        for id in [2, 1, 3] {
            transaction.add("items", doc! { "id": id }).await.unwrap();
        }
        transaction.commit().await.unwrap();

        let transaction = connection
            .transaction(&["items"], TransactionMode::ReadOnly)
            .await
            .unwrap();

        for (direction, expected) in [
            (CursorDirection::Next, vec![1, 2, 3]),
            (CursorDirection::Prev, vec![3, 2, 1]),
        ] {
            let mut cursor = transaction.open_cursor("items", direction).await.unwrap();
            let mut seen = Vec::new();

            while let Some(entry) = cursor.next().await.unwrap() {
                seen.push(entry.value.get_i32("id").unwrap());
            }

            assert_eq!(seen, expected);
            assert_eq!(cursor.next().await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn cursor_updates_replace_the_current_record() {
        let connection = connect(keyed("id")).await;
        let transaction = write(connection.as_ref()).await;
        transaction.add("items", doc! { "id": 1, "stock": 1 }).await.unwrap();

        let mut cursor = transaction.open_cursor("items", CursorDirection::Next).await.unwrap();
        cursor.next().await.unwrap();

        let key = cursor.update(doc! { "id": 1, "stock": 5 }).await.unwrap();
        let err = cursor.update(doc! { "id": 2, "stock": 5 }).await.unwrap_err();

        assert_eq!(key, Bson::Int32(1));
        assert!(err.reason().starts_with("DataError"));

        drop(cursor);
        transaction.commit().await.unwrap();

        assert_eq!(read(connection.as_ref()).await, vec![doc! { "id": 1, "stock": 5 }]);
    }

    #[tokio::test]
    async fn unpositioned_cursors_cannot_update() {
        let connection = connect(keyed("id")).await;
        let transaction = write(connection.as_ref()).await;

        let mut cursor = transaction.open_cursor("items", CursorDirection::Next).await.unwrap();

        assert!(cursor.update(doc! { "id": 1 }).await.is_err());
    }

    #[tokio::test]
    async fn stores_outside_the_scope_are_not_found() {
        let connection = connect(keyed("id")).await;

        assert!(connection.transaction(&["other"], TransactionMode::ReadOnly).await.is_err());

        let transaction = write(connection.as_ref()).await;
        assert!(transaction.get_all("other", None).await.is_err());
    }
}
