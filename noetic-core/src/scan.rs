//! Cursor-driven reads.
//!
//! There are no secondary indexes, so every query is a forward scan over the
//! whole object store inside a read-only transaction. Results are delivered
//! only when the scan succeeds; a failure part-way discards what was
//! collected.

use bson::Document;

use crate::{
    backend::{CursorDirection, StoreTransaction, TransactionMode},
    connection::ConnectionHandle,
    error::{DocumentStoreError, DocumentStoreResult},
    query::Predicate,
};

/// Collects the records matching `predicate`, stopping at its limit or when the cursor is exhausted.
pub(crate) async fn scan(
    handle: &ConnectionHandle,
    predicate: &Predicate,
) -> DocumentStoreResult<Vec<Document>> {
    let name = handle.name();

    if predicate.limit == Some(0) {
        return Ok(Vec::new());
    }

    let transaction = begin(handle, TransactionMode::ReadOnly).await?;

    let matches = match collect(transaction.as_ref(), name, predicate).await {
        Ok(matches) => matches,
        Err(err) => {
            transaction.abort();
            return Err(err);
        }
    };

    transaction
        .commit()
        .await
        .map_err(|err| DocumentStoreError::transaction(name, err))?;

    tracing::debug!(
        target: "noetic::query",
        collection = %name,
        field = %predicate.field,
        operator = ?predicate.operator,
        matched = matches.len(),
        "Scan finished"
    );

    Ok(matches)
}

async fn collect(
    transaction: &dyn StoreTransaction,
    name: &str,
    predicate: &Predicate,
) -> DocumentStoreResult<Vec<Document>> {
    let mut cursor = transaction
        .open_cursor(name, CursorDirection::Next)
        .await
        .map_err(|err| DocumentStoreError::read(name, err))?;

    let mut matches = Vec::new();

    while let Some(entry) = cursor
        .next()
        .await
        .map_err(|err| DocumentStoreError::read(name, err))?
    {
        if predicate.matches(&entry.value) {
            matches.push(entry.value);

            if predicate.limit.is_some_and(|limit| matches.len() >= limit) {
                break;
            }
        }
    }

    Ok(matches)
}

/// Returns up to `count` records in key order from a snapshot read.
pub(crate) async fn get_all(
    handle: &ConnectionHandle,
    count: Option<usize>,
) -> DocumentStoreResult<Vec<Document>> {
    let name = handle.name();
    let transaction = begin(handle, TransactionMode::ReadOnly).await?;

    let records = match transaction.get_all(name, count).await {
        Ok(records) => records,
        Err(err) => {
            transaction.abort();
            return Err(DocumentStoreError::read(name, err));
        }
    };

    transaction
        .commit()
        .await
        .map_err(|err| DocumentStoreError::transaction(name, err))?;

    Ok(records)
}

/// Starts a transaction scoped to the handle's object store.
pub(crate) async fn begin(
    handle: &ConnectionHandle,
    mode: TransactionMode,
) -> DocumentStoreResult<Box<dyn StoreTransaction>> {
    let name = handle.name();

    handle
        .connection()
        .transaction(&[name], mode)
        .await
        .map_err(|err| DocumentStoreError::transaction(name, err))
}
