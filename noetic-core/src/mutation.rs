//! Inserts and match-based updates.
//!
//! Key validation happens before any transaction is started, so a rejected
//! record never reaches the engine. Batch inserts share a single read-write
//! transaction; the first failing add aborts it, rolling back every add that
//! was already staged, and the error names the failing item.

use bson::Document;

use crate::{
    backend::{CursorDirection, StoreTransaction, TransactionMode},
    collection::{InsertOutcome, UpdateOutcome},
    config::CollectionConfig,
    connection::ConnectionHandle,
    error::{DocumentStoreError, DocumentStoreResult},
    query::matches_all,
    scan::begin,
    validate::validate_key,
};

/// Validates a batch, stopping at the first rejected record.
pub(crate) fn validate_all(config: &CollectionConfig, records: &[Document]) -> DocumentStoreResult<()> {
    records
        .iter()
        .enumerate()
        .try_for_each(|(index, record)| {
            validate_key(config, record).into_result(&config.name, record, Some(index))
        })
}

pub(crate) async fn insert_one(
    handle: &ConnectionHandle,
    record: Document,
) -> DocumentStoreResult<InsertOutcome> {
    let name = handle.name();
    let transaction = begin(handle, TransactionMode::ReadWrite).await?;

    let key = match transaction.add(name, record.clone()).await {
        Ok(key) => key,
        Err(err) => {
            transaction.abort();
            return Err(DocumentStoreError::write(name, None, err));
        }
    };

    transaction
        .commit()
        .await
        .map_err(|err| DocumentStoreError::transaction(name, err))?;

    tracing::debug!(target: "noetic::mutation", collection = %name, %key, "Inserted record");

    Ok(InsertOutcome { item: record, key })
}

pub(crate) async fn insert_many(
    handle: &ConnectionHandle,
    records: Vec<Document>,
) -> DocumentStoreResult<Vec<InsertOutcome>> {
    let name = handle.name();
    let transaction = begin(handle, TransactionMode::ReadWrite).await?;

    let inserted = match add_each(transaction.as_ref(), name, records).await {
        Ok(inserted) => inserted,
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
        target: "noetic::mutation",
        collection = %name,
        count = inserted.len(),
        "Inserted batch"
    );

    Ok(inserted)
}

async fn add_each(
    transaction: &dyn StoreTransaction,
    name: &str,
    records: Vec<Document>,
) -> DocumentStoreResult<Vec<InsertOutcome>> {
    let mut inserted = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let key = transaction
            .add(name, record.clone())
            .await
            .map_err(|err| DocumentStoreError::write(name, Some(index), err))?;

        inserted.push(InsertOutcome { item: record, key });
    }

    Ok(inserted)
}

pub(crate) async fn update_one(
    handle: &ConnectionHandle,
    matcher: &Document,
    patch: &Document,
) -> DocumentStoreResult<Option<UpdateOutcome>> {
    let name = handle.name();
    let transaction = begin(handle, TransactionMode::ReadWrite).await?;

    let outcome = match patch_first(transaction.as_ref(), name, matcher, patch).await {
        Ok(outcome) => outcome,
        Err(err) => {
            transaction.abort();
            return Err(err);
        }
    };

    transaction
        .commit()
        .await
        .map_err(|err| DocumentStoreError::transaction(name, err))?;

    match &outcome {
        Some(_) => tracing::debug!(target: "noetic::mutation", collection = %name, "Updated record"),
        None => tracing::debug!(target: "noetic::mutation", collection = %name, "No record matched update"),
    }

    Ok(outcome)
}

async fn patch_first(
    transaction: &dyn StoreTransaction,
    name: &str,
    matcher: &Document,
    patch: &Document,
) -> DocumentStoreResult<Option<UpdateOutcome>> {
    let mut cursor = transaction
        .open_cursor(name, CursorDirection::Next)
        .await
        .map_err(|err| DocumentStoreError::read(name, err))?;

    while let Some(entry) = cursor
        .next()
        .await
        .map_err(|err| DocumentStoreError::read(name, err))?
    {
        if !matches_all(matcher, &entry.value) {
            continue;
        }

        let new = merge(&entry.value, patch);

        cursor
            .update(new.clone())
            .await
            .map_err(|err| DocumentStoreError::write(name, None, err))?;

        return Ok(Some(UpdateOutcome { old: entry.value, new }));
    }

    Ok(None)
}

/// Shallow merge: fields of `patch` replace or extend those of `record`.
fn merge(record: &Document, patch: &Document) -> Document {
    let mut merged = record.clone();

    for (field, value) in patch {
        merged.insert(field.clone(), value.clone());
    }

    merged
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::mock::{MOCK_STORE, MockState};

    #[test]
    fn merge_prefers_patch_fields() {
        let record = doc! { "id": "rio", "name": "Rio", "rent_price": 9.99 };
        let merged = merge(&record, &doc! { "rent_price": 7.99, "stock": 3 });

        assert_eq!(
            merged,
            doc! { "id": "rio", "name": "Rio", "rent_price": 7.99, "stock": 3 }
        );
    }

    #[test]
    fn batch_validation_reports_the_first_rejected_index() {
        let config = CollectionConfig::new("users");
        let records = vec![
            doc! { "id": 1, "name": "John" },
            doc! { "name": "NoId" },
            doc! { "also": "missing" },
        ];

        match validate_all(&config, &records).unwrap_err() {
            DocumentStoreError::Validation { index, .. } => assert_eq!(index, Some(1)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn updates_patch_the_first_match_and_commit() {
        let state = MockState::with_records(vec![
            doc! { "id": 1, "genre": "drama" },
            doc! { "id": 2, "genre": "drama" },
        ]);

        let outcome = update_one(&state.handle(), &doc! { "genre": "drama" }, &doc! { "stock": 2 })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.new, doc! { "id": 1, "genre": "drama", "stock": 2 });
        assert_eq!(state.records.lock()[1], doc! { "id": 2, "genre": "drama" });
        assert!(state.committed());
    }

    #[tokio::test]
    async fn cursor_failures_abort_updates() {
        let state = MockState::with_records(vec![doc! { "id": 1, "genre": "drama" }]);
        *state.fail_next_at.lock() = Some(0);

        let err = update_one(&state.handle(), &doc! { "id": 1 }, &doc! { "stock": 2 })
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::EngineRead { .. }));
        assert!(state.aborted());
        assert!(!state.committed());
    }

    #[tokio::test]
    async fn rejected_rewrites_abort_updates() {
        let state = MockState::with_records(vec![doc! { "id": 1, "genre": "drama" }]);
        state.fail_update.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = update_one(&state.handle(), &doc! { "id": 1 }, &doc! { "stock": 2 })
            .await
            .unwrap_err();

        match err {
            DocumentStoreError::EngineWrite { collection, index, reason } => {
                assert_eq!(collection, MOCK_STORE);
                assert_eq!(index, None);
                assert!(reason.starts_with("DataError"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(state.aborted());
        assert_eq!(state.records.lock()[0], doc! { "id": 1, "genre": "drama" });
    }

    #[tokio::test]
    async fn failing_batch_items_abort_and_report_their_index() {
        let state = MockState::with_records(vec![doc! { "id": 2 }]);

        let err = insert_many(&state.handle(), vec![doc! { "id": 1 }, doc! { "id": 2 }])
            .await
            .unwrap_err();

        match err {
            DocumentStoreError::EngineWrite { index, reason, .. } => {
                assert_eq!(index, Some(1));
                assert!(reason.starts_with("ConstraintError"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(state.aborted());
        assert!(!state.committed());
    }

    #[tokio::test]
    async fn failing_single_inserts_abort() {
        let state = MockState::with_records(vec![doc! { "id": 1 }]);

        let err = insert_one(&state.handle(), doc! { "id": 1 }).await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::EngineWrite { index: None, .. }));
        assert!(state.aborted());
    }
}
