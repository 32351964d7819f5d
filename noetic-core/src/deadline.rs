//! Deadlines for operations that wait on the storage engine.

use std::{future::Future, time::Duration};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Awaits `future`, failing with [`DocumentStoreError::Timeout`] once `deadline` elapses.
///
/// Without a deadline the future is awaited as-is. The timer needs a Tokio
/// runtime with the time driver enabled.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    collection: &str,
    operation: &str,
    future: F,
) -> DocumentStoreResult<T>
where
    F: Future<Output = DocumentStoreResult<T>>,
{
    let Some(after) = deadline else {
        return future.await;
    };

    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                target: "noetic::deadline",
                collection = %collection,
                operation = %operation,
                ?after,
                "Operation timed out"
            );

            Err(DocumentStoreError::Timeout {
                collection: collection.to_string(),
                operation: operation.to_string(),
                after,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_futures_time_out() {
        let result: DocumentStoreResult<()> = with_deadline(
            Some(Duration::from_millis(10)),
            "users",
            "scan",
            futures::future::pending(),
        )
        .await;

        assert_eq!(
            result,
            Err(DocumentStoreError::Timeout {
                collection: "users".to_string(),
                operation: "scan".to_string(),
                after: Duration::from_millis(10),
            })
        );
    }

    #[tokio::test]
    async fn no_deadline_passes_results_through() {
        let result = with_deadline(None, "users", "scan", async { Ok(7) }).await;

        assert_eq!(result, Ok(7));
    }
}
