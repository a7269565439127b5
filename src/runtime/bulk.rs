use std::{collections::BTreeSet, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    op::{BulkOperation, BulkResult},
    remote::{EventDirectory, RemoteError},
    types::EventId,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BulkError {
    #[error("no events selected")]
    EmptySelection,
}

/// Dispatches one remote call per id and waits for all of them to settle.
///
/// Calls run concurrently with no ordering; `limit` caps how many are in
/// flight at once (`None` dispatches everything immediately). One failing id
/// never stops the others.
pub async fn execute<I>(
    directory: Arc<dyn EventDirectory>,
    operation: BulkOperation,
    ids: I,
    limit: Option<usize>,
) -> Result<BulkResult, BulkError>
where
    I: IntoIterator<Item = EventId>,
{
    let requested: BTreeSet<EventId> = ids.into_iter().collect();
    if requested.is_empty() {
        return Err(BulkError::EmptySelection);
    }

    let permits = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let mut tasks = JoinSet::new();
    let mut task_ids = hashbrown::HashMap::new();

    for id in requested.iter().cloned() {
        let directory = Arc::clone(&directory);
        let permits = permits.clone();
        let task_id = id.clone();
        let handle = tasks.spawn(async move {
            let _permit = match permits {
                Some(sem) => Some(sem.acquire_owned().await.map_err(|_| {
                    RemoteError::Network("bulk executor closed".to_string())
                })?),
                None => None,
            };
            dispatch(directory.as_ref(), operation, &task_id).await
        });
        task_ids.insert(handle.id(), id);
    }

    let mut result = BulkResult::new(operation, requested);
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((task, Ok(()))) => {
                if let Some(id) = task_ids.remove(&task) {
                    result.succeeded.insert(id);
                }
            }
            Ok((task, Err(err))) => {
                if let Some(id) = task_ids.remove(&task) {
                    tracing::debug!(event_id = %id, error = %err, %operation, "bulk call failed");
                    result.failed.insert(id, err.to_string());
                }
            }
            Err(join_err) => {
                if let Some(id) = task_ids.remove(&join_err.id()) {
                    result.failed.insert(id, format!("task failed: {join_err}"));
                }
            }
        }
    }

    if result.failed.is_empty() {
        tracing::info!(%operation, succeeded = result.succeeded.len(), "bulk operation completed");
    } else {
        tracing::warn!(
            %operation,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "bulk operation partially failed"
        );
    }
    Ok(result)
}

/// One remote mutation for one id.
pub async fn dispatch(
    directory: &dyn EventDirectory,
    operation: BulkOperation,
    event_id: &str,
) -> Result<(), RemoteError> {
    match operation {
        BulkOperation::Acknowledge => directory.acknowledge(event_id).await.map(|_| ()),
        BulkOperation::Delete => directory.delete(event_id).await,
    }
}
