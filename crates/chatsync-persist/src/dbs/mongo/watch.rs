use futures::StreamExt;
use mongodb::bson::{doc, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::options::FullDocumentType;
use mongodb::Collection;
use serde::de::DeserializeOwned;

use chatsync_types::{ChangePayload, EntityKind, RemoteChange};
use crate::error::Result;
use crate::trait_client::ChangeStream;

/// Pipeline keeping the user's own documents plus deletions.
///
/// Deletions carry no document body, so they cannot be scoped by owner; the
/// receiving side ignores ids it does not hold.
fn owner_pipeline(user_id: &str) -> Vec<Document> {
    vec![doc! {
        "$match": {
            "$or": [
                { "fullDocument.user_id": user_id },
                { "operationType": "delete" },
            ]
        }
    }]
}

/// Open a change stream on `collection` and map it into [`RemoteChange`]s.
pub async fn watch_collection<T, F>(
    collection: &Collection<T>,
    user_id: &str,
    kind: EntityKind,
    to_payload: F,
) -> Result<ChangeStream>
where
    T: DeserializeOwned + Unpin + Send + Sync + 'static,
    F: Fn(T) -> ChangePayload + Send + Sync + 'static,
{
    let events = collection
        .watch()
        .pipeline(owner_pipeline(user_id))
        .full_document(FullDocumentType::UpdateLookup)
        .await?;

    let changes = events.filter_map(move |event| {
        let change = match event {
            Ok(event) => to_change(event, kind, &to_payload),
            Err(e) => {
                tracing::warn!("{} change stream error: {}", kind, e);
                None
            }
        };
        futures::future::ready(change)
    });

    Ok(Box::pin(changes))
}

fn to_change<T, F>(event: ChangeStreamEvent<T>, kind: EntityKind, to_payload: &F) -> Option<RemoteChange>
where
    F: Fn(T) -> ChangePayload,
{
    match event.operation_type {
        OperationType::Insert => event
            .full_document
            .map(|d| RemoteChange::inserted(to_payload(d))),
        OperationType::Update | OperationType::Replace => event
            .full_document
            .map(|d| RemoteChange::updated(to_payload(d))),
        OperationType::Delete => event
            .document_key
            .as_ref()
            .and_then(|key| key.get_str("_id").ok())
            .map(|id| RemoteChange::deleted(kind, id)),
        other => {
            tracing::debug!("Ignoring {} change of type {:?}", kind, other);
            None
        }
    }
}
