use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{Change, Document, DocumentStore, Query, StoreError};

/// Full result-set snapshots of a live query. Ends after the first error.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>, StoreError>>;

struct WatchState {
    store: Arc<dyn DocumentStore>,
    query: Query,
    changes: broadcast::Receiver<Change>,
    last: Option<Vec<Document>>,
    finished: bool,
}

/// Open a push-based subscription over `query`.
///
/// The first item is the current result set; afterwards a new snapshot is
/// emitted whenever a write to the collection changes the result set.
pub fn watch(store: Arc<dyn DocumentStore>, query: Query) -> SnapshotStream {
    // Subscribe before the first read so no write slips in between.
    let changes = store.changes();
    let state = WatchState {
        store,
        query,
        changes,
        last: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            if state.last.is_some() {
                match state.changes.recv().await {
                    Ok(change) if change.collection != state.query.collection => continue,
                    // A lagged receiver missed notifications; re-reading covers them.
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                }
            }

            match state.store.query(&state.query).await {
                Ok(snapshot) => {
                    if state.last.as_ref() == Some(&snapshot) {
                        continue;
                    }
                    state.last = Some(snapshot.clone());
                    return Some((Ok(snapshot), state));
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
    .boxed()
}
