pub mod ratings;
pub mod requests;
pub mod users;

use futures_util::StreamExt;
use futures_util::future;
use futures_util::stream::BoxStream;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::store::{
    ChangeFeed, Document, DocumentStore, MemoryStore, PgDocumentStore, Query, StoreError, watch,
};

pub const REQUESTS: &str = "requests";
pub const RATINGS: &str = "ratings";
pub const USERS: &str = "users";

/// A decoded document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Live snapshots of decoded documents. Ends after the first error.
pub type SnapshotStream<T> = BoxStream<'static, CoreResult<Vec<T>>>;

/// Build the document store: Postgres when `database_url` is set, in-memory otherwise.
/// With `redis_url`, change notifications are relayed between instances.
pub async fn create_store(
    database_url: Option<&str>,
    redis_url: Option<&str>,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let mut feed = ChangeFeed::default();
    if let Some(url) = redis_url {
        feed = feed
            .with_redis(url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to Redis: {e}")))?;
        tracing::info!("Change feed relayed through Redis");
    }

    match database_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to connect to database: {e}")))?;
            Migrator::up(&db, None)
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to run migrations: {e}")))?;
            tracing::info!("Using Postgres document store");
            Ok(Arc::new(PgDocumentStore::new(db, feed)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory document store");
            Ok(Arc::new(MemoryStore::with_feed(feed)))
        }
    }
}

/// Bound a store call by `limit`, mapping store failures into [`CoreError`].
pub(crate) async fn timed<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> CoreResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::Timeout(limit)),
    }
}

/// Same as [`timed`] but leaves the store error intact for callers that
/// interpret specific failures.
pub(crate) async fn timed_raw<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> CoreResult<Result<T, StoreError>> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| CoreError::Timeout(limit))
}

pub(crate) fn decode<T: DeserializeOwned>(document: Document) -> CoreResult<T> {
    Ok(serde_json::from_value(document.body)?)
}

pub(crate) fn decode_versioned<T: DeserializeOwned>(document: Document) -> CoreResult<Versioned<T>> {
    let version = document.version;
    Ok(Versioned {
        version,
        value: decode(document)?,
    })
}

/// Open a live query and decode every snapshot into `T`.
pub(crate) fn watch_decoded<T>(store: Arc<dyn DocumentStore>, query: Query) -> SnapshotStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    watch(store, query)
        .map(|snapshot| {
            snapshot
                .map_err(CoreError::from)
                .and_then(|docs| docs.into_iter().map(decode).collect::<CoreResult<Vec<T>>>())
        })
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}
