use std::sync::Arc;
use std::time::Duration;

use super::{RATINGS, decode, timed, timed_raw};
use crate::error::{CoreError, CoreResult};
use crate::models::ratings::Rating;
use crate::store::{Direction, DocumentStore, Query, StoreError};

/// Store façade for `ratings/{ratingId}` documents.
#[derive(Clone)]
pub struct RatingRepository {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl RatingRepository {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Insert a rating. A second rating under the same id is a `Conflict`.
    pub async fn create(&self, rating: &Rating) -> CoreResult<()> {
        let body = serde_json::to_value(rating)?;
        match timed_raw(self.timeout, self.store.create(RATINGS, &rating.rating_id, body)).await? {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists { .. }) => Err(CoreError::Conflict(format!(
                "client {} already rated request {}",
                rating.client_id, rating.request_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, rating_id: &str) -> CoreResult<Option<Rating>> {
        timed(self.timeout, self.store.get(RATINGS, rating_id))
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn delete(&self, rating_id: &str) -> CoreResult<bool> {
        timed(self.timeout, self.store.delete(RATINGS, rating_id)).await
    }

    /// Every rating of a provider, newest first.
    pub async fn list_by_provider(&self, provider_id: &str) -> CoreResult<Vec<Rating>> {
        let query = Query::collection(RATINGS)
            .where_eq("providerId", provider_id)
            .order_by("createdAt", Direction::Desc);

        timed(self.timeout, self.store.query(&query))
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Whether the client has already rated the request.
    pub async fn exists_for(&self, client_id: &str, request_id: &str) -> CoreResult<bool> {
        let query = Query::collection(RATINGS)
            .where_eq("clientId", client_id)
            .where_eq("requestId", request_id)
            .limit(1);

        Ok(!timed(self.timeout, self.store.query(&query)).await?.is_empty())
    }
}
