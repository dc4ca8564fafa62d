use std::sync::Arc;
use std::time::Duration;

use super::{USERS, Versioned, timed};
use crate::error::CoreResult;
use crate::models::ratings::{ProviderRatingSummary, RatingCounters};
use crate::store::{DocumentStore, Update};

/// Reads and writes the rating counters of `users/{providerId}`.
#[derive(Clone)]
pub struct ProviderRepository {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl ProviderRepository {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Counters with the version they were read at. An absent record is
    /// version 0 with empty counters.
    ///
    /// `value` is `None` when the stored counters are unreadable, incomplete,
    /// out of range, or flagged stale: they must be rebuilt before use.
    pub async fn counters(&self, provider_id: &str) -> CoreResult<Versioned<Option<RatingCounters>>> {
        let Some(document) = timed(self.timeout, self.store.get(USERS, provider_id)).await? else {
            return Ok(Versioned {
                version: 0,
                value: Some(RatingCounters::default()),
            });
        };

        // A count without its sum predates the current counter layout.
        let complete = document.body.get("ratingCount").is_none()
            || document.body.get("ratingSumMillis").is_some();
        let value = serde_json::from_value::<RatingCounters>(document.body)
            .ok()
            .filter(|c| complete && !c.summary_stale && c.is_consistent());
        Ok(Versioned {
            version: document.version,
            value,
        })
    }

    /// Replace the counters and `averageRating`, provided the record is still
    /// at `expected_version`. A moved record is a `Conflict`.
    pub async fn write_counters(
        &self,
        provider_id: &str,
        expected_version: u64,
        counters: RatingCounters,
    ) -> CoreResult<ProviderRatingSummary> {
        let summary = counters.summary();
        let update = Update::new()
            .expect_version(expected_version)
            .set("ratingCount", counters.rating_count)
            .set("ratingSumMillis", counters.rating_sum_millis)
            .set("averageRating", summary.average_rating)
            .set("summaryStale", false)
            .upsert();

        timed(self.timeout, self.store.update(USERS, provider_id, update)).await?;
        Ok(summary)
    }

    /// Flag the counters so the next reader rebuilds them.
    pub async fn mark_stale(&self, provider_id: &str) -> CoreResult<()> {
        let update = Update::new().set("summaryStale", true).upsert();
        timed(self.timeout, self.store.update(USERS, provider_id, update)).await?;
        Ok(())
    }
}
