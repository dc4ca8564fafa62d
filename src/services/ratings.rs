use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::MonotonicClock;
use crate::config::AggregationPolicy;
use crate::db::ratings::RatingRepository;
use crate::db::requests::RequestRepository;
use crate::db::Versioned;
use crate::db::users::ProviderRepository;
use crate::error::{CoreError, CoreResult};
use crate::models::ratings::{
    CreateRating, MAX_RATING, MIN_RATING, ProviderRatingSummary, Rating, RatingCounters, to_millis,
};
use crate::models::requests::RequestStatus;

/// What happened to the provider summary after the primary write.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryUpdate {
    Updated(ProviderRatingSummary),
    /// The summary write failed; the provider is flagged and rebuilt on the next read or event.
    Deferred { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingSubmission {
    pub rating: Rating,
    pub summary: SummaryUpdate,
}

/// Keeps each provider's `averageRating`/`ratingCount` in step with their ratings.
#[derive(Clone)]
pub struct RatingAggregator {
    ratings: RatingRepository,
    providers: ProviderRepository,
    requests: RequestRepository,
    clock: Arc<MonotonicClock>,
    policy: AggregationPolicy,
    cas_max_attempts: u32,
    failures: Arc<AtomicU64>,
    /// Providers whose counters missed an event in this process.
    dirty: Arc<RwLock<HashSet<String>>>,
}

impl RatingAggregator {
    pub fn new(
        ratings: RatingRepository,
        providers: ProviderRepository,
        requests: RequestRepository,
        clock: Arc<MonotonicClock>,
        policy: AggregationPolicy,
        cas_max_attempts: u32,
    ) -> Self {
        Self {
            ratings,
            providers,
            requests,
            clock,
            policy,
            cas_max_attempts: cas_max_attempts.max(1),
            failures: Arc::new(AtomicU64::new(0)),
            dirty: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Rate the accepted provider of a completed request, then update their summary.
    pub async fn submit_rating(&self, input: CreateRating) -> CoreResult<RatingSubmission> {
        if !input.value.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&input.value) {
            return Err(CoreError::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}, got {}",
                input.value
            )));
        }

        let request = self
            .requests
            .get_by_id(&input.request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("request {}", input.request_id)))?
            .value;

        if request.status != RequestStatus::Completed {
            return Err(CoreError::InvalidTransition(format!(
                "request {} is {}, only completed requests can be rated",
                request.request_id, request.status
            )));
        }
        if request.client_id != input.client_id {
            return Err(CoreError::Validation(format!(
                "client {} did not submit request {}",
                input.client_id, request.request_id
            )));
        }
        if request.accepted_provider_id.as_deref() != Some(input.provider_id.as_str()) {
            return Err(CoreError::Validation(format!(
                "provider {} did not fulfil request {}",
                input.provider_id, request.request_id
            )));
        }

        let rating = Rating {
            rating_id: Rating::id_for(&input.request_id, &input.client_id),
            client_id: input.client_id,
            client_name: input.client_name,
            provider_id: input.provider_id,
            provider_name: input.provider_name,
            request_id: input.request_id,
            rating_value: input.value,
            comment: input.comment,
            created_at: self.clock.now_millis(),
        };

        // Counters are read before the rating lands so the delta applies to a
        // state that does not include it yet.
        let before = self.providers.counters(&rating.provider_id).await;
        self.ratings.create(&rating).await?;
        info!(rating_id = %rating.rating_id, provider_id = %rating.provider_id, value = rating.rating_value, "Rating submitted");

        let result = self
            .fold_in(&rating.provider_id, before, to_millis(rating.rating_value), 1)
            .await;
        let summary = self.aggregate(&rating.provider_id, result).await?;

        Ok(RatingSubmission { rating, summary })
    }

    /// Delete a rating and take it out of the provider's summary.
    pub async fn delete_rating(&self, rating_id: &str) -> CoreResult<SummaryUpdate> {
        let rating = self
            .ratings
            .get(rating_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("rating {rating_id}")))?;

        let before = self.providers.counters(&rating.provider_id).await;
        if !self.ratings.delete(rating_id).await? {
            // Someone else deleted it first and already adjusted the counters.
            return Err(CoreError::NotFound(format!("rating {rating_id}")));
        }
        info!(rating_id, provider_id = %rating.provider_id, "Rating deleted");

        let result = self
            .fold_in(&rating.provider_id, before, -to_millis(rating.rating_value), -1)
            .await;
        self.aggregate(&rating.provider_id, result).await
    }

    /// Rebuild a provider's summary from every stored rating.
    pub async fn recompute_summary(&self, provider_id: &str) -> CoreResult<ProviderRatingSummary> {
        let summary = self.rebuild(provider_id).await?;
        info!(provider_id, count = summary.rating_count, average = summary.average_rating, "Rating summary recomputed");
        Ok(summary)
    }

    /// Current summary. Counters that are flagged or unreadable are rebuilt first.
    pub async fn summary(&self, provider_id: &str) -> CoreResult<ProviderRatingSummary> {
        let current = self.providers.counters(provider_id).await?;
        let dirty = self.is_dirty(provider_id).await;
        match current.value {
            Some(counters) if !dirty => Ok(counters.summary()),
            _ => self.rebuild(provider_id).await,
        }
    }

    pub async fn rating(&self, rating_id: &str) -> CoreResult<Option<Rating>> {
        self.ratings.get(rating_id).await
    }

    pub async fn has_rated(&self, client_id: &str, request_id: &str) -> CoreResult<bool> {
        self.ratings.exists_for(client_id, request_id).await
    }

    pub async fn ratings_for(&self, provider_id: &str) -> CoreResult<Vec<Rating>> {
        self.ratings.list_by_provider(provider_id).await
    }

    /// Summary updates that failed since start-up.
    pub fn aggregation_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn is_dirty(&self, provider_id: &str) -> bool {
        self.dirty.read().await.contains(provider_id)
    }

    /// Apply one rating event to the counters read before it, falling back to
    /// a full rebuild when they cannot be trusted or moved in the meantime.
    async fn fold_in(
        &self,
        provider_id: &str,
        before: CoreResult<Versioned<Option<RatingCounters>>>,
        sum_delta_millis: i64,
        count_delta: i64,
    ) -> CoreResult<ProviderRatingSummary> {
        let dirty = self.is_dirty(provider_id).await;
        let base = match before {
            Ok(Versioned {
                version,
                value: Some(counters),
            }) if !dirty => counters
                .apply(sum_delta_millis, count_delta)
                .map(|next| (version, next)),
            Ok(_) => None,
            Err(e) => {
                debug!(provider_id, "Could not read rating counters: {e}");
                None
            }
        };

        if let Some((version, next)) = base {
            match self.providers.write_counters(provider_id, version, next).await {
                Ok(summary) => return Ok(summary),
                Err(CoreError::Conflict(reason)) => {
                    debug!(provider_id, %reason, "Rating counters moved, rebuilding");
                }
                Err(e) => warn!(provider_id, "Rating counter write failed, rebuilding: {e}"),
            }
        } else {
            debug!(provider_id, "Rating counters out of step, rebuilding");
        }

        self.rebuild(provider_id).await
    }

    /// Recount every rating of the provider and write the result, guarded by
    /// the record version read before the scan.
    async fn rebuild(&self, provider_id: &str) -> CoreResult<ProviderRatingSummary> {
        let was_dirty = self.dirty.write().await.remove(provider_id);

        let result = self.rebuild_with_cas(provider_id).await;
        if result.is_err() && was_dirty {
            self.dirty.write().await.insert(provider_id.to_string());
        }
        result
    }

    async fn rebuild_with_cas(&self, provider_id: &str) -> CoreResult<ProviderRatingSummary> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let version = self.providers.counters(provider_id).await?.version;
            let ratings = self.ratings.list_by_provider(provider_id).await?;
            let counters = RatingCounters::from_values(ratings.iter().map(|r| r.rating_value));

            match self.providers.write_counters(provider_id, version, counters).await {
                Err(CoreError::Conflict(reason)) if attempt < self.cas_max_attempts => {
                    debug!(provider_id, attempt, %reason, "Concurrent rating event, recounting");
                }
                other => return other,
            }
        }
    }

    async fn aggregate(
        &self,
        provider_id: &str,
        result: CoreResult<ProviderRatingSummary>,
    ) -> CoreResult<SummaryUpdate> {
        match result {
            Ok(summary) => Ok(SummaryUpdate::Updated(summary)),
            Err(e) => {
                self.dirty.write().await.insert(provider_id.to_string());
                if let Err(mark) = self.providers.mark_stale(provider_id).await {
                    debug!(provider_id, "Could not flag rating counters as stale: {mark}");
                }

                let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(provider_id, failures = total, policy = ?self.policy, "Rating summary update failed: {e}");
                match self.policy {
                    AggregationPolicy::LogAndContinue => Ok(SummaryUpdate::Deferred {
                        reason: e.to_string(),
                    }),
                    AggregationPolicy::FailLoud => Err(e),
                }
            }
        }
    }
}
