pub mod lifecycle;
pub mod ratings;

use std::sync::Arc;

use crate::clock::MonotonicClock;
use crate::config::CoreConfig;
use crate::db::ratings::RatingRepository;
use crate::db::requests::RequestRepository;
use crate::db::users::ProviderRepository;
use crate::store::DocumentStore;

pub use lifecycle::RequestLifecycleManager;
pub use ratings::{RatingAggregator, RatingSubmission, SummaryUpdate};

/// Wire the lifecycle manager and rating aggregator over one shared store.
pub fn build(
    store: Arc<dyn DocumentStore>,
    config: &CoreConfig,
) -> (RequestLifecycleManager, RatingAggregator) {
    let clock = Arc::new(MonotonicClock::new());
    let requests = RequestRepository::new(store.clone(), config.store_timeout);

    let lifecycle =
        RequestLifecycleManager::new(requests.clone(), clock.clone(), config.cas_max_attempts);
    let ratings = RatingAggregator::new(
        RatingRepository::new(store.clone(), config.store_timeout),
        ProviderRepository::new(store, config.store_timeout),
        requests,
        clock,
        config.aggregation_policy,
        config.cas_max_attempts,
    );

    (lifecycle, ratings)
}
