//! Integration tests for rating submission and provider summaries.
//!
//! Run with: `cargo test --test ratings_test`
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use fixlink_backend::config::{AggregationPolicy, CoreConfig};
use fixlink_backend::error::CoreError;
use fixlink_backend::models::ratings::{CreateRating, ProviderRatingSummary};
use fixlink_backend::models::requests::{CreateProviderResponse, CreateServiceRequest};
use fixlink_backend::services::{self, RatingAggregator, RequestLifecycleManager, SummaryUpdate};
use fixlink_backend::store::{Change, Document, DocumentStore, MemoryStore, Query, StoreError, Update};

/// Delegates to a [`MemoryStore`] but fails the next `failures` writes to provider records.
struct FlakyUsersStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl FlakyUsersStore {
    fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
        })
    }

    fn broken() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    fn should_fail(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FlakyUsersStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn create(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError> {
        self.inner.create(collection, id, body).await
    }

    async fn update(&self, collection: &str, id: &str, update: Update) -> Result<Document, StoreError> {
        if collection == "users" && self.should_fail() {
            return Err(StoreError::Backend("users table unavailable".to_string()));
        }
        self.inner.update(collection, id, update).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.inner.query(query).await
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.inner.changes()
    }
}

fn build(store: Arc<dyn DocumentStore>, policy: AggregationPolicy) -> (RequestLifecycleManager, RatingAggregator) {
    let config = CoreConfig {
        aggregation_policy: policy,
        ..CoreConfig::default()
    };
    services::build(store, &config)
}

fn expect_updated(summary: &SummaryUpdate) -> &ProviderRatingSummary {
    match summary {
        SummaryUpdate::Updated(summary) => summary,
        other => panic!("expected an updated summary, got {other:?}"),
    }
}

fn memory() -> (RequestLifecycleManager, RatingAggregator) {
    build(Arc::new(MemoryStore::new()), AggregationPolicy::LogAndContinue)
}

/// Submit, respond, accept and complete a request; returns its id.
async fn completed_job(lifecycle: &RequestLifecycleManager, client_id: &str, provider_id: &str) -> String {
    let request = lifecycle
        .submit(CreateServiceRequest {
            client_id: client_id.to_string(),
            client_name: "Casey".to_string(),
            service_type: "electrical".to_string(),
            description: "Replace a light switch".to_string(),
            address: None,
        })
        .await
        .unwrap();

    lifecycle
        .respond(
            &request.request_id,
            CreateProviderResponse {
                provider_id: provider_id.to_string(),
                provider_name: "Pat".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    lifecycle.accept(&request.request_id, provider_id).await.unwrap();
    lifecycle.complete(&request.request_id).await.unwrap();

    request.request_id
}

fn rating(client_id: &str, provider_id: &str, request_id: &str, value: f64) -> CreateRating {
    CreateRating {
        client_id: client_id.to_string(),
        client_name: "Casey".to_string(),
        provider_id: provider_id.to_string(),
        provider_name: "Pat".to_string(),
        request_id: request_id.to_string(),
        value,
        comment: "Great work".to_string(),
    }
}

#[tokio::test]
async fn test_two_ratings_average_out() {
    let (lifecycle, ratings) = memory();
    let first = completed_job(&lifecycle, "c1", "p1").await;
    let second = completed_job(&lifecycle, "c2", "p1").await;

    ratings.submit_rating(rating("c1", "p1", &first, 4.0)).await.unwrap();
    let submission = ratings.submit_rating(rating("c2", "p1", &second, 5.0)).await.unwrap();

    match submission.summary {
        SummaryUpdate::Updated(summary) => {
            assert_eq!(summary.average_rating, 4.5);
            assert_eq!(summary.rating_count, 2);
        }
        other => panic!("expected an updated summary, got {other:?}"),
    }

    let stored = ratings.summary("p1").await.unwrap();
    assert_eq!(stored.average_rating, 4.5);
    assert_eq!(stored.rating_count, 2);
    assert_eq!(ratings.aggregation_failures(), 0);
}

#[tokio::test]
async fn test_average_tracks_creates_and_deletes() {
    let (lifecycle, ratings) = memory();

    let mut ids = Vec::new();
    for (client, value) in [("c1", 1.0), ("c2", 4.0), ("c3", 5.0), ("c4", 2.5)] {
        let job = completed_job(&lifecycle, client, "p1").await;
        let submission = ratings.submit_rating(rating(client, "p1", &job, value)).await.unwrap();
        ids.push(submission.rating.rating_id);
    }

    ratings.delete_rating(&ids[0]).await.unwrap();
    ratings.delete_rating(&ids[3]).await.unwrap();

    let summary = ratings.summary("p1").await.unwrap();
    assert_eq!(summary.rating_count, 2);
    assert!((summary.average_rating - 4.5).abs() < 1e-9);

    let recomputed = ratings.recompute_summary("p1").await.unwrap();
    assert_eq!(recomputed.rating_count, summary.rating_count);
    assert!((recomputed.average_rating - summary.average_rating).abs() < 1e-9);

    ratings.delete_rating(&ids[1]).await.unwrap();
    ratings.delete_rating(&ids[2]).await.unwrap();
    let empty = ratings.summary("p1").await.unwrap();
    assert_eq!(empty.rating_count, 0);
    assert_eq!(empty.average_rating, 0.0);
}

#[tokio::test]
async fn test_out_of_range_values_are_rejected() {
    let (lifecycle, ratings) = memory();
    let job = completed_job(&lifecycle, "c1", "p1").await;

    for value in [-0.5, 5.5, f64::NAN, f64::INFINITY] {
        let result = ratings.submit_rating(rating("c1", "p1", &job, value)).await;
        assert!(matches!(result, Err(CoreError::Validation(_))), "value {value} was accepted");
    }

    // Bounds are inclusive.
    ratings.submit_rating(rating("c1", "p1", &job, 0.0)).await.unwrap();
}

#[tokio::test]
async fn test_rating_requires_a_completed_job_for_that_provider() {
    let (lifecycle, ratings) = memory();

    let missing = ratings.submit_rating(rating("c1", "p1", "no-such-request", 4.0)).await;
    assert!(matches!(missing, Err(CoreError::NotFound(_))));

    let open = lifecycle
        .submit(CreateServiceRequest {
            client_id: "c1".to_string(),
            client_name: "Casey".to_string(),
            service_type: "painting".to_string(),
            description: "Paint the fence".to_string(),
            address: None,
        })
        .await
        .unwrap();
    let pending = ratings.submit_rating(rating("c1", "p1", &open.request_id, 4.0)).await;
    assert!(matches!(pending, Err(CoreError::InvalidTransition(_))));

    let job = completed_job(&lifecycle, "c1", "p1").await;
    let wrong_provider = ratings.submit_rating(rating("c1", "p2", &job, 4.0)).await;
    assert!(matches!(wrong_provider, Err(CoreError::Validation(_))));

    assert_eq!(ratings.summary("p2").await.unwrap().rating_count, 0);
}

#[tokio::test]
async fn test_second_rating_for_same_request_conflicts() {
    let (lifecycle, ratings) = memory();
    let job = completed_job(&lifecycle, "c1", "p1").await;

    ratings.submit_rating(rating("c1", "p1", &job, 4.0)).await.unwrap();
    assert!(ratings.has_rated("c1", &job).await.unwrap());

    let again = ratings.submit_rating(rating("c1", "p1", &job, 1.0)).await;
    assert!(matches!(again, Err(CoreError::Conflict(_))));

    let summary = ratings.summary("p1").await.unwrap();
    assert_eq!(summary.rating_count, 1);
    assert_eq!(summary.average_rating, 4.0);
}

#[tokio::test]
async fn test_delete_missing_rating_is_not_found() {
    let (_, ratings) = memory();
    let result = ratings.delete_rating("nope").await;
    assert!(matches!(result, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn test_summary_failure_is_deferred_under_log_policy() {
    let (lifecycle, ratings) = build(FlakyUsersStore::broken(), AggregationPolicy::LogAndContinue);
    let job = completed_job(&lifecycle, "c1", "p1").await;

    let submission = ratings.submit_rating(rating("c1", "p1", &job, 3.0)).await.unwrap();

    assert!(matches!(submission.summary, SummaryUpdate::Deferred { .. }));
    assert_eq!(ratings.aggregation_failures(), 1);
    // The rating itself is kept.
    assert_eq!(ratings.ratings_for("p1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_summary_failure_is_an_error_under_fail_policy() {
    let (lifecycle, ratings) = build(FlakyUsersStore::broken(), AggregationPolicy::FailLoud);
    let job = completed_job(&lifecycle, "c1", "p1").await;

    let result = ratings.submit_rating(rating("c1", "p1", &job, 3.0)).await;

    assert!(matches!(result, Err(CoreError::Remote(_))));
    assert_eq!(ratings.aggregation_failures(), 1);
    assert!(ratings.has_rated("c1", &job).await.unwrap());
}

#[tokio::test]
async fn test_failed_counter_write_is_healed_within_the_same_event() {
    let (lifecycle, ratings) = build(FlakyUsersStore::failing(1), AggregationPolicy::LogAndContinue);
    let first = completed_job(&lifecycle, "c1", "p1").await;
    let second = completed_job(&lifecycle, "c2", "p1").await;

    let submission = ratings.submit_rating(rating("c1", "p1", &first, 4.0)).await.unwrap();
    assert_eq!(expect_updated(&submission.summary).rating_count, 1);

    let submission = ratings.submit_rating(rating("c2", "p1", &second, 5.0)).await.unwrap();
    let summary = expect_updated(&submission.summary);
    assert_eq!(summary.rating_count, 2);
    assert_eq!(summary.average_rating, 4.5);
    assert_eq!(ratings.aggregation_failures(), 0);
}

#[tokio::test]
async fn test_deferred_rating_is_counted_by_the_next_event() {
    let (lifecycle, ratings) = build(FlakyUsersStore::failing(3), AggregationPolicy::LogAndContinue);
    let first = completed_job(&lifecycle, "c1", "p1").await;
    let second = completed_job(&lifecycle, "c2", "p1").await;

    let deferred = ratings.submit_rating(rating("c1", "p1", &first, 4.0)).await.unwrap();
    assert!(matches!(deferred.summary, SummaryUpdate::Deferred { .. }));
    assert_eq!(ratings.aggregation_failures(), 1);

    let submission = ratings.submit_rating(rating("c2", "p1", &second, 5.0)).await.unwrap();
    let summary = expect_updated(&submission.summary);
    assert_eq!(summary.rating_count, 2);
    assert_eq!(summary.average_rating, 4.5);
    assert_eq!(ratings.summary("p1").await.unwrap(), *summary);
}

#[tokio::test]
async fn test_deleting_a_deferred_rating_never_goes_negative() {
    let (lifecycle, ratings) = build(FlakyUsersStore::failing(3), AggregationPolicy::LogAndContinue);
    let job = completed_job(&lifecycle, "c1", "p1").await;

    let deferred = ratings.submit_rating(rating("c1", "p1", &job, 4.0)).await.unwrap();
    assert!(matches!(deferred.summary, SummaryUpdate::Deferred { .. }));

    let after_delete = ratings.delete_rating(&deferred.rating.rating_id).await.unwrap();
    assert_eq!(*expect_updated(&after_delete), ProviderRatingSummary::default());
    assert_eq!(ratings.summary("p1").await.unwrap(), ProviderRatingSummary::default());

    let again = completed_job(&lifecycle, "c2", "p1").await;
    let submission = ratings.submit_rating(rating("c2", "p1", &again, 4.0)).await.unwrap();
    let summary = expect_updated(&submission.summary);
    assert_eq!(summary.rating_count, 1);
    assert_eq!(summary.average_rating, 4.0);
}

#[tokio::test]
async fn test_stale_flag_is_honoured_by_another_instance() {
    // Delta write and rebuild fail; the stale flag itself lands.
    let store = FlakyUsersStore::failing(2);
    let (lifecycle, writer) = build(store.clone(), AggregationPolicy::LogAndContinue);
    let (_, reader) = build(store, AggregationPolicy::LogAndContinue);
    let job = completed_job(&lifecycle, "c1", "p1").await;

    let deferred = writer.submit_rating(rating("c1", "p1", &job, 3.5)).await.unwrap();
    assert!(matches!(deferred.summary, SummaryUpdate::Deferred { .. }));

    let summary = reader.summary("p1").await.unwrap();
    assert_eq!(summary.rating_count, 1);
    assert_eq!(summary.average_rating, 3.5);
    assert_eq!(reader.aggregation_failures(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recompute_racing_submissions_never_double_counts() {
    let config = CoreConfig {
        cas_max_attempts: 50,
        ..CoreConfig::default()
    };
    let (lifecycle, ratings) = services::build(Arc::new(MemoryStore::new()), &config);

    let values = [1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0, 2.0];
    let mut jobs = Vec::new();
    for i in 0..values.len() {
        jobs.push(completed_job(&lifecycle, &format!("c{i}"), "p1").await);
    }

    let mut tasks = Vec::new();
    for (i, (job, value)) in jobs.into_iter().zip(values).enumerate() {
        let submitter = ratings.clone();
        tasks.push(tokio::spawn(async move {
            submitter
                .submit_rating(rating(&format!("c{i}"), "p1", &job, value))
                .await
                .map(|_| ())
        }));
        let recomputer = ratings.clone();
        tasks.push(tokio::spawn(async move { recomputer.recompute_summary("p1").await.map(|_| ()) }));
    }
    for task in tasks {
        // A recompute may give up on a busy record; that is fine here.
        let _ = task.await.unwrap();
    }

    let summary = ratings.summary("p1").await.unwrap();
    assert_eq!(summary.rating_count, 8);
    assert_eq!(summary.average_rating, 3.0);
    assert_eq!(ratings.recompute_summary("p1").await.unwrap(), summary);
}

#[tokio::test]
async fn test_create_then_delete_leaves_no_rounding_residue() {
    let (lifecycle, ratings) = memory();
    let first = completed_job(&lifecycle, "c1", "p1").await;
    let second = completed_job(&lifecycle, "c2", "p1").await;

    ratings.submit_rating(rating("c1", "p1", &first, 0.1)).await.unwrap();
    let submission = ratings.submit_rating(rating("c2", "p1", &second, 0.2)).await.unwrap();
    ratings.delete_rating(&submission.rating.rating_id).await.unwrap();

    let summary = ratings.summary("p1").await.unwrap();
    assert_eq!(summary.rating_count, 1);
    assert_eq!(summary.average_rating, 0.1);
}

#[tokio::test]
async fn test_unreadable_counters_are_rebuilt() {
    let store = Arc::new(MemoryStore::new());
    store
        .create("users", "p1", json!({ "email": "pat@example.com", "ratingCount": -1, "ratingSum": -4.0 }))
        .await
        .unwrap();
    let (lifecycle, ratings) = build(store.clone(), AggregationPolicy::LogAndContinue);

    assert_eq!(ratings.summary("p1").await.unwrap(), ProviderRatingSummary::default());

    let job = completed_job(&lifecycle, "c1", "p1").await;
    let submission = ratings.submit_rating(rating("c1", "p1", &job, 4.0)).await.unwrap();
    assert_eq!(expect_updated(&submission.summary).rating_count, 1);

    let user = store.get("users", "p1").await.unwrap().unwrap();
    assert_eq!(user.body["email"], json!("pat@example.com"));
    assert_eq!(user.body["ratingCount"], json!(1));
    assert_eq!(user.body["ratingSumMillis"], json!(4000));
}
