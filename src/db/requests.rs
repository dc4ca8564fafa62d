use std::sync::Arc;
use std::time::Duration;

use super::{REQUESTS, SnapshotStream, Versioned, decode, decode_versioned, timed, timed_raw, watch_decoded};
use crate::error::{CoreError, CoreResult};
use crate::models::requests::{ProviderResponse, RequestStatus, ServiceRequest};
use crate::store::{Direction, DocumentStore, Precondition, Query, StoreError, Update};

/// Top-level fields written together with a replaced response list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<RequestStatus>,
    pub accepted_provider_id: Option<String>,
}

/// Store façade for `requests/{requestId}` documents. Holds no lifecycle rules.
#[derive(Clone)]
pub struct RequestRepository {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl RequestRepository {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Insert a new request keyed by its `request_id`.
    pub async fn create(&self, request: &ServiceRequest) -> CoreResult<()> {
        let body = serde_json::to_value(request)?;
        timed(self.timeout, self.store.create(REQUESTS, &request.request_id, body)).await?;
        Ok(())
    }

    /// Point read. `Ok(None)` when the request does not exist.
    pub async fn get_by_id(&self, request_id: &str) -> CoreResult<Option<Versioned<ServiceRequest>>> {
        timed(self.timeout, self.store.get(REQUESTS, request_id))
            .await?
            .map(decode_versioned)
            .transpose()
    }

    /// Atomic list append evaluated by the store.
    ///
    /// Refused when the request is no longer pending or the provider already responded.
    pub async fn append_response(
        &self,
        request_id: &str,
        response: &ProviderResponse,
        now: i64,
    ) -> CoreResult<ServiceRequest> {
        let update = Update::new()
            .expect_field("status", RequestStatus::Pending.as_str())
            .expect_no_element("responses", "providerId", response.provider_id.as_str())
            .append("responses", serde_json::to_value(response)?)
            .set("updatedAt", now);

        match timed_raw(self.timeout, self.store.update(REQUESTS, request_id, update)).await? {
            Ok(document) => decode(document),
            Err(StoreError::PreconditionFailed(Precondition::FieldEquals { .. })) => {
                Err(CoreError::InvalidTransition(format!(
                    "request {request_id} is no longer accepting responses"
                )))
            }
            Err(StoreError::PreconditionFailed(Precondition::NoElementWith { .. })) => {
                Err(CoreError::Conflict(format!(
                    "provider {} already responded to request {request_id}",
                    response.provider_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a whole response list plus status fields, guarded by the version
    /// the caller computed them from. A concurrent write yields `Conflict`.
    pub async fn replace_responses(
        &self,
        request_id: &str,
        expected_version: u64,
        responses: &[ProviderResponse],
        changes: StatusUpdate,
        now: i64,
    ) -> CoreResult<ServiceRequest> {
        let mut update = Update::new()
            .expect_version(expected_version)
            .set("responses", serde_json::to_value(responses)?)
            .set("updatedAt", now);
        if let Some(status) = changes.status {
            update = update.set("status", status.as_str());
        }
        if let Some(provider_id) = changes.accepted_provider_id {
            update = update.set("acceptedProviderId", provider_id);
        }

        let document = timed(self.timeout, self.store.update(REQUESTS, request_id, update)).await?;
        decode(document)
    }

    /// Move the request from `from` to `to` if it is still in `from`.
    pub async fn transition(
        &self,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        now: i64,
    ) -> CoreResult<ServiceRequest> {
        let update = Update::new()
            .expect_field("status", from.as_str())
            .set("status", to.as_str())
            .set("updatedAt", now);

        let document = timed(self.timeout, self.store.update(REQUESTS, request_id, update)).await?;
        decode(document)
    }

    /// Hard delete. Returns whether the request existed.
    pub async fn delete(&self, request_id: &str) -> CoreResult<bool> {
        timed(self.timeout, self.store.delete(REQUESTS, request_id)).await
    }

    pub fn watch_pending(&self) -> SnapshotStream<ServiceRequest> {
        self.watch(newest_first().where_eq("status", RequestStatus::Pending.as_str()))
    }

    pub fn watch_by_client(&self, client_id: &str) -> SnapshotStream<ServiceRequest> {
        self.watch(newest_first().where_eq("clientId", client_id))
    }

    pub fn watch_by_service_type(&self, service_type: &str) -> SnapshotStream<ServiceRequest> {
        self.watch(newest_first().where_eq("serviceType", service_type))
    }

    /// Requests a provider has been accepted on.
    pub fn watch_by_provider(&self, provider_id: &str) -> SnapshotStream<ServiceRequest> {
        self.watch(newest_first().where_eq("acceptedProviderId", provider_id))
    }

    fn watch(&self, query: Query) -> SnapshotStream<ServiceRequest> {
        watch_decoded(self.store.clone(), query)
    }
}

fn newest_first() -> Query {
    Query::collection(REQUESTS).order_by("createdAt", Direction::Desc)
}
