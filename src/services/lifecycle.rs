//! The request state machine.
//!
//! ```text
//! Pending ──accept──▶ InProgress ──complete──▶ Completed
//!    │                    │
//!    └──────cancel────────┴──────▶ Cancelled
//! ```
//!
//! Accept and reject compute a new response list from a versioned read and
//! commit it with a version-guarded write; a concurrent change forces a
//! re-read, so no decision is ever made on stale responses.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::MonotonicClock;
use crate::db::requests::{RequestRepository, StatusUpdate};
use crate::db::{SnapshotStream, Versioned};
use crate::error::{CoreError, CoreResult};
use crate::models::requests::{
    CreateProviderResponse, CreateServiceRequest, ProviderResponse, RequestStatus, ResponseStatus,
    ServiceRequest,
};

#[derive(Clone)]
pub struct RequestLifecycleManager {
    requests: RequestRepository,
    clock: Arc<MonotonicClock>,
    cas_max_attempts: u32,
}

impl RequestLifecycleManager {
    pub fn new(requests: RequestRepository, clock: Arc<MonotonicClock>, cas_max_attempts: u32) -> Self {
        Self {
            requests,
            clock,
            cas_max_attempts: cas_max_attempts.max(1),
        }
    }

    /// Create a new Pending request with no responses.
    pub async fn submit(&self, input: CreateServiceRequest) -> CoreResult<ServiceRequest> {
        require_non_blank("serviceType", &input.service_type)?;
        require_non_blank("description", &input.description)?;
        require_non_blank("clientId", &input.client_id)?;

        let now = self.clock.now_millis();
        let request = ServiceRequest {
            request_id: Uuid::new_v4().to_string(),
            client_id: input.client_id,
            client_name: input.client_name,
            service_type: input.service_type,
            description: input.description,
            address: input.address,
            status: RequestStatus::Pending,
            responses: Vec::new(),
            accepted_provider_id: None,
            created_at: now,
            updated_at: now,
        };

        self.requests.create(&request).await?;
        info!(request_id = %request.request_id, service_type = %request.service_type, "Request submitted");
        Ok(request)
    }

    /// Record a provider's response. Only Pending requests take responses,
    /// and each provider responds at most once.
    pub async fn respond(
        &self,
        request_id: &str,
        input: CreateProviderResponse,
    ) -> CoreResult<ServiceRequest> {
        require_non_blank("providerId", &input.provider_id)?;

        let now = self.clock.now_millis();
        let response = ProviderResponse {
            provider_id: input.provider_id,
            provider_name: input.provider_name,
            provider_email: input.provider_email,
            provider_phone: input.provider_phone,
            skills: input.skills,
            message: input.message,
            contact_preferences: input.contact_preferences,
            status: ResponseStatus::Pending,
            responded_at: now,
        };

        let updated = self.requests.append_response(request_id, &response, now).await?;
        info!(request_id, provider_id = %response.provider_id, "Provider responded");
        Ok(updated)
    }

    /// Accept one provider's response: it becomes Accepted, every other
    /// response Rejected, and the request moves to InProgress.
    pub async fn accept(&self, request_id: &str, provider_id: &str) -> CoreResult<ServiceRequest> {
        let updated = self
            .with_cas(request_id, |current| {
                match current.status {
                    RequestStatus::Pending => {}
                    RequestStatus::InProgress => {
                        return Err(CoreError::Conflict(format!(
                            "request {request_id} already accepted provider {}",
                            current.accepted_provider_id.as_deref().unwrap_or("unknown")
                        )));
                    }
                    status => {
                        return Err(CoreError::InvalidTransition(format!(
                            "cannot accept a response on a {status} request"
                        )));
                    }
                }

                let responses = accepted_responses(&current.responses, provider_id).ok_or_else(|| {
                    CoreError::NotFound(format!(
                        "response from provider {provider_id} on request {request_id}"
                    ))
                })?;

                Ok(Some((
                    responses,
                    StatusUpdate {
                        status: Some(RequestStatus::InProgress),
                        accepted_provider_id: Some(provider_id.to_string()),
                    },
                )))
            })
            .await?;

        info!(request_id, provider_id, "Provider accepted");
        Ok(updated)
    }

    /// Reject one provider's response, leaving everything else untouched.
    ///
    /// Rejecting a provider with no response, or an already rejected one, is a no-op.
    pub async fn reject(&self, request_id: &str, provider_id: &str) -> CoreResult<ServiceRequest> {
        self.with_cas(request_id, |current| {
            if current.status.is_terminal() {
                return Err(CoreError::InvalidTransition(format!(
                    "cannot reject a response on a {} request",
                    current.status
                )));
            }

            match current.response_from(provider_id).map(|r| r.status) {
                None | Some(ResponseStatus::Rejected) => Ok(None),
                Some(ResponseStatus::Accepted) => Err(CoreError::InvalidTransition(format!(
                    "provider {provider_id} is the accepted provider of request {request_id}"
                ))),
                Some(ResponseStatus::Pending) => Ok(Some((
                    rejected_responses(&current.responses, provider_id),
                    StatusUpdate::default(),
                ))),
            }
        })
        .await
    }

    /// InProgress → Completed.
    pub async fn complete(&self, request_id: &str) -> CoreResult<ServiceRequest> {
        let updated = self.transition(request_id, RequestStatus::Completed).await?;
        info!(request_id, "Request completed");
        Ok(updated)
    }

    /// Pending or InProgress → Cancelled. The document is kept.
    pub async fn cancel(&self, request_id: &str) -> CoreResult<ServiceRequest> {
        let updated = self.transition(request_id, RequestStatus::Cancelled).await?;
        info!(request_id, "Request cancelled");
        Ok(updated)
    }

    /// Remove the request permanently. Ratings that reference it are kept.
    pub async fn delete(&self, request_id: &str) -> CoreResult<()> {
        if !self.requests.delete(request_id).await? {
            return Err(CoreError::NotFound(format!("request {request_id}")));
        }
        info!(request_id, "Request deleted");
        Ok(())
    }

    pub async fn get(&self, request_id: &str) -> CoreResult<Option<ServiceRequest>> {
        Ok(self.requests.get_by_id(request_id).await?.map(|v| v.value))
    }

    pub fn watch_pending(&self) -> SnapshotStream<ServiceRequest> {
        self.requests.watch_pending()
    }

    pub fn watch_by_client(&self, client_id: &str) -> SnapshotStream<ServiceRequest> {
        self.requests.watch_by_client(client_id)
    }

    pub fn watch_by_service_type(&self, service_type: &str) -> SnapshotStream<ServiceRequest> {
        self.requests.watch_by_service_type(service_type)
    }

    pub fn watch_by_provider(&self, provider_id: &str) -> SnapshotStream<ServiceRequest> {
        self.requests.watch_by_provider(provider_id)
    }

    async fn transition(&self, request_id: &str, to: RequestStatus) -> CoreResult<ServiceRequest> {
        let current = self.load(request_id).await?.value;
        if !current.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition(format!(
                "request {request_id} cannot move from {} to {to}",
                current.status
            )));
        }

        self.requests
            .transition(request_id, current.status, to, self.clock.now_millis())
            .await
    }

    async fn load(&self, request_id: &str) -> CoreResult<Versioned<ServiceRequest>> {
        self.requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("request {request_id}")))
    }

    /// Read, decide, and commit with a version-guarded write, re-reading on
    /// a lost race. `decide` returns `None` when nothing needs writing.
    async fn with_cas<F>(&self, request_id: &str, decide: F) -> CoreResult<ServiceRequest>
    where
        F: Fn(&ServiceRequest) -> CoreResult<Option<(Vec<ProviderResponse>, StatusUpdate)>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.load(request_id).await?;

            let Some((responses, changes)) = decide(&current.value)? else {
                debug!(request_id, "No change required");
                return Ok(current.value);
            };

            let result = self
                .requests
                .replace_responses(
                    request_id,
                    current.version,
                    &responses,
                    changes,
                    self.clock.now_millis(),
                )
                .await;

            match result {
                Err(CoreError::Conflict(reason)) if attempt < self.cas_max_attempts => {
                    debug!(request_id, attempt, %reason, "Concurrent write, re-reading");
                }
                Err(CoreError::Conflict(reason)) => {
                    warn!(request_id, attempt, %reason, "Giving up after repeated concurrent writes");
                    return Err(CoreError::Conflict(reason));
                }
                other => return other,
            }
        }
    }
}

/// The matched response Accepted, every other one Rejected, order preserved.
/// `None` when the provider has no response.
pub fn accepted_responses(
    responses: &[ProviderResponse],
    provider_id: &str,
) -> Option<Vec<ProviderResponse>> {
    if !responses.iter().any(|r| r.provider_id == provider_id) {
        return None;
    }

    Some(
        responses
            .iter()
            .map(|r| ProviderResponse {
                status: if r.provider_id == provider_id {
                    ResponseStatus::Accepted
                } else {
                    ResponseStatus::Rejected
                },
                ..r.clone()
            })
            .collect(),
    )
}

/// Only the targeted response Rejected.
pub fn rejected_responses(responses: &[ProviderResponse], provider_id: &str) -> Vec<ProviderResponse> {
    responses
        .iter()
        .map(|r| {
            if r.provider_id == provider_id {
                ProviderResponse {
                    status: ResponseStatus::Rejected,
                    ..r.clone()
                }
            } else {
                r.clone()
            }
        })
        .collect()
}

fn require_non_blank(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        Err(CoreError::Validation(format!("{field} must not be blank")))
    } else {
        Ok(())
    }
}
