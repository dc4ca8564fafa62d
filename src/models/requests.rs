use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Request status stored as a lowercase string in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and Cancelled accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (InProgress, Completed) | (Pending, Cancelled) | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single provider response, stored lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default)]
    pub unit: Option<String>,
}

/// A provider's offer, embedded in the `responses` list of its request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub provider_id: String,
    pub provider_name: String,
    #[serde(default)]
    pub provider_email: String,
    #[serde(default)]
    pub provider_phone: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub contact_preferences: Vec<String>,
    pub status: ResponseStatus,
    pub responded_at: i64,
}

/// The `requests/{requestId}` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub request_id: String,
    pub client_id: String,
    pub client_name: String,
    pub service_type: String,
    pub description: String,
    #[serde(default)]
    pub address: Option<Address>,
    pub status: RequestStatus,
    #[serde(default)]
    pub responses: Vec<ProviderResponse>,
    #[serde(default)]
    pub accepted_provider_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ServiceRequest {
    pub fn response_from(&self, provider_id: &str) -> Option<&ProviderResponse> {
        self.responses.iter().find(|r| r.provider_id == provider_id)
    }

    pub fn accepted_response(&self) -> Option<&ProviderResponse> {
        self.responses
            .iter()
            .find(|r| r.status == ResponseStatus::Accepted)
    }

    /// `acceptedProviderId` is set iff exactly one response is Accepted,
    /// and an accepted request is past Pending.
    pub fn is_consistent(&self) -> bool {
        let accepted: Vec<&ProviderResponse> = self
            .responses
            .iter()
            .filter(|r| r.status == ResponseStatus::Accepted)
            .collect();

        match (&self.accepted_provider_id, accepted.as_slice()) {
            (None, []) => true,
            (Some(id), [only]) => only.provider_id == *id && self.status != RequestStatus::Pending,
            _ => false,
        }
    }
}

// ── DTOs ──

/// Input for submitting a new request. Ids, status and timestamps are assigned on submit.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateServiceRequest {
    pub client_id: String,
    pub client_name: String,
    pub service_type: String,
    pub description: String,
    pub address: Option<Address>,
}

/// Input for a provider responding to a request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProviderResponse {
    pub provider_id: String,
    pub provider_name: String,
    #[serde(default)]
    pub provider_email: String,
    #[serde(default)]
    pub provider_phone: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub contact_preferences: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(address: Option<Address>, responses: Vec<ProviderResponse>) -> ServiceRequest {
        ServiceRequest {
            request_id: "r1".to_string(),
            client_id: "c1".to_string(),
            client_name: "Casey".to_string(),
            service_type: "plumbing".to_string(),
            description: "Leaking sink".to_string(),
            address,
            status: RequestStatus::Pending,
            responses,
            accepted_provider_id: None,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn encodes_empty_responses_and_null_address() {
        let request = sample(None, Vec::new());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["address"], json!(null));
        assert_eq!(value["responses"], json!([]));
        assert_eq!(value["acceptedProviderId"], json!(null));
        assert_eq!(value["status"], json!("pending"));

        let decoded: ServiceRequest = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_fields_use_store_names() {
        let response = ProviderResponse {
            provider_id: "p1".to_string(),
            provider_name: "Pat".to_string(),
            provider_email: "pat@example.com".to_string(),
            provider_phone: "555-0100".to_string(),
            skills: ["plumbing".to_string(), "heating".to_string()].into(),
            message: Some("Available tomorrow".to_string()),
            contact_preferences: vec!["phone".to_string()],
            status: ResponseStatus::Pending,
            responded_at: 1_700_000_000_500,
        };
        let mut request = sample(
            Some(Address {
                street: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                state: "IL".to_string(),
                zip_code: "62701".to_string(),
                unit: None,
            }),
            vec![response],
        );
        request.status = RequestStatus::InProgress;

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["status"], json!("in_progress"));
        assert_eq!(value["address"]["zipCode"], json!("62701"));
        assert_eq!(value["responses"][0]["providerEmail"], json!("pat@example.com"));
        assert_eq!(value["responses"][0]["skills"], json!(["heating", "plumbing"]));
        assert_eq!(value["responses"][0]["respondedAt"], json!(1_700_000_000_500i64));

        let decoded: ServiceRequest = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn consistency_requires_single_accepted_response() {
        let mut request = sample(None, Vec::new());
        assert!(request.is_consistent());

        request.accepted_provider_id = Some("p1".to_string());
        assert!(!request.is_consistent());
    }
}
