use actix_web::HttpResponse;

use crate::auth::middleware::AuthSession;
use crate::models::requests::ServiceRequest;
use crate::services::RequestLifecycleManager;

/// Load a request and check that the caller submitted it.
pub async fn verify_request_owner(
    lifecycle: &RequestLifecycleManager,
    request_id: &str,
    session: &impl AuthSession,
) -> Result<ServiceRequest, HttpResponse> {
    let request = load_request(lifecycle, request_id).await?;

    if session.current_user_id() != Some(request.client_id.as_str()) {
        return Err(HttpResponse::Forbidden().json(serde_json::json!({
            "error": "You did not submit this request",
        })));
    }

    Ok(request)
}

/// Load a request and check that the caller is its client or its accepted provider.
pub async fn verify_request_party(
    lifecycle: &RequestLifecycleManager,
    request_id: &str,
    session: &impl AuthSession,
) -> Result<ServiceRequest, HttpResponse> {
    let request = load_request(lifecycle, request_id).await?;

    let caller = session.current_user_id();
    let is_client = caller == Some(request.client_id.as_str());
    let is_provider = caller.is_some() && caller == request.accepted_provider_id.as_deref();

    if !is_client && !is_provider {
        return Err(HttpResponse::Forbidden().json(serde_json::json!({
            "error": "You are not a party to this request",
        })));
    }

    Ok(request)
}

/// Reject the call unless the caller is acting as `user_id`.
pub fn verify_self(session: &impl AuthSession, user_id: &str, action: &str) -> Result<(), HttpResponse> {
    if session.current_user_id() == Some(user_id) {
        Ok(())
    } else {
        Err(HttpResponse::Forbidden().json(serde_json::json!({
            "error": format!("You can only {action} as yourself"),
        })))
    }
}

async fn load_request(
    lifecycle: &RequestLifecycleManager,
    request_id: &str,
) -> Result<ServiceRequest, HttpResponse> {
    lifecycle
        .get(request_id)
        .await
        .map_err(|e| actix_web::ResponseError::error_response(&e))?
        .ok_or_else(|| {
            HttpResponse::NotFound().json(serde_json::json!({
                "error": format!("Request {request_id} not found"),
            }))
        })
}
