use actix_web::{HttpResponse, Responder, ResponseError, web};
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::auth::authorization::{verify_request_owner, verify_request_party};
use crate::auth::middleware::AuthenticatedUser;
use crate::models::requests::{Address, CreateProviderResponse, CreateServiceRequest};
use crate::services::RequestLifecycleManager;

#[derive(Debug, Deserialize)]
pub struct SubmitRequestBody {
    pub client_name: Option<String>,
    pub service_type: String,
    pub description: String,
    pub address: Option<Address>,
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub provider_name: Option<String>,
    #[serde(default)]
    pub provider_email: Option<String>,
    #[serde(default)]
    pub provider_phone: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub contact_preferences: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderBody {
    pub provider_id: String,
}

/// POST /api/requests — submit a new request as the authenticated client.
pub async fn submit_request(
    user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    body: web::Json<SubmitRequestBody>,
) -> impl Responder {
    let body = body.into_inner();
    let client_name = body
        .client_name
        .or(user.0.display_name)
        .unwrap_or_default();

    let input = CreateServiceRequest {
        client_id: user.0.user_id,
        client_name,
        service_type: body.service_type,
        description: body.description,
        address: body.address,
    };

    match lifecycle.submit(input).await {
        Ok(request) => HttpResponse::Created().json(request),
        Err(e) => e.error_response(),
    }
}

/// GET /api/requests/{id}
pub async fn get_request(
    _user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    match lifecycle.get(&id).await {
        Ok(Some(request)) => HttpResponse::Ok().json(request),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Request {id} not found"),
        })),
        Err(e) => e.error_response(),
    }
}

/// POST /api/requests/{id}/responses — the authenticated provider offers to take the job.
pub async fn respond(
    user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
    body: web::Json<RespondBody>,
) -> impl Responder {
    let id = path.into_inner();
    let body = body.into_inner();

    let input = CreateProviderResponse {
        provider_name: body
            .provider_name
            .or(user.0.display_name)
            .unwrap_or_default(),
        provider_email: body.provider_email.or(user.0.email).unwrap_or_default(),
        provider_id: user.0.user_id,
        provider_phone: body.provider_phone,
        skills: body.skills,
        message: body.message,
        contact_preferences: body.contact_preferences,
    };

    match lifecycle.respond(&id, input).await {
        Ok(request) => HttpResponse::Created().json(request),
        Err(e) => e.error_response(),
    }
}

/// POST /api/requests/{id}/accept — the client picks a provider.
pub async fn accept(
    user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
    body: web::Json<ProviderBody>,
) -> impl Responder {
    let id = path.into_inner();

    if let Err(resp) = verify_request_owner(lifecycle.get_ref(), &id, &user).await {
        return resp;
    }

    match lifecycle.accept(&id, &body.provider_id).await {
        Ok(request) => HttpResponse::Ok().json(request),
        Err(e) => e.error_response(),
    }
}

/// POST /api/requests/{id}/reject
pub async fn reject(
    user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
    body: web::Json<ProviderBody>,
) -> impl Responder {
    let id = path.into_inner();

    if let Err(resp) = verify_request_owner(lifecycle.get_ref(), &id, &user).await {
        return resp;
    }

    match lifecycle.reject(&id, &body.provider_id).await {
        Ok(request) => HttpResponse::Ok().json(request),
        Err(e) => e.error_response(),
    }
}

/// POST /api/requests/{id}/complete — either the client or the accepted provider.
pub async fn complete(
    user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    if let Err(resp) = verify_request_party(lifecycle.get_ref(), &id, &user).await {
        return resp;
    }

    match lifecycle.complete(&id).await {
        Ok(request) => HttpResponse::Ok().json(request),
        Err(e) => e.error_response(),
    }
}

/// POST /api/requests/{id}/cancel
pub async fn cancel(
    user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    if let Err(resp) = verify_request_owner(lifecycle.get_ref(), &id, &user).await {
        return resp;
    }

    match lifecycle.cancel(&id).await {
        Ok(request) => HttpResponse::Ok().json(request),
        Err(e) => e.error_response(),
    }
}

/// DELETE /api/requests/{id}
pub async fn delete_request(
    user: AuthenticatedUser,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    if let Err(resp) = verify_request_owner(lifecycle.get_ref(), &id, &user).await {
        return resp;
    }

    match lifecycle.delete(&id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Request {id} deleted"),
        })),
        Err(e) => e.error_response(),
    }
}
