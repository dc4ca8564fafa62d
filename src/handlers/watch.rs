use actix_web::{HttpRequest, HttpResponse, web};

use crate::auth::authorization::verify_self;
use crate::auth::middleware::AuthenticatedUser;
use crate::db::SnapshotStream;
use crate::models::requests::ServiceRequest;
use crate::services::RequestLifecycleManager;
use crate::watch::session;

/// The live queries a client can subscribe to.
enum Subscription {
    Pending,
    Client(String),
    ServiceType(String),
    Provider(String),
}

impl Subscription {
    fn open(&self, lifecycle: &RequestLifecycleManager) -> SnapshotStream<ServiceRequest> {
        match self {
            Subscription::Pending => lifecycle.watch_pending(),
            Subscription::Client(id) => lifecycle.watch_by_client(id),
            Subscription::ServiceType(t) => lifecycle.watch_by_service_type(t),
            Subscription::Provider(id) => lifecycle.watch_by_provider(id),
        }
    }

    fn label(&self) -> String {
        match self {
            Subscription::Pending => "pending".to_string(),
            Subscription::Client(id) => format!("client/{id}"),
            Subscription::ServiceType(t) => format!("service-type/{t}"),
            Subscription::Provider(id) => format!("provider/{id}"),
        }
    }
}

/// Upgrade to a WebSocket and stream snapshots of `subscription`.
///
/// Browsers can't send an Authorization header during the handshake, so the
/// token may also be passed as `?token=<jwt>`.
fn upgrade(
    req: &HttpRequest,
    stream: web::Payload,
    lifecycle: &RequestLifecycleManager,
    subscription: Subscription,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, ws_session, msg_stream) = actix_ws::handle(req, stream)?;

    actix_web::rt::spawn(session::run(
        ws_session,
        msg_stream,
        subscription.open(lifecycle),
        subscription.label(),
    ));

    Ok(response)
}

/// GET /api/watch/requests/pending
pub async fn watch_pending(
    _user: AuthenticatedUser,
    req: HttpRequest,
    stream: web::Payload,
    lifecycle: web::Data<RequestLifecycleManager>,
) -> Result<HttpResponse, actix_web::Error> {
    upgrade(&req, stream, lifecycle.get_ref(), Subscription::Pending)
}

/// GET /api/watch/requests/client/{client_id} — a client's own requests.
pub async fn watch_by_client(
    user: AuthenticatedUser,
    req: HttpRequest,
    stream: web::Payload,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let client_id = path.into_inner();
    if let Err(resp) = verify_self(&user, &client_id, "watch requests") {
        return Ok(resp);
    }
    upgrade(&req, stream, lifecycle.get_ref(), Subscription::Client(client_id))
}

/// GET /api/watch/requests/service-type/{service_type} — every request in one category.
pub async fn watch_by_service_type(
    _user: AuthenticatedUser,
    req: HttpRequest,
    stream: web::Payload,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    upgrade(
        &req,
        stream,
        lifecycle.get_ref(),
        Subscription::ServiceType(path.into_inner()),
    )
}

/// GET /api/watch/requests/provider/{provider_id} — jobs a provider was accepted for.
pub async fn watch_by_provider(
    user: AuthenticatedUser,
    req: HttpRequest,
    stream: web::Payload,
    lifecycle: web::Data<RequestLifecycleManager>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let provider_id = path.into_inner();
    if let Err(resp) = verify_self(&user, &provider_id, "watch jobs") {
        return Ok(resp);
    }
    upgrade(&req, stream, lifecycle.get_ref(), Subscription::Provider(provider_id))
}
