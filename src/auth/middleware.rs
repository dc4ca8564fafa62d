use actix_web::FromRequest;
use actix_web::{Error, HttpRequest, dev::Payload, web};
use std::future::Future;
use std::pin::Pin;

use crate::auth::jwt::TokenVerifier;

/// The caller behind a verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// The authentication collaborator as the request core sees it.
pub trait AuthSession {
    fn current_user_id(&self) -> Option<&str>;

    fn is_authenticated(&self) -> bool {
        self.current_user_id().is_some()
    }
}

/// Extractor that rejects the request with 401 unless a valid token is present.
///
/// The token comes from `Authorization: Bearer <token>`, or from a `token`
/// query parameter for WebSocket upgrades where browsers cannot set headers.
pub struct AuthenticatedUser(pub Identity);

impl AuthSession for AuthenticatedUser {
    fn current_user_id(&self) -> Option<&str> {
        Some(&self.0.user_id)
    }
}

impl AuthSession for Option<Identity> {
    fn current_user_id(&self) -> Option<&str> {
        self.as_ref().map(|i| i.user_id.as_str())
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();

        Box::pin(async move {
            let token = bearer_token(&req)
                .or_else(|| query_token(&req))
                .ok_or_else(|| {
                    actix_web::error::ErrorUnauthorized("Authorization header must be: Bearer <token>")
                })?;

            let verifier = req.app_data::<web::Data<TokenVerifier>>().ok_or_else(|| {
                actix_web::error::ErrorInternalServerError("Token verifier not configured")
            })?;

            let claims = verifier
                .validate(&token)
                .await
                .map_err(|e| actix_web::error::ErrorUnauthorized(format!("Invalid token: {e}")))?;

            let user_id = claims
                .user_id()
                .map_err(actix_web::error::ErrorUnauthorized)?
                .to_string();

            Ok(AuthenticatedUser(Identity {
                user_id,
                email: claims.user_email(),
                display_name: claims.display_name(),
            }))
        })
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn query_token(req: &HttpRequest) -> Option<String> {
    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
}

#[derive(serde::Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn token_is_read_from_header_or_query() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc"));

        let req = TestRequest::with_uri("/watch/requests/pending?token=xyz").to_http_request();
        assert_eq!(bearer_token(&req), None);
        assert_eq!(query_token(&req).as_deref(), Some("xyz"));
    }

    #[test]
    fn session_reports_identity() {
        let anonymous: Option<Identity> = None;
        assert!(!anonymous.is_authenticated());

        let user = AuthenticatedUser(Identity {
            user_id: "u1".to_string(),
            email: None,
            display_name: None,
        });
        assert!(user.is_authenticated());
        assert_eq!(user.current_user_id(), Some("u1"));
    }
}
