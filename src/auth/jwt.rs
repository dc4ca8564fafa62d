use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::auth::jwks::JwksVerifier;

/// Claims carried by the identity provider's access tokens.
///
/// `sub` is the user id that requests, responses and ratings refer to.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Expiry (Unix timestamp).
    pub exp: usize,
    pub iat: Option<usize>,
    pub iss: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub user_metadata: Option<UserMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserMetadata {
    pub full_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> Result<&str, String> {
        let sub = self.sub.trim();
        if sub.is_empty() {
            Err("Empty sub claim".to_string())
        } else {
            Ok(sub)
        }
    }

    pub fn display_name(&self) -> Option<String> {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.full_name.clone().or_else(|| m.name.clone()))
    }

    /// Prefer the top-level email, fall back to metadata.
    pub fn user_email(&self) -> Option<String> {
        self.email
            .clone()
            .or_else(|| self.user_metadata.as_ref().and_then(|m| m.email.clone()))
    }
}

/// Validate an HS256 token signed with the project's shared JWT secret.
pub fn validate_with_secret(token: &str, secret: &str) -> Result<Claims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| format!("{:?}", e.kind()))
}

/// How incoming tokens are checked.
#[derive(Clone)]
pub enum TokenVerifier {
    Jwks(JwksVerifier),
    SharedSecret(String),
}

impl TokenVerifier {
    pub async fn validate(&self, token: &str) -> Result<Claims, String> {
        match self {
            TokenVerifier::Jwks(jwks) => jwks.validate(token).await,
            TokenVerifier::SharedSecret(secret) => validate_with_secret(token, secret),
        }
    }
}
