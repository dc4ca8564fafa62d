use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::jwt::Claims;

/// Public signing key material for one `kid`.
#[derive(Clone)]
enum SigningKey {
    Ec { x: String, y: String },
    Rsa { n: String, e: String },
}

#[derive(Clone)]
struct CachedKey {
    key: SigningKey,
    algorithm: Algorithm,
}

/// Verifies asymmetric tokens against a JWKS endpoint, caching keys by `kid`.
#[derive(Clone)]
pub struct JwksVerifier {
    keys: Arc<Cache<String, CachedKey>>,
    jwks_url: String,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl JwksVerifier {
    pub fn new(jwks_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            keys: Arc::new(
                Cache::builder()
                    .time_to_live(Duration::from_secs(3600))
                    .max_capacity(16)
                    .build(),
            ),
            jwks_url: jwks_url.into(),
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// The well-known JWKS endpoint of a Supabase project URL.
    pub fn for_supabase(project_url: &str, anon_key: Option<String>) -> Self {
        let base = project_url.trim_end_matches('/');
        Self::new(format!("{base}/auth/v1/.well-known/jwks.json"), anon_key)
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    async fn fetch_jwks(&self) -> Result<Value, String> {
        debug!("Fetching JWKS from {}", self.jwks_url);

        let mut request = self.client.get(&self.jwks_url);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Failed to fetch JWKS: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Failed to fetch JWKS: HTTP {status}"));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| format!("Failed to parse JWKS JSON: {e}"))
    }

    async fn key_for(&self, kid: &str) -> Result<CachedKey, String> {
        if let Some(cached) = self.keys.get(kid).await {
            return Ok(cached);
        }

        let jwks = self.fetch_jwks().await?;
        let jwk = jwks["keys"]
            .as_array()
            .ok_or("No keys in JWKS")?
            .iter()
            .find(|k| k["kid"].as_str() == Some(kid))
            .ok_or(format!("Key with kid={kid} not found in JWKS"))?;

        let cached = parse_jwk(jwk)?;
        self.keys.insert(kid.to_string(), cached.clone()).await;
        Ok(cached)
    }

    pub async fn validate(&self, token: &str) -> Result<Claims, String> {
        let header = decode_header(token).map_err(|e| format!("Failed to decode header: {e}"))?;
        let kid = header.kid.ok_or("No 'kid' in token header")?;

        let cached = self.key_for(&kid).await?;
        let decoding_key = match &cached.key {
            SigningKey::Ec { x, y } => DecodingKey::from_ec_components(x, y),
            SigningKey::Rsa { n, e } => DecodingKey::from_rsa_components(n, e),
        }
        .map_err(|e| format!("Failed to create decoding key: {e}"))?;

        let mut validation = Validation::new(cached.algorithm);
        validation.validate_aud = false;

        decode::<Claims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| format!("Token validation failed: {e}"))
    }
}

fn parse_jwk(jwk: &Value) -> Result<CachedKey, String> {
    let field = |name: &str| {
        jwk[name]
            .as_str()
            .map(str::to_string)
            .ok_or(format!("Missing '{name}' in JWK"))
    };

    match jwk["kty"].as_str().unwrap_or("EC") {
        "EC" => {
            let algorithm = match jwk["alg"].as_str() {
                Some("ES384") => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok(CachedKey {
                key: SigningKey::Ec {
                    x: field("x")?,
                    y: field("y")?,
                },
                algorithm,
            })
        }
        "RSA" => {
            let algorithm = match jwk["alg"].as_str() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            Ok(CachedKey {
                key: SigningKey::Rsa {
                    n: field("n")?,
                    e: field("e")?,
                },
                algorithm,
            })
        }
        other => Err(format!("Unsupported key type {other} in JWKS")),
    }
}
