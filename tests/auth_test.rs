///! Integration test for JWT auth validation.
///!
///! This test mints a JWT locally using the same HS256 secret that the server
///! would use, then validates it through `validate_with_secret` and the
///! `TokenVerifier` the extractor relies on.
///! No running server or database is needed.
///!
///! Run with: `cargo test --test auth_test`
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use uuid::Uuid;

use fixlink_backend::auth::jwt::{Claims, TokenVerifier, UserMetadata, validate_with_secret};

/// A fake secret for testing — never use the real one in tests committed to git.
const TEST_SECRET: &str = "test-secret-at-least-256-bits-long-for-hs256-xxxxxxx";

fn mint(claims: &Claims) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("Failed to encode test JWT")
}

fn claims_for(sub: &str, email: &str, full_name: &str) -> Claims {
    let now = Utc::now().timestamp() as usize;

    Claims {
        sub: sub.to_string(),
        exp: now + 3600,
        iat: Some(now),
        iss: Some("https://example.supabase.co/auth/v1".to_string()),
        email: Some(email.to_string()),
        role: Some("authenticated".to_string()),
        user_metadata: Some(UserMetadata {
            full_name: Some(full_name.to_string()),
            name: None,
            email: Some(email.to_string()),
            phone: Some("555-0100".to_string()),
        }),
    }
}

#[test]
fn test_valid_token_decodes_correctly() {
    let user_id = Uuid::new_v4().to_string();
    let token = mint(&claims_for(&user_id, "alice@example.com", "Alice Smith"));

    let claims = validate_with_secret(&token, TEST_SECRET).expect("Token should be valid");

    assert_eq!(claims.user_id().unwrap(), user_id);
    assert_eq!(claims.user_email().unwrap(), "alice@example.com");
    assert_eq!(claims.display_name().unwrap(), "Alice Smith");
}

#[test]
fn test_expired_token_is_rejected() {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        exp: now - 300, // well past the 60s default leeway
        iat: Some(now - 3600),
        ..claims_for("provider-1", "expired@example.com", "Old Token")
    };

    let result = validate_with_secret(&mint(&claims), TEST_SECRET);
    assert!(result.unwrap_err().contains("ExpiredSignature"));
}

#[test]
fn test_wrong_secret_is_rejected() {
    let token = mint(&claims_for("client-1", "bob@example.com", "Bob Jones"));

    let result = validate_with_secret(&token, "completely-wrong-secret-xxxxxxxxxxxxxxxxxxx");
    assert!(result.unwrap_err().contains("InvalidSignature"));
}

#[test]
fn test_garbage_token_is_rejected() {
    assert!(validate_with_secret("not.a.valid.jwt", TEST_SECRET).is_err());
}

#[test]
fn test_blank_subject_has_no_user_id() {
    let claims = claims_for("   ", "blank@example.com", "Blank");
    assert!(claims.user_id().is_err());
}

#[test]
fn test_claims_helpers_with_missing_metadata() {
    let claims = Claims {
        user_metadata: None,
        ..claims_for("client-2", "bare@example.com", "ignored")
    };

    // Should fall back to top-level email.
    assert_eq!(claims.user_email().unwrap(), "bare@example.com");
    assert!(claims.display_name().is_none());
}

#[tokio::test]
async fn test_shared_secret_verifier_accepts_minted_token() {
    let verifier = TokenVerifier::SharedSecret(TEST_SECRET.to_string());
    let token = mint(&claims_for("provider-9", "pat@example.com", "Pat Provider"));

    let claims = verifier.validate(&token).await.expect("Token should be valid");
    assert_eq!(claims.sub, "provider-9");
}
