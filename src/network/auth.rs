//! JWT Authentication
//!
//! Validates JWTs from external auth providers (Firebase, Auth0, Supabase, etc.).
//! The server does NOT issue tokens - only validates them. Connections
//! without a token play as guests whose identity is derived from a seed.

use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm, TokenData};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Digest};
use thiserror::Error;

use crate::game::participant::{PlayerId, Profile, DEFAULT_RATING};

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("TYPERACE_AUTH_ISSUER").ok(),
            audience: std::env::var("TYPERACE_AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("TYPERACE_AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("TYPERACE_AUTH_SECRET").ok(),
            skip_expiry: std::env::var("TYPERACE_AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Standard JWT claims we expect from auth providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the user id at the auth provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer (auth provider).
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Player id for the subject.
    ///
    /// A UUID subject is used as-is so ids line up with the profile store.
    /// Any other subject is hashed into 16 bytes.
    pub fn player_id(&self) -> PlayerId {
        if let Some(id) = PlayerId::from_uuid_str(&self.sub) {
            return id;
        }
        let hash = Sha256::new()
            .chain_update(b"typerace-player:")
            .chain_update(self.sub.as_bytes())
            .finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        PlayerId::new(id)
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // jsonwebtoken allows 60s of leeway by default
    if !config.skip_expiry && claims.exp > 0 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// GUESTS
// =============================================================================

/// Profile for a guest, derived from a client-supplied seed.
///
/// The same seed always yields the same id and `Guest-NNNN` name. Guests
/// start at the default rating with the default avatar.
pub fn guest_profile(seed: &str) -> Profile {
    let hash = Sha256::new()
        .chain_update(b"typerace-guest:")
        .chain_update(seed.as_bytes())
        .finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    let tag = u16::from_be_bytes([hash[16], hash[17]]) % 10_000;

    Profile {
        id: PlayerId::new(id),
        name: format!("Guest-{tag:04}"),
        rating: DEFAULT_RATING,
        avatar: None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn create_test_token(claims: &TokenClaims, secret: &str) -> String {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&header, claims, &key).unwrap()
    }

    fn test_claims() -> TokenClaims {
        let now = chrono::Utc::now().timestamp() as u64;
        TokenClaims {
            sub: "user123".into(),
            exp: now + 3600,
            iat: now,
            iss: Some("test-issuer".into()),
            aud: Some(serde_json::json!("test-audience")),
        }
    }

    fn secret_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_token_validation() {
        let token = create_test_token(&test_claims(), SECRET);

        let result = validate_token(&token, &secret_config());
        assert_eq!(result.unwrap().sub, "user123");
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = test_claims();
        claims.exp = 1; // Expired in 1970
        let token = create_test_token(&claims, SECRET);

        let result = validate_token(&token, &secret_config());
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let token = create_test_token(&test_claims(), "correct-secret-key-here!!!!!");

        let config = AuthConfig {
            secret: Some("wrong-secret-key-here!!!!!!".into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_missing_sub_rejected() {
        let mut claims = test_claims();
        claims.sub = String::new();
        let token = create_test_token(&claims, SECRET);

        let result = validate_token(&token, &secret_config());
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_issuer_and_audience_validation() {
        let token = create_test_token(&test_claims(), SECRET);

        let config = AuthConfig {
            issuer: Some("wrong-issuer".into()),
            ..secret_config()
        };
        assert!(matches!(validate_token(&token, &config), Err(AuthError::InvalidIssuer)));

        let config = AuthConfig {
            audience: Some("test-audience".into()),
            issuer: Some("test-issuer".into()),
            ..secret_config()
        };
        assert!(validate_token(&token, &config).is_ok());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let result = validate_token("not-a-jwt", &secret_config());
        assert!(matches!(result, Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_player_id_derivation() {
        let claims = TokenClaims {
            sub: "user123".into(),
            exp: 0,
            iat: 0,
            iss: None,
            aud: None,
        };
        assert_eq!(claims.player_id(), claims.player_id());

        let other = TokenClaims {
            sub: "user456".into(),
            ..claims.clone()
        };
        assert_ne!(claims.player_id(), other.player_id());

        let uuid = TokenClaims {
            sub: "01010101-0101-0101-0101-010101010101".into(),
            ..claims
        };
        assert_eq!(uuid.player_id(), PlayerId::new([1; 16]));
    }

    #[test]
    fn test_not_configured_error() {
        let result = validate_token("some.jwt.token", &AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_skip_expiry_for_testing() {
        let mut claims = test_claims();
        claims.exp = 1;
        let token = create_test_token(&claims, SECRET);

        let config = AuthConfig {
            skip_expiry: true,
            ..secret_config()
        };
        assert!(validate_token(&token, &config).is_ok());
    }

    #[test]
    fn test_guest_profile_is_deterministic() {
        let a = guest_profile("4821");
        let b = guest_profile("4821");
        assert_eq!(a, b);
        assert_ne!(a.id, guest_profile("4822").id);

        assert!(a.name.starts_with("Guest-"));
        assert_eq!(a.name.len(), "Guest-0000".len());
        assert!(a.name[6..].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(a.rating, DEFAULT_RATING);
        assert_eq!(a.avatar_or_default(), crate::game::participant::DEFAULT_AVATAR);
    }
}
