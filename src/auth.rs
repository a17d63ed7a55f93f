//! Caller identity resolution.
//!
//! Every tool invocation carries a [`Scope`]: the bearer token propagated by
//! the transport layer plus the MCP peer handle for client-bound requests.
//! The namespace derived here partitions all connector state; it is never
//! used for authorization decisions beyond partitioning.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rmcp::service::{Peer, RoleServer};
use serde::Deserialize;

use crate::config::Policy;
use crate::error::{Error, Result};

const DEFAULT_NAMESPACE: &str = "default";

pub fn is_default_namespace(namespace: &str) -> bool {
    namespace == DEFAULT_NAMESPACE
}

/// Bearer token as a typed request-extension value, for transports that
/// authenticate before the MCP layer.
#[derive(Debug, Clone)]
pub struct AuthToken(pub String);

/// Typed per-request value threaded through every service call.
#[derive(Clone, Default)]
pub struct Scope {
    pub token: Option<String>,
    pub peer: Option<Peer<RoleServer>>,
}

impl Scope {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            peer: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifiedClaims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

pub struct AuthService {
    policy: Policy,
}

impl AuthService {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// Resolve the caller's namespace.
    ///
    /// Without an OAuth2 policy everything shares the `default` namespace.
    /// With one, the bearer token is mandatory; claims are signature-verified
    /// when a JWT secret is configured and otherwise parsed unverified as a
    /// reduced-trust fallback sufficient for partitioning.
    pub fn namespace(&self, scope: &Scope) -> Result<String> {
        let Some(oauth2) = &self.policy.oauth2 else {
            return Ok(DEFAULT_NAMESPACE.to_string());
        };

        let token = scope.token.as_deref().ok_or(Error::MissingToken)?;

        let (email, sub) = match &oauth2.jwt_secret {
            Some(secret) => {
                let claims = verify_claims(token, secret)?;
                (claims.email, claims.sub)
            }
            None => peek_claims(token)?,
        };

        let namespace = email
            .filter(|e| !e.is_empty())
            .or(sub.filter(|s| !s.is_empty()));
        namespace.ok_or(Error::EmptyNamespaceClaim)
    }
}

fn verify_claims(token: &str, secret: &str) -> Result<VerifiedClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<VerifiedClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| Error::InvalidToken(e.to_string()))?;
    Ok(data.claims)
}

/// Extract `email`/`sub` claims **without** verifying the token signature.
/// Only used when no verifier is configured.
fn peek_claims(token: &str) -> Result<(Option<String>, Option<String>)> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::InvalidToken("malformed JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::InvalidToken(format!("payload decode: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidToken(format!("payload parse: {e}")))?;
    let get = |key: &str| {
        claims
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };
    Ok((get("email"), get("sub")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::OAuth2Config;

    /// Assemble an unsigned (algorithm "none") JWT with the given claims.
    /// The trailing dot keeps the token structurally valid for the parser.
    pub(crate) fn unsigned_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        format!("{header}.{payload}.")
    }

    fn oauth_policy() -> Policy {
        Policy {
            oauth2: Some(OAuth2Config {
                client_id: "test-client".to_string(),
                ..Default::default()
            }),
            require_identity_token: false,
        }
    }

    #[test]
    fn no_oauth_config_yields_default_namespace() {
        let auth = AuthService::new(Policy::default());
        let namespace = auth.namespace(&Scope::default()).unwrap();
        assert_eq!(namespace, "default");
    }

    #[test]
    fn missing_token_fails() {
        let auth = AuthService::new(oauth_policy());
        let err = auth.namespace(&Scope::default()).unwrap_err();
        assert!(matches!(err, Error::MissingToken));
    }

    #[test]
    fn email_claim_wins_over_sub() {
        let token = unsigned_jwt(serde_json::json!({
            "sub": "sub123",
            "email": "user@example.com",
        }));
        let auth = AuthService::new(oauth_policy());
        let namespace = auth.namespace(&Scope::with_token(token)).unwrap();
        assert_eq!(namespace, "user@example.com");
    }

    #[test]
    fn sub_claim_is_fallback() {
        let token = unsigned_jwt(serde_json::json!({"sub": "sub123"}));
        let auth = AuthService::new(oauth_policy());
        let namespace = auth.namespace(&Scope::with_token(token)).unwrap();
        assert_eq!(namespace, "sub123");
    }

    #[test]
    fn empty_claims_fail() {
        let token = unsigned_jwt(serde_json::json!({"aud": "x"}));
        let auth = AuthService::new(oauth_policy());
        let err = auth.namespace(&Scope::with_token(token)).unwrap_err();
        assert!(matches!(err, Error::EmptyNamespaceClaim));
    }

    #[test]
    fn garbage_token_fails() {
        let auth = AuthService::new(oauth_policy());
        let err = auth
            .namespace(&Scope::with_token("not-a-jwt"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)));
    }

    #[test]
    fn verified_path_rejects_bad_signature() {
        let mut policy = oauth_policy();
        policy.oauth2.as_mut().unwrap().jwt_secret = Some("verifier-secret".to_string());
        let token = unsigned_jwt(serde_json::json!({"email": "user@example.com"}));
        let auth = AuthService::new(policy);
        let err = auth.namespace(&Scope::with_token(token)).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)));
    }
}
