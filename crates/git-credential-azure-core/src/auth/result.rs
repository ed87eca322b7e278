use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::AuthError;

/// Signed-in account as described by the id token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub preferred_username: String,
    pub name: Option<String>,
    pub tenant_id: Option<String>,
}

/// Tokens produced by a successful sign-in.
#[derive(Clone)]
pub struct AuthResult {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub account: Option<Account>,
}

impl AuthResult {
    pub fn preferred_username(&self) -> &str {
        self.account
            .as_ref()
            .map(|account| account.preferred_username.as_str())
            .unwrap_or_default()
    }
}

// Keeps the access token out of verbose logs.
impl fmt::Debug for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResult")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    upn: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tid: Option<String>,
}

/// Read the account claims from an id token payload.
///
/// The token is taken straight from the token endpoint response, so the
/// signature is not checked here.
pub fn account_from_id_token(id_token: &str) -> Result<Account, AuthError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::InvalidIdToken("missing payload segment".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| AuthError::InvalidIdToken(err.to_string()))?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes)?;
    Ok(Account {
        preferred_username: claims
            .preferred_username
            .or(claims.upn)
            .unwrap_or_default(),
        name: claims.name,
        tenant_id: claims.tid,
    })
}

#[cfg(test)]
pub(crate) fn fake_id_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_preferred_username() {
        let token = fake_id_token(serde_json::json!({
            "preferred_username": "alice@example.com",
            "name": "Alice",
            "tid": "tenant"
        }));
        let account = account_from_id_token(&token).unwrap();
        assert_eq!(account.preferred_username, "alice@example.com");
        assert_eq!(account.name.as_deref(), Some("Alice"));
        assert_eq!(account.tenant_id.as_deref(), Some("tenant"));
    }

    #[test]
    fn falls_back_to_upn() {
        let token = fake_id_token(serde_json::json!({ "upn": "bob@example.com" }));
        let account = account_from_id_token(&token).unwrap();
        assert_eq!(account.preferred_username, "bob@example.com");
    }

    #[test]
    fn rejects_token_without_payload() {
        let err = account_from_id_token("header-only").unwrap_err();
        assert!(matches!(err, AuthError::InvalidIdToken(_)));
    }

    #[test]
    fn debug_output_hides_token() {
        let result = AuthResult {
            access_token: "super-secret".into(),
            expires_at: None,
            account: None,
        };
        assert!(!format!("{result:?}").contains("super-secret"));
        assert_eq!(result.preferred_username(), "");
    }
}
