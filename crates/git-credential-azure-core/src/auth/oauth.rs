use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::result::account_from_id_token;
use super::{AuthError, AuthResult, PkcePair};
use crate::config::IdentityConfig;

const DEFAULT_USER_AGENT: &str = concat!("git-credential-azure/", env!("CARGO_PKG_VERSION"));
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Resolved identity platform endpoints.
#[derive(Debug, Clone)]
pub struct IdentityEndpoints {
    pub authorization_url: Url,
    pub token_url: Url,
    pub device_code_url: Url,
}

impl IdentityEndpoints {
    pub fn from_config(config: &IdentityConfig) -> Result<Self, AuthError> {
        Ok(Self {
            authorization_url: config.authorization_endpoint()?,
            token_url: config.token_endpoint()?,
            device_code_url: config.device_code_endpoint()?,
        })
    }
}

/// Device authorization response from the `devicecode` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}

impl DeviceCodeResponse {
    /// Instructions to show the user, built locally when the server sent none.
    pub fn display_message(&self) -> String {
        match &self.message {
            Some(message) if !message.is_empty() => message.clone(),
            _ => format!(
                "To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
                self.verification_uri, self.user_code
            ),
        }
    }
}

/// Talks to the Microsoft identity platform token endpoints.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: Client,
    config: IdentityConfig,
    endpoints: IdentityEndpoints,
}

impl IdentityClient {
    pub fn new(config: IdentityConfig) -> Result<Self, AuthError> {
        let endpoints = IdentityEndpoints::from_config(&config)?;
        let http = Client::builder().user_agent(DEFAULT_USER_AGENT).build()?;
        Ok(Self {
            http,
            config,
            endpoints,
        })
    }

    fn scope(&self) -> String {
        self.config.scopes.join(" ")
    }

    pub fn authorization_url(
        &self,
        pkce: &PkcePair,
        state: &str,
        redirect_uri: &Url,
        login_hint: Option<&str>,
    ) -> Url {
        let mut url = self.endpoints.authorization_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &self.config.client_id);
            pairs.append_pair("redirect_uri", redirect_uri.as_str());
            pairs.append_pair("scope", &self.scope());
            pairs.append_pair("code_challenge", pkce.challenge());
            pairs.append_pair("code_challenge_method", "S256");
            pairs.append_pair("state", state);
            if let Some(hint) = login_hint {
                pairs.append_pair("login_hint", hint);
            }
        }
        url
    }

    /// Redeem an authorization code received on the loopback redirect.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce: &PkcePair,
        redirect_uri: &Url,
    ) -> Result<AuthResult, AuthError> {
        let scope = self.scope();
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", pkce.verifier()),
            ("scope", scope.as_str()),
        ];
        self.request_token(&form).await
    }

    /// Start the device authorization grant.
    pub async fn request_device_code(&self) -> Result<DeviceCodeResponse, AuthError> {
        let scope = self.scope();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        let response = self
            .http
            .post(self.endpoints.device_code_url.clone())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(error_from_body(status, body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Ask once whether the user finished signing in with the given device code.
    ///
    /// A pending sign-in surfaces as [`AuthError::OAuth`] with
    /// `authorization_pending`; interpreting it is left to the caller.
    pub async fn poll_device_code(&self, device_code: &str) -> Result<AuthResult, AuthError> {
        let form = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", self.config.client_id.as_str()),
            ("device_code", device_code),
        ];
        self.request_token(&form).await
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<AuthResult, AuthError> {
        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let received_at = Utc::now();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(error_from_body(status, body));
        }

        let payload: TokenResponse = serde_json::from_str(&body)?;
        payload.into_result(received_at)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn error_from_body(status: reqwest::StatusCode, body: String) -> AuthError {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => AuthError::OAuth {
            description: err.error_description.unwrap_or_else(|| err.error.clone()),
            error: err.error,
        },
        Err(_) => AuthError::TokenEndpoint { status, body },
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

impl TokenResponse {
    fn into_result(self, received_at: DateTime<Utc>) -> Result<AuthResult, AuthError> {
        if !self.token_type.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidTokenType(self.token_type));
        }

        let expires_at = self
            .expires_in
            .filter(|seconds| *seconds > 0)
            .map(|seconds| received_at + Duration::seconds(seconds));

        let account = match self.id_token.as_deref() {
            Some(id_token) => Some(account_from_id_token(id_token)?),
            None => None,
        };

        Ok(AuthResult {
            access_token: self.access_token,
            expires_at,
            account,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_client(base_url: &str) -> IdentityClient {
    let config = IdentityConfig::with_defaults()
        .unwrap()
        .with_client_id("client-id")
        .with_authority(Url::parse(&format!("{base_url}/organizations")).unwrap());
    IdentityClient::new(config).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::result::fake_id_token;
    use httpmock::prelude::*;
    use reqwest::StatusCode;

    const TOKEN_PATH: &str = "/organizations/oauth2/v2.0/token";

    #[tokio::test]
    async fn exchange_code_success() {
        let server = MockServer::start();
        let id_token = fake_id_token(serde_json::json!({ "preferred_username": "alice@example.com" }));
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path(TOKEN_PATH)
                .header("content-type", "application/x-www-form-urlencoded")
                .body_contains("grant_type=authorization_code")
                .body_contains("code=code123");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "abc123",
                "refresh_token": "refresh456",
                "token_type": "Bearer",
                "expires_in": 3600,
                "id_token": id_token,
            }));
        });

        let client = test_client(&server.base_url());
        let pkce = PkcePair::generate();
        let redirect = Url::parse("http://localhost:1234").unwrap();
        let before = Utc::now();
        let result = client.exchange_code("code123", &pkce, &redirect).await.unwrap();
        mock.assert();
        assert_eq!(result.access_token, "abc123");
        assert_eq!(result.preferred_username(), "alice@example.com");
        let expires_at = result.expires_at.unwrap();
        assert!(expires_at >= before + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn token_endpoint_oauth_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(TOKEN_PATH);
            then.status(400).json_body_obj(&serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70000: bad code"
            }));
        });

        let client = test_client(&server.base_url());
        let pkce = PkcePair::generate();
        let redirect = Url::parse("http://localhost:1234").unwrap();
        let err = client.exchange_code("bad", &pkce, &redirect).await.unwrap_err();
        mock.assert();
        match err {
            AuthError::OAuth { error, description } => {
                assert_eq!(error, "invalid_grant");
                assert!(description.contains("AADSTS70000"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_endpoint_plain_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(TOKEN_PATH);
            then.status(502).body("bad gateway");
        });

        let client = test_client(&server.base_url());
        let err = client.poll_device_code("device").await.unwrap_err();
        match err {
            AuthError::TokenEndpoint { status, body } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_non_bearer_tokens() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(TOKEN_PATH);
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "abc",
                "token_type": "pop",
            }));
        });

        let client = test_client(&server.base_url());
        let err = client.poll_device_code("device").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidTokenType(kind) if kind == "pop"));
    }

    #[test]
    fn authorization_url_carries_hint_only_when_given() {
        let client = test_client("http://127.0.0.1:1");
        let pkce = PkcePair::generate();
        let redirect = Url::parse("http://localhost:4000").unwrap();

        let url = client.authorization_url(&pkce, "state", &redirect, Some("alice@example.com"));
        let hint = url
            .query_pairs()
            .find(|(key, _)| key == "login_hint")
            .map(|(_, value)| value.into_owned());
        assert_eq!(hint.as_deref(), Some("alice@example.com"));

        let url = client.authorization_url(&pkce, "state", &redirect, None);
        assert!(url.query_pairs().all(|(key, _)| key != "login_hint"));
        assert!(url
            .query_pairs()
            .any(|(key, value)| key == "code_challenge" && value == pkce.challenge()));
    }

    #[test]
    fn device_message_falls_back_to_local_text() {
        let response = DeviceCodeResponse {
            device_code: "dc".into(),
            user_code: "ABCD-EFGH".into(),
            verification_uri: "https://microsoft.com/devicelogin".into(),
            expires_in: 900,
            interval: 5,
            message: None,
        };
        let message = response.display_message();
        assert!(message.contains("ABCD-EFGH"));
        assert!(message.contains("https://microsoft.com/devicelogin"));
    }
}
