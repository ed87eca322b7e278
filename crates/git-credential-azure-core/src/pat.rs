//! Personal access token issuance through the Azure DevOps token REST API.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://vssps.dev.azure.com";
pub const API_VERSION: &str = "7.1-preview.1";
/// Scopes requested for issued tokens: push code and use package feeds.
pub const PAT_SCOPE: &str = "vso.code_write vso.packaging";
const USER_AGENT: &str = concat!("git-credential-azure/", env!("CARGO_PKG_VERSION"));

/// Reasons a personal access token could not be issued.
#[derive(Debug, Error)]
pub enum PatError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status} body: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("invalid token endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("token endpoint base URL cannot carry a path: {0}")]
    InvalidBaseUrl(String),
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("token issuance failed: {0}")]
    Issuance(String),
}

/// Personal access token as returned by the issuance endpoint.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatToken {
    #[serde(default)]
    pub authorization_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub target_accounts: Option<Vec<String>>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl PatToken {
    /// A token with an empty secret cannot authenticate anything.
    pub fn is_usable(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.is_empty())
    }
}

impl fmt::Debug for PatToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatToken")
            .field("authorization_id", &self.authorization_id)
            .field("display_name", &self.display_name)
            .field("scope", &self.scope)
            .field("target_accounts", &self.target_accounts)
            .field("token", &"<redacted>")
            .field("valid_from", &self.valid_from)
            .field("valid_to", &self.valid_to)
            .finish()
    }
}

/// Envelope of the issuance response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatTokenResult {
    #[serde(default)]
    pub pat_token: Option<PatToken>,
    #[serde(default)]
    pub pat_token_error: Option<String>,
}

impl PatTokenResult {
    /// `""` and `"none"` both report success.
    pub fn is_success(&self) -> bool {
        matches!(self.pat_token_error.as_deref(), None | Some("") | Some("none"))
    }

    pub fn into_token(self) -> Result<PatToken, PatError> {
        if self.is_success() {
            return Ok(self.pat_token.unwrap_or_default());
        }
        Err(PatError::Issuance(self.pat_token_error.unwrap_or_default()))
    }
}

#[derive(Debug, Serialize)]
struct PatTokenCreateRequest<'a> {
    scope: &'a str,
}

/// Exchanges an access token for a personal access token.
#[async_trait]
pub trait PatIssuer: Send + Sync {
    async fn issue(&self, organization: &str, access_token: &str) -> Result<PatToken, PatError>;
}

/// HTTP client for `POST {org}/_apis/tokens/pats`.
#[derive(Debug, Clone)]
pub struct PatClient {
    http: Client,
    base_url: Url,
}

impl PatClient {
    pub fn new() -> Result<Self, PatError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Build a client against a different host (useful for testing).
    pub fn with_base_url(base_url: &str) -> Result<Self, PatError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(PatError::InvalidBaseUrl(base_url.to_string()));
        }
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http, base_url })
    }

    pub fn endpoint(&self, organization: &str) -> Result<Url, PatError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PatError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend([organization, "_apis", "tokens", "pats"]);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl PatIssuer for PatClient {
    async fn issue(&self, organization: &str, access_token: &str) -> Result<PatToken, PatError> {
        let url = self.endpoint(organization)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&PatTokenCreateRequest { scope: PAT_SCOPE })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PatError::HttpStatus { status, body });
        }

        let result: PatTokenResult = serde_json::from_str(&body)?;
        result.into_token()
    }
}
