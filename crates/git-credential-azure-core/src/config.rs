use thiserror::Error;
use url::Url;

/// Public client registered for Azure DevOps access (shared with Git Credential Manager).
pub const DEFAULT_CLIENT_ID: &str = "872cd9fa-d31f-45e0-9eab-6e460a02d1f1";
/// Multi-tenant authority for work and school accounts.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/organizations";
/// Azure DevOps resource scope.
pub const AZURE_DEVOPS_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";
/// OpenID scopes requested alongside the resource so the id token names the account.
pub const OPENID_SCOPES: &[&str; 3] = &["openid", "profile", "offline_access"];
/// Only host this helper answers for.
pub const AZURE_DEVOPS_HOST: &str = "dev.azure.com";

/// Identity platform settings. Fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub client_id: String,
    pub authority: Url,
    pub scopes: Vec<String>,
}

impl IdentityConfig {
    pub fn with_defaults() -> Result<Self, ConfigError> {
        let authority = Url::parse(DEFAULT_AUTHORITY)?;
        let scopes = std::iter::once(AZURE_DEVOPS_SCOPE)
            .chain(OPENID_SCOPES.iter().copied())
            .map(ToOwned::to_owned)
            .collect();
        Ok(Self {
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            authority,
            scopes,
        })
    }

    pub fn with_client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_authority(mut self, authority: Url) -> Self {
        self.authority = authority;
        self
    }

    pub fn authorization_endpoint(&self) -> Result<Url, ConfigError> {
        self.endpoint("authorize")
    }

    pub fn token_endpoint(&self) -> Result<Url, ConfigError> {
        self.endpoint("token")
    }

    pub fn device_code_endpoint(&self) -> Result<Url, ConfigError> {
        self.endpoint("devicecode")
    }

    fn endpoint(&self, name: &str) -> Result<Url, ConfigError> {
        let base = self.authority.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/oauth2/v2.0/{name}"))?)
    }
}

/// Errors raised while building identity configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid identity endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
