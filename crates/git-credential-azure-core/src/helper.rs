//! Credential negotiation: turns one git credential request into one credential.

use chrono::{DateTime, Utc};

use crate::auth::{AuthError, AuthFlow, AuthResult, IdentityProvider};
use crate::config::AZURE_DEVOPS_HOST;
use crate::pat::{PatIssuer, PatToken};
use crate::protocol::{CredentialRequest, CredentialResponse};

/// Git credential helper actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Get,
    Store,
    Erase,
    Other(String),
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        match value {
            "get" => Action::Get,
            "store" => Action::Store,
            "erase" => Action::Erase,
            other => Action::Other(other.to_owned()),
        }
    }
}

/// Per-invocation settings, fixed before the request is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelperOptions {
    /// Sign in with a device code instead of a local browser.
    pub device: bool,
}

/// Orchestrates sign-in, PAT issuance and the access-token fallback.
pub struct CredentialHelper<P, X> {
    provider: P,
    issuer: X,
    options: HelperOptions,
}

impl<P, X> CredentialHelper<P, X>
where
    P: IdentityProvider,
    X: PatIssuer,
{
    pub fn new(provider: P, issuer: X, options: HelperOptions) -> Self {
        Self {
            provider,
            issuer,
            options,
        }
    }

    /// Handle one action. Only `get` produces a credential; `store` and
    /// `erase` have nothing to persist since every credential is minted fresh.
    pub async fn run(
        &self,
        action: &Action,
        request: &CredentialRequest,
    ) -> Result<Option<CredentialResponse>, AuthError> {
        match action {
            Action::Get => self.get(request).await,
            other => {
                tracing::debug!(?other, "ignoring action");
                Ok(None)
            }
        }
    }

    /// Produce a credential for `request`, or `None` when the host is not ours.
    ///
    /// Only a failed sign-in is an error. A PAT that cannot be issued degrades
    /// to the raw access token.
    pub async fn get(
        &self,
        request: &CredentialRequest,
    ) -> Result<Option<CredentialResponse>, AuthError> {
        if request.host() != AZURE_DEVOPS_HOST {
            tracing::debug!(host = request.host(), "declining request for foreign host");
            return Ok(None);
        }
        tracing::debug!(keys = ?request.keys().collect::<Vec<_>>(), "credential request");

        let flow = AuthFlow::from_device_flag(self.options.device);
        let mode = flow.acquire_mode(request.username());
        tracing::debug!(%flow, ?mode, "acquiring access token");
        let auth = self.provider.acquire(&mode).await?;
        tracing::debug!(?auth, "access token acquired");

        let organization = resolve_organization(request);
        let pat = match organization.as_deref() {
            Some(organization) => self.exchange(organization, &auth.access_token).await,
            None => {
                tracing::warn!(
                    "unable to create personal access token because Azure DevOps organization not specified"
                );
                None
            }
        };

        let credential = match (pat, organization) {
            (Some(pat), Some(organization)) => Credential::from_pat(pat, organization),
            _ => Credential::from_access_token(auth),
        };
        let response = credential.into_response(request.username());
        tracing::debug!(
            username = ?response.username,
            expiry = ?response.password_expiry_utc,
            "credential ready"
        );
        Ok(Some(response))
    }

    async fn exchange(&self, organization: &str, access_token: &str) -> Option<PatToken> {
        match self.issuer.issue(organization, access_token).await {
            Ok(pat) if pat.is_usable() => {
                tracing::debug!(?pat, organization, "personal access token issued");
                Some(pat)
            }
            Ok(_) => {
                tracing::warn!("error acquiring personal access token: response carried no token");
                None
            }
            Err(err) => {
                tracing::warn!("error acquiring personal access token: {err}");
                None
            }
        }
    }
}

/// Organization a PAT should be scoped to.
///
/// The first path segment wins; otherwise a username that is not an email
/// address is taken to be the organization.
pub fn resolve_organization(request: &CredentialRequest) -> Option<String> {
    let from_path = request.path().split('/').next().unwrap_or_default();
    if !from_path.is_empty() {
        return Some(from_path.to_owned());
    }
    let username = request.username();
    if !username.is_empty() && !username.contains('@') {
        return Some(username.to_owned());
    }
    None
}

/// The secret chosen for the response. Built from exactly one source.
#[derive(Debug)]
struct Credential {
    username: String,
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    fn from_pat(pat: PatToken, organization: String) -> Self {
        Self {
            username: organization,
            secret: pat.token.unwrap_or_default(),
            expires_at: pat.valid_to,
        }
    }

    fn from_access_token(auth: AuthResult) -> Self {
        Self {
            username: auth.preferred_username().to_owned(),
            secret: auth.access_token,
            expires_at: auth.expires_at,
        }
    }

    /// Username is echoed only when it adds something over what git sent.
    fn into_response(self, requested_username: &str) -> CredentialResponse {
        let username = (!self.username.is_empty() && self.username != requested_username)
            .then_some(self.username);
        let password_expiry_utc = self.expires_at.filter(|expiry| expiry.timestamp() > 0);
        CredentialResponse {
            username,
            password: self.secret,
            password_expiry_utc,
        }
    }
}
