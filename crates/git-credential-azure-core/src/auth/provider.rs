use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::browser::run_loopback_flow;
use super::device::start_device_flow;
use super::{AuthError, AuthResult, IdentityClient};

/// How to obtain a token. Chosen once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireMode {
    /// Browser sign-in, optionally pre-filled with an email-like username.
    Interactive { login_hint: Option<String> },
    /// Code shown on stderr and entered on another device.
    DeviceCode,
}

/// Source of Azure DevOps access tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn acquire(&self, mode: &AcquireMode) -> Result<AuthResult, AuthError>;
}

/// Receives text the user must see to finish signing in.
pub type Notifier = Arc<dyn Fn(&str) + Send + Sync>;

/// [`IdentityProvider`] backed by the Microsoft identity platform.
pub struct MicrosoftIdentityProvider {
    client: IdentityClient,
    open_browser: bool,
    notify: Notifier,
}

impl MicrosoftIdentityProvider {
    pub fn new(client: IdentityClient, notify: Notifier) -> Self {
        Self {
            client,
            open_browser: true,
            notify,
        }
    }

    /// Skip launching the system browser; the sign-in URL goes to the notifier instead.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    async fn acquire_interactive(&self, login_hint: Option<&str>) -> Result<AuthResult, AuthError> {
        let notify = self.notify.clone();
        run_loopback_flow(&self.client, login_hint, self.open_browser, move |url| {
            notify(&format!("Open the following URL in a browser to sign in:\n  {url}"));
            Ok(())
        })
        .await
    }

    async fn acquire_by_device_code(&self) -> Result<AuthResult, AuthError> {
        let pending = start_device_flow(&self.client).await?;
        (self.notify)(&pending.message());
        pending.wait().await
    }
}

impl fmt::Debug for MicrosoftIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrosoftIdentityProvider")
            .field("client", &self.client)
            .field("open_browser", &self.open_browser)
            .finish()
    }
}

#[async_trait]
impl IdentityProvider for MicrosoftIdentityProvider {
    async fn acquire(&self, mode: &AcquireMode) -> Result<AuthResult, AuthError> {
        match mode {
            AcquireMode::Interactive { login_hint } => {
                self.acquire_interactive(login_hint.as_deref()).await
            }
            AcquireMode::DeviceCode => self.acquire_by_device_code().await,
        }
    }
}
