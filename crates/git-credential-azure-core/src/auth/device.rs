use std::time::Duration;

use tokio::time::{sleep, Instant};

use super::oauth::DeviceCodeResponse;
use super::{AuthError, AuthResult, IdentityClient};

/// Extra delay the identity platform asks for with `slow_down`.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);
/// Shortest gap between two token polls, whatever interval the server sends.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Device codes never outlive this, whatever lifetime the server reports.
const MAX_CODE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Device code issued and waiting for the user to sign in elsewhere.
#[derive(Debug)]
pub struct PendingDeviceAuth {
    client: IdentityClient,
    code: DeviceCodeResponse,
    deadline: Instant,
    min_interval: Duration,
}

/// Request a device code. The returned handle carries the message to show the user.
pub async fn start_device_flow(client: &IdentityClient) -> Result<PendingDeviceAuth, AuthError> {
    let code = client.request_device_code().await?;
    tracing::debug!(
        verification_uri = %code.verification_uri,
        expires_in = code.expires_in,
        interval = code.interval,
        "device code issued"
    );
    let deadline = code_deadline(Instant::now(), code.expires_in);
    Ok(PendingDeviceAuth {
        client: client.clone(),
        code,
        deadline,
        min_interval: MIN_POLL_INTERVAL,
    })
}

fn code_deadline(now: Instant, expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).min(MAX_CODE_LIFETIME);
    now.checked_add(lifetime).unwrap_or(now)
}

impl PendingDeviceAuth {
    pub fn message(&self) -> String {
        self.code.display_message()
    }

    pub fn user_code(&self) -> &str {
        &self.code.user_code
    }

    #[cfg(test)]
    fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.code.interval).max(self.min_interval)
    }

    /// Poll the token endpoint until sign-in completes, is declined, or the code expires.
    pub async fn wait(self) -> Result<AuthResult, AuthError> {
        let mut interval = self.poll_interval();
        loop {
            sleep(interval).await;
            match self.client.poll_device_code(&self.code.device_code).await {
                Ok(result) => return Ok(result),
                Err(AuthError::OAuth { error, description }) => match error.as_str() {
                    "authorization_pending" => {}
                    "slow_down" => interval += SLOW_DOWN_STEP,
                    "expired_token" | "code_expired" => return Err(AuthError::DeviceCodeExpired),
                    "authorization_declined" | "access_denied" => {
                        return Err(AuthError::AccessDenied(description))
                    }
                    _ => return Err(AuthError::OAuth { error, description }),
                },
                Err(other) => return Err(other),
            }
            if Instant::now() >= self.deadline {
                return Err(AuthError::DeviceCodeExpired);
            }
        }
    }
}
