use std::env;

use super::AcquireMode;

/// Sign-in flows offered by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    Interactive,
    DeviceCode,
}

impl AuthFlow {
    /// Pick the flow from the `--device` switch.
    pub fn from_device_flag(device: bool) -> Self {
        if device {
            AuthFlow::DeviceCode
        } else {
            AuthFlow::Interactive
        }
    }

    /// Build the provider request for this flow.
    ///
    /// The username is forwarded as a login hint only when it looks like an
    /// email address; an organization name would confuse the sign-in page.
    pub fn acquire_mode(self, username: &str) -> AcquireMode {
        match self {
            AuthFlow::DeviceCode => AcquireMode::DeviceCode,
            AuthFlow::Interactive => AcquireMode::Interactive {
                login_hint: login_hint(username).map(ToOwned::to_owned),
            },
        }
    }
}

pub fn login_hint(username: &str) -> Option<&str> {
    username.contains('@').then_some(username)
}

/// Best-effort guess whether a local browser can complete the interactive flow.
pub fn browser_available() -> bool {
    if env::var_os("SSH_CONNECTION").is_some() && env::var_os("DISPLAY").is_none() {
        return false;
    }

    if env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some() {
        return true;
    }

    cfg!(target_os = "windows") || cfg!(target_os = "macos")
}

impl std::fmt::Display for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            AuthFlow::Interactive => "interactive",
            AuthFlow::DeviceCode => "device-code",
        };
        write!(f, "{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_names() {
        assert_eq!(AuthFlow::from_device_flag(false).to_string(), "interactive");
        assert_eq!(AuthFlow::from_device_flag(true).to_string(), "device-code");
    }

    #[test]
    fn hint_only_for_email_like_usernames() {
        assert_eq!(login_hint("alice@example.com"), Some("alice@example.com"));
        assert_eq!(login_hint("myorg"), None);
        assert_eq!(login_hint(""), None);
    }

    #[test]
    fn device_flow_never_carries_hint() {
        let mode = AuthFlow::from_device_flag(true).acquire_mode("alice@example.com");
        assert_eq!(mode, AcquireMode::DeviceCode);

        let mode = AuthFlow::from_device_flag(false).acquire_mode("alice@example.com");
        assert_eq!(
            mode,
            AcquireMode::Interactive {
                login_hint: Some("alice@example.com".into())
            }
        );
    }
}
