mod browser;
mod device;
mod error;
mod flow;
mod oauth;
mod pkce;
mod provider;
mod result;

pub use browser::run_loopback_flow;
pub use device::{start_device_flow, PendingDeviceAuth};
pub use error::AuthError;
pub use flow::{browser_available, login_hint, AuthFlow};
pub use oauth::{DeviceCodeResponse, IdentityClient, IdentityEndpoints};
pub use pkce::PkcePair;
pub use provider::{AcquireMode, IdentityProvider, MicrosoftIdentityProvider, Notifier};
pub use result::{account_from_id_token, Account, AuthResult};
