//! Core library for the Azure DevOps git credential helper: the credential
//! line protocol, sign-in against the Microsoft identity platform, PAT
//! issuance, and the negotiation that ties them together.

pub mod auth;
pub mod config;
pub mod helper;
pub mod pat;
pub mod protocol;

pub use helper::{Action, CredentialHelper, HelperOptions};
pub use protocol::{CredentialRequest, CredentialResponse};
