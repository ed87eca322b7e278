//! Line-oriented `key=value` codec used by git to talk to credential helpers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

pub const HOST_KEY: &str = "host";
pub const PATH_KEY: &str = "path";
pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const PASSWORD_EXPIRY_KEY: &str = "password_expiry_utc";

/// Decode `key=value` lines into a mapping.
///
/// Only the first `=` separates key from value. Lines without a delimiter are
/// skipped and a repeated key keeps its last value.
pub fn parse(input: &str) -> BTreeMap<String, String> {
    let mut pairs = BTreeMap::new();
    for line in input.split('\n') {
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            pairs.insert(key.to_owned(), value.to_owned());
        }
    }
    pairs
}

/// Encode a mapping as newline-terminated `key=value` lines in key order.
pub fn serialize(pairs: &BTreeMap<String, String>) -> String {
    let mut output = String::new();
    for (key, value) in pairs {
        output.push_str(key);
        output.push('=');
        output.push_str(value);
        output.push('\n');
    }
    output
}

/// Credential request received from git on stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRequest {
    pairs: BTreeMap<String, String>,
}

impl CredentialRequest {
    pub fn parse(input: &str) -> Self {
        Self {
            pairs: parse(input),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn host(&self) -> &str {
        self.get(HOST_KEY).unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.get(PATH_KEY).unwrap_or_default()
    }

    pub fn username(&self) -> &str {
        self.get(USERNAME_KEY).unwrap_or_default()
    }

    /// Keys present in the request, for diagnostics that must not leak values.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.keys().map(String::as_str)
    }
}

impl From<BTreeMap<String, String>> for CredentialRequest {
    fn from(pairs: BTreeMap<String, String>) -> Self {
        Self { pairs }
    }
}

/// Credential handed back to git on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialResponse {
    pub username: Option<String>,
    pub password: String,
    pub password_expiry_utc: Option<DateTime<Utc>>,
}

impl CredentialResponse {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        pairs.insert(PASSWORD_KEY.to_owned(), self.password.clone());
        if let Some(username) = &self.username {
            pairs.insert(USERNAME_KEY.to_owned(), username.clone());
        }
        if let Some(expiry) = self.password_expiry_utc {
            pairs.insert(PASSWORD_EXPIRY_KEY.to_owned(), expiry.timestamp().to_string());
        }
        pairs
    }
}

impl fmt::Display for CredentialResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize(&self.to_map()))
    }
}
