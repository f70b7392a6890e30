use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// Identifies one account within one provider's namespace,
/// e.g. `facebook` / `125600`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionKey {
    pub provider_id: String,
    pub provider_user_id: String,
}

impl ConnectionKey {
    pub fn new(provider_id: impl Into<String>, provider_user_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_user_id: provider_user_id.into(),
        }
    }
}

impl Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.provider_user_id)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum InvalidConnectionKeyError {
    #[error("Connection key: {0} is malformed, expected `provider_id:provider_user_id`")]
    Malformed(String),
}

impl FromStr for ConnectionKey {
    type Err = InvalidConnectionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((provider_id, provider_user_id))
                if !provider_id.is_empty() && !provider_user_id.is_empty() =>
            {
                Ok(Self::new(provider_id, provider_user_id))
            }
            _ => Err(InvalidConnectionKeyError::Malformed(s.to_string())),
        }
    }
}

/// Provider specific credentials carried by a `Connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "oauth1")]
    OAuth1 {
        token: String,
        secret: String,
    },
    #[serde(rename = "oauth2", rename_all = "camelCase")]
    OAuth2 {
        access_token: String,
        refresh_token: Option<String>,
        /// Expiry of the access token as a timestamp in millis
        expires_at: Option<i64>,
    },
}

impl Credentials {
    pub fn access_token(&self) -> &str {
        match self {
            Self::OAuth1 { token, .. } => token,
            Self::OAuth2 { access_token, .. } => access_token,
        }
    }
}

/// A link between a local user and one account on an external provider.
///
/// The `key` is the identity of the link and never changes once the connection
/// is stored. Profile fields and credentials may be updated through the
/// user's connection repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub key: ConnectionKey,
    pub display_name: Option<String>,
    pub profile_url: Option<String>,
    pub image_url: Option<String>,
    pub credentials: Credentials,
}

impl Connection {
    pub fn new(key: ConnectionKey, credentials: Credentials) -> Self {
        Self {
            key,
            display_name: None,
            profile_url: None,
            image_url: None,
            credentials,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_profile_url(mut self, profile_url: impl Into<String>) -> Self {
        self.profile_url = Some(profile_url.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.key.provider_id
    }

    pub fn provider_user_id(&self) -> &str {
        &self.key.provider_user_id
    }

    /// OAuth1 tokens and OAuth2 tokens without an expiry never expire
    pub fn has_expired(&self, now_millis: i64) -> bool {
        match self.credentials {
            Credentials::OAuth2 {
                expires_at: Some(expires_at),
                ..
            } => expires_at <= now_millis,
            _ => false,
        }
    }
}
