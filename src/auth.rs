//! API key credentials for Carbon Black Cloud.
//!
//! The platform authenticates every request with a static header,
//! `X-Auth-Token: {api_secret}/{api_id}`. There is no token exchange and no
//! expiry to track, so `ApiCredentials` only validates and formats the pair.
//! The secret must never reach logs, hence the hand-written `Debug`.

use std::fmt;

use crate::error::{CbcError, Result};

/// Header carrying the API token.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Header carrying the org key on endpoints that require it.
pub const ORG_HEADER: &str = "X-Org";

/// An API ID / API secret pair issued under Settings > API Access.
#[derive(Clone)]
pub struct ApiCredentials {
    api_id: String,
    api_secret: String,
}

impl ApiCredentials {
    /// Builds credentials, rejecting empty or whitespace-only parts.
    pub fn new(api_id: &str, api_secret: &str) -> Result<Self> {
        let api_id = api_id.trim();
        let api_secret = api_secret.trim();
        if api_id.is_empty() {
            return Err(CbcError::Auth {
                message: "API ID is empty".to_string(),
            });
        }
        if api_secret.is_empty() {
            return Err(CbcError::Auth {
                message: "API secret is empty".to_string(),
            });
        }
        Ok(ApiCredentials {
            api_id: api_id.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    /// The public half of the key.
    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    /// Value for the `X-Auth-Token` header.
    pub fn token(&self) -> String {
        format!("{}/{}", self.api_secret, self.api_id)
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_id", &self.api_id)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
