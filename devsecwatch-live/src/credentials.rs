//! Credential supply
//!
//! The bearer token is owned by the auth layer; this module only reads it.
//! The identity used to address the push channel is the `sub` claim of the
//! access token, decoded locally without any network call.

use crate::error::{LiveError, Result};
use crate::models::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

pub trait CredentialSource: Send + Sync {
    /// Current access token, `None` when the user is signed out.
    fn access_token(&self) -> Option<String>;
}

/// In-memory token, the equivalent of browser session storage.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: RwLock::new(Some(token.into())) }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl CredentialSource for StaticCredentials {
    fn access_token(&self) -> Option<String> {
        self.token.read().clone().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTokens {
    access_token: String,
}

/// Token persisted on disk by the auth layer, re-read on every call so a
/// rotated token is picked up without restarting.
///
/// Accepts either the JSON written at login (`{"accessToken": ..}`) or a
/// bare token.
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for FileCredentials {
    fn access_token(&self) -> Option<String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("no token at {}: {e}", self.path.display());
                return None;
            }
        };
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        if content.starts_with('{') {
            serde_json::from_str::<StoredTokens>(content)
                .ok()
                .map(|t| t.access_token)
                .filter(|t| !t.is_empty())
        } else {
            Some(content.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Extracts the user handle from a JWT without verifying it.
pub fn identity_from_token(token: &str) -> Result<Identity> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| LiveError::InvalidToken("not a jwt".into()))?;
    // Some issuers keep the padding, the URL-safe engine wants none.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| LiveError::InvalidToken(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|e| LiveError::InvalidToken(e.to_string()))?;
    claims
        .sub
        .and_then(Identity::new)
        .ok_or_else(|| LiveError::InvalidToken("missing sub claim".into()))
}

/// Identity of whoever is currently signed in, if anyone.
pub fn current_identity(source: &dyn CredentialSource) -> Option<Identity> {
    let token = source.access_token()?;
    match identity_from_token(&token) {
        Ok(identity) => Some(identity),
        Err(e) => {
            tracing::warn!("cannot derive identity from token: {e}");
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn test_token(sub: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{sub}","exp":4102444800}}"#));
    format!("{header}.{payload}.signature")
}
