//! Token pair model and expiry derivation
//!
//! The access/refresh token pair is held in memory by the auth lifecycle
//! manager and mirrored to the credential store on every change. An access
//! token is never stored without a derived expiry: callers determine
//! staleness from `expires_at` alone and never re-parse the token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::auth;

/// Access/refresh token pair with its derived expiry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    /// Bearer access token
    pub access: String,
    /// Refresh token, absent for sessions that cannot be renewed
    pub refresh: Option<String>,
    /// Wall-clock instant at which `access` stops being usable
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    /// Build a token pair, deriving the expiry.
    ///
    /// Derivation order: the explicit `expires_at` when the backend supplied
    /// one, else the access token's own `exp` claim, else a fallback window
    /// of thirty minutes from now.
    pub fn new(
        access: impl Into<String>,
        refresh: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let access = access.into();
        let expires_at = expires_at
            .or_else(|| parse_jwt_expiry(&access))
            .or_else(|| {
                Utc::now().checked_add_signed(
                    ChronoDuration::from_std(auth::DEFAULT_TOKEN_LIFETIME)
                        .unwrap_or_else(|_| ChronoDuration::minutes(30)),
                )
            });
        Self {
            access,
            refresh,
            expires_at,
        }
    }

    /// Whether the token expires within `buffer` from now.
    ///
    /// A pair with no derivable expiry is treated as already stale.
    pub fn is_expiring_within(&self, buffer: std::time::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let buffer =
                    ChronoDuration::from_std(buffer).unwrap_or_else(|_| ChronoDuration::zero());
                Utc::now() >= expires_at - buffer
            }
            None => true,
        }
    }

    /// Whether the token has already expired
    pub fn is_expired(&self) -> bool {
        self.is_expiring_within(std::time::Duration::ZERO)
    }
}

/// Extract the `exp` claim from a JWT access token, if present.
///
/// Tolerates non-JWT tokens: any decode failure yields `None` rather than an
/// error, since opaque bearer tokens are valid input.
pub fn parse_jwt_expiry(access: &str) -> Option<DateTime<Utc>> {
    let payload = access.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}
