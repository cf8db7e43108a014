use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use crate::error::{Result, StoreError};

/// A bearer token plus the expiry claim read out of its payload.
///
/// The signature is never checked here: the store is the only party that
/// verifies it, we only need `exp` to schedule the refresh.
#[derive(Debug, Clone)]
pub struct BearerToken {
    raw: Arc<str>,
    expires_at_unix: i64,
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<f64>,
}

impl BearerToken {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut parts = raw.split('.');
        let (Some(_header), Some(payload), Some(_sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(StoreError::Decode("token is not a three-part JWT".to_string()));
        };

        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| StoreError::Decode(format!("token payload base64: {e}")))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Decode(format!("token payload json: {e}")))?;
        let exp = claims
            .exp
            .ok_or_else(|| StoreError::Decode("token has no exp claim".to_string()))?;

        Ok(Self {
            raw: Arc::from(raw),
            expires_at_unix: exp.floor() as i64,
        })
    }

    pub fn raw(&self) -> &Arc<str> {
        &self.raw
    }

    pub fn expires_at_unix(&self) -> i64 {
        self.expires_at_unix
    }

    pub fn is_expired(&self, now_unix_ms: i64) -> bool {
        self.expires_at_unix.saturating_mul(1000) <= now_unix_ms
    }

    /// How long the refresh loop may sleep before it must reconnect.
    pub fn refresh_delay(&self, now_unix_ms: i64, margin: Duration) -> Duration {
        refresh_delay(self.expires_at_unix, now_unix_ms, margin)
    }
}

/// `expiry - now - margin`, clamped at zero (zero means "reconnect now").
pub fn refresh_delay(expires_at_unix: i64, now_unix_ms: i64, margin: Duration) -> Duration {
    let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
    let remaining_ms = expires_at_unix
        .saturating_mul(1000)
        .saturating_sub(now_unix_ms)
        .saturating_sub(margin_ms);
    if remaining_ms > 0 {
        Duration::from_millis(remaining_ms as u64)
    } else {
        Duration::ZERO
    }
}
