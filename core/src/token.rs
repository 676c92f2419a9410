use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Fallback lifetime when the auth endpoint does not declare `expires_in`.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 25 * 60;

/// Tokens are treated as expired this long before the server says so.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Upper bound on any token lifetime, declared or configured.
pub const MAX_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Body of a successful `POST /auth/token`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// Token values stay out of logs and panics.
impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    /// Build a cache entry for a token issued at `issued_at`.
    ///
    /// The lifetime is the server-declared `expires_in` when it is positive,
    /// otherwise `default_ttl`, capped at [`MAX_TOKEN_TTL_SECS`]. The refresh
    /// margin is only subtracted when the lifetime is long enough to absorb it
    /// twice over.
    pub fn issue(
        value: String,
        issued_at: DateTime<Utc>,
        expires_in: Option<i64>,
        default_ttl: Duration,
    ) -> Self {
        let max_ttl = Duration::seconds(MAX_TOKEN_TTL_SECS);
        let ttl = expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::seconds(secs.min(MAX_TOKEN_TTL_SECS)))
            .unwrap_or(default_ttl)
            .min(max_ttl);
        let margin = Duration::seconds(REFRESH_MARGIN_SECS);
        let effective = if ttl > margin * 2 { ttl - margin } else { ttl };
        Self {
            value,
            issued_at,
            expires_at: issued_at
                .checked_add_signed(effective)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Lifecycle phase of the cached token at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    Absent,
    Valid,
    Expired,
}

impl TokenPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPhase::Absent => "absent",
            TokenPhase::Valid => "valid",
            TokenPhase::Expired => "expired",
        }
    }
}

/// What the client holds. There is never more than one token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenState {
    #[default]
    Absent,
    Cached(CachedToken),
}

impl TokenState {
    pub fn phase_at(&self, now: DateTime<Utc>) -> TokenPhase {
        match self {
            TokenState::Absent => TokenPhase::Absent,
            TokenState::Cached(token) if token.is_valid_at(now) => TokenPhase::Valid,
            TokenState::Cached(_) => TokenPhase::Expired,
        }
    }

    /// The token value, only if it may still be used at `now`.
    pub fn usable_at(&self, now: DateTime<Utc>) -> Option<&str> {
        match self {
            TokenState::Cached(token) if token.is_valid_at(now) => Some(&token.value),
            _ => None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            TokenState::Absent => None,
            TokenState::Cached(token) => Some(token.expires_at),
        }
    }

    pub fn replace(&mut self, token: CachedToken) {
        *self = TokenState::Cached(token);
    }
}
