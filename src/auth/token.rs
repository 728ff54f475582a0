use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::google::TokenSet;

/// Tokens are treated as expired slightly before their actual deadline so
/// a request started just before the cutoff does not race the provider.
const EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Authorization state for one user, as persisted in the token store.
/// The store round-trips the serialized form untouched; the only writer
/// besides the OAuth callback is a successful refresh.
pub struct TokenBlob {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absolute expiry of `access_token`. Absent means the provider did
    /// not communicate a lifetime and the token is used as-is.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenBlob {
    /// Build a blob from a token-endpoint response received at `now`.
    pub fn from_token_set(set: TokenSet, now: DateTime<Utc>) -> Self {
        Self {
            access_token: set.access_token,
            refresh_token: set.refresh_token,
            expiry: set
                .expires_in
                .map(|secs| now + Duration::seconds(secs as i64)),
            scopes: set
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    /// Fold a refresh response into this blob. Google omits the refresh
    /// token from refresh responses unless it rotated, so the stored one
    /// is carried over when the response has none.
    pub fn refreshed(&self, set: TokenSet, now: DateTime<Utc>) -> Self {
        let mut updated = Self::from_token_set(set, now);
        if updated.refresh_token.is_none() {
            updated.refresh_token = self.refresh_token.clone();
        }
        if updated.scopes.is_empty() {
            updated.scopes = self.scopes.clone();
        }
        updated
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_LEEWAY_SECS) <= now,
            None => false,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(access: &str, refresh: Option<&str>, expires_in: Option<u64>) -> TokenSet {
        TokenSet {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".to_string(),
            expires_in,
            scope: Some("https://www.googleapis.com/auth/calendar".to_string()),
        }
    }

    #[test]
    fn json_round_trip() {
        let now = Utc::now();
        let blob = TokenBlob::from_token_set(set("a", Some("r"), Some(3600)), now);
        let restored = TokenBlob::from_json(&blob.to_json().unwrap()).unwrap();
        assert_eq!(blob, restored);
    }

    #[test]
    fn expiry_honors_leeway() {
        let now = Utc::now();
        let blob = TokenBlob::from_token_set(set("a", None, Some(3600)), now);
        assert!(!blob.is_expired(now));
        // inside the leeway window counts as expired
        assert!(blob.is_expired(now + Duration::seconds(3600 - 10)));
        assert!(blob.is_expired(now + Duration::seconds(7200)));
    }

    #[test]
    fn blob_without_expiry_never_expires() {
        let now = Utc::now();
        let blob = TokenBlob::from_token_set(set("a", None, None), now);
        assert!(!blob.is_expired(now + Duration::days(365)));
    }

    #[test]
    fn refresh_keeps_old_refresh_token_when_response_has_none() {
        let now = Utc::now();
        let blob = TokenBlob::from_token_set(set("a", Some("keep-me"), Some(10)), now);
        let refreshed = blob.refreshed(set("b", None, Some(3600)), now);
        assert_eq!(refreshed.access_token, "b");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("keep-me"));
        assert!(!refreshed.is_expired(now));
    }

    #[test]
    fn refresh_adopts_rotated_refresh_token() {
        let now = Utc::now();
        let blob = TokenBlob::from_token_set(set("a", Some("old"), Some(10)), now);
        let refreshed = blob.refreshed(set("b", Some("new"), Some(3600)), now);
        assert_eq!(refreshed.refresh_token.as_deref(), Some("new"));
    }
}
