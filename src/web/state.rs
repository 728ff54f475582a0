use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A signed state is only honored for this long after being issued.
const STATE_TTL_SECS: i64 = 600;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid state parameter")]
    Invalid,
    #[error("authorization link expired")]
    Expired,
}

/// Signs the OAuth `state` parameter so the callback can recover which
/// discord user started the flow without any server-side session. The
/// payload is `user_id:timestamp`, carried as base64(hmac || payload).
pub struct StateSigner {
    key: Vec<u8>,
}

impl StateSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // new_from_slice only fails on zero-size hash output, not key size
        <HmacSha256 as Mac>::new_from_slice(&self.key).expect("hmac accepts any key length")
    }

    pub fn issue(&self, user_id: u64, now: DateTime<Utc>) -> String {
        let payload = format!("{}:{}", user_id, now.timestamp());
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(&combined)
    }

    /// Verify the signature and the age of a state parameter, returning
    /// the user id that started the flow.
    pub fn redeem(&self, signed: &str, now: DateTime<Utc>) -> Result<u64, StateError> {
        let combined = URL_SAFE_NO_PAD.decode(signed).map_err(|_| StateError::Invalid)?;
        if combined.len() < 32 {
            return Err(StateError::Invalid);
        }

        let (signature, payload) = combined.split_at(32);
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(signature).map_err(|_| StateError::Invalid)?;

        let payload = std::str::from_utf8(payload).map_err(|_| StateError::Invalid)?;
        let (user_id, issued_at) = payload.split_once(':').ok_or(StateError::Invalid)?;
        let user_id: u64 = user_id.parse().map_err(|_| StateError::Invalid)?;
        let issued_at: i64 = issued_at.parse().map_err(|_| StateError::Invalid)?;

        if now.timestamp() - issued_at > STATE_TTL_SECS {
            return Err(StateError::Expired);
        }

        Ok(user_id)
    }
}
