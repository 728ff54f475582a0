use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};

pub mod google;
pub mod store;
pub mod token;

use self::google::AuthClient;
use self::store::{StoreError, TokenStore};
use self::token::TokenBlob;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Exchange(String),
    #[error("{0}")]
    Refresh(String),
    #[error("credential serialization failed: {0}")]
    Blob(#[from] serde_json::Error),
}

#[derive(Debug)]
/// Outcome of a credential lookup. Everything but `Usable` is an expected
/// user state and gets guidance text, not an error.
pub enum Resolution {
    Usable(TokenBlob),
    /// No stored credential; the user has to go through `/connect`.
    NotConnected,
    /// A credential existed but cannot be made usable again silently.
    NeedsReauth,
}

/// Turns a stored blob into a ready-to-use credential, refreshing and
/// re-persisting it when the access token has expired.
pub struct Resolver {
    store: Arc<dyn TokenStore>,
    oauth: Arc<dyn AuthClient>,
}

impl Resolver {
    pub fn new(store: Arc<dyn TokenStore>, oauth: Arc<dyn AuthClient>) -> Self {
        Self { store, oauth }
    }

    /// Safe to call concurrently for the same user: the refresh grant is
    /// reusable on the provider side and the upsert is last-write-wins.
    pub async fn resolve(&self, user_id: u64) -> Result<Resolution, AuthError> {
        let Some(raw) = self.store.get(user_id).await? else {
            return Ok(Resolution::NotConnected);
        };

        let blob = match TokenBlob::from_json(&raw) {
            Ok(blob) => blob,
            Err(err) => {
                // a row we cannot read is as good as no row; drop it so
                // the next /connect starts clean
                warn!("dropping unreadable credential for user {user_id}: {err}");
                self.store.delete(user_id).await?;
                return Ok(Resolution::NotConnected);
            }
        };

        let now = Utc::now();
        if !blob.is_expired(now) {
            return Ok(Resolution::Usable(blob));
        }

        let Some(refresh_token) = blob.refresh_token.clone() else {
            debug!("credential for user {user_id} expired without a refresh token");
            self.store.delete(user_id).await?;
            return Ok(Resolution::NeedsReauth);
        };

        match self.oauth.refresh(&refresh_token).await {
            Ok(tokens) => {
                let updated = blob.refreshed(tokens, Utc::now());
                self.store.upsert(user_id, &updated.to_json()?).await?;
                Ok(Resolution::Usable(updated))
            }
            Err(err) => {
                warn!("could not refresh credential for user {user_id}: {err}");
                self.store.delete(user_id).await?;
                Ok(Resolution::NeedsReauth)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;

    use super::google::TokenSet;
    use super::store::MemoryTokenStore;
    use super::*;

    /// Auth client double: refuses or honors refreshes, counts calls.
    struct StubAuth {
        refresh_ok: bool,
        refresh_calls: AtomicUsize,
    }

    impl StubAuth {
        fn refusing() -> Self {
            Self {
                refresh_ok: false,
                refresh_calls: AtomicUsize::new(0),
            }
        }

        fn granting() -> Self {
            Self {
                refresh_ok: true,
                refresh_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AuthClient for StubAuth {
        fn authorize_url(&self, _state: &str, _redirect_uri: &str) -> String {
            unimplemented!("not exercised by resolver tests")
        }

        async fn exchange_code(
            &self,
            _code: &str,
            _redirect_uri: &str,
        ) -> Result<TokenSet, AuthError> {
            unimplemented!("not exercised by resolver tests")
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_ok {
                Ok(TokenSet {
                    access_token: "fresh-access".to_string(),
                    refresh_token: None,
                    token_type: "Bearer".to_string(),
                    expires_in: Some(3600),
                    scope: None,
                })
            } else {
                Err(AuthError::Refresh("invalid_grant".to_string()))
            }
        }
    }

    fn blob(expired: bool, refresh_token: Option<&str>) -> TokenBlob {
        let expiry = if expired {
            Utc::now() - Duration::hours(1)
        } else {
            Utc::now() + Duration::hours(1)
        };
        TokenBlob {
            access_token: "stored-access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expiry: Some(expiry),
            scopes: vec![],
        }
    }

    fn resolver(store: Arc<MemoryTokenStore>, auth: Arc<StubAuth>) -> Resolver {
        Resolver::new(store, auth)
    }

    #[tokio::test]
    async fn unknown_user_is_not_connected() {
        let store = Arc::new(MemoryTokenStore::default());
        let auth = Arc::new(StubAuth::refusing());
        let outcome = resolver(store, auth.clone()).resolve(1).await.unwrap();

        assert!(matches!(outcome, Resolution::NotConnected));
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_credential_is_returned_without_touching_anything() {
        let store = Arc::new(MemoryTokenStore::default());
        let stored = blob(false, Some("r")).to_json().unwrap();
        store.upsert(1, &stored).await.unwrap();
        let auth = Arc::new(StubAuth::refusing());

        let outcome = resolver(store.clone(), auth.clone()).resolve(1).await.unwrap();

        let Resolution::Usable(cred) = outcome else {
            panic!("expected a usable credential");
        };
        assert_eq!(cred.access_token, "stored-access");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
        // store still holds the original bytes
        assert_eq!(store.get(1).await.unwrap().as_deref(), Some(stored.as_str()));
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_and_persisted() {
        let store = Arc::new(MemoryTokenStore::default());
        store
            .upsert(1, &blob(true, Some("r")).to_json().unwrap())
            .await
            .unwrap();
        let auth = Arc::new(StubAuth::granting());

        let outcome = resolver(store.clone(), auth.clone()).resolve(1).await.unwrap();

        let Resolution::Usable(cred) = outcome else {
            panic!("expected a usable credential");
        };
        assert_eq!(cred.access_token, "fresh-access");
        // the refresh token survived a response that omitted it
        assert_eq!(cred.refresh_token.as_deref(), Some("r"));
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);

        let persisted = TokenBlob::from_json(&store.get(1).await.unwrap().unwrap()).unwrap();
        assert_eq!(persisted, cred);
    }

    #[tokio::test]
    async fn failed_refresh_deletes_the_row() {
        let store = Arc::new(MemoryTokenStore::default());
        store
            .upsert(1, &blob(true, Some("r")).to_json().unwrap())
            .await
            .unwrap();
        let auth = Arc::new(StubAuth::refusing());

        let outcome = resolver(store.clone(), auth).resolve(1).await.unwrap();

        assert!(matches!(outcome, Resolution::NeedsReauth));
        assert_eq!(store.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_without_refresh_token_needs_reauth() {
        let store = Arc::new(MemoryTokenStore::default());
        store
            .upsert(1, &blob(true, None).to_json().unwrap())
            .await
            .unwrap();
        let auth = Arc::new(StubAuth::refusing());

        let outcome = resolver(store.clone(), auth.clone()).resolve(1).await.unwrap();

        assert!(matches!(outcome, Resolution::NeedsReauth));
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_blob_counts_as_not_connected() {
        let store = Arc::new(MemoryTokenStore::default());
        store.upsert(1, "not json at all").await.unwrap();
        let auth = Arc::new(StubAuth::refusing());

        let outcome = resolver(store.clone(), auth).resolve(1).await.unwrap();

        assert!(matches!(outcome, Resolution::NotConnected));
        assert_eq!(store.get(1).await.unwrap(), None);
    }
}
