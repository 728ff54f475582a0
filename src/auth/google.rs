use async_trait::async_trait;
use serde::Deserialize;

use super::AuthError;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// The single scope the bot asks for.
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

#[derive(Debug, Clone, Deserialize)]
/// Raw response of the Google token endpoint, for both the code exchange
/// and the refresh grant.
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[async_trait]
/// The slice of the OAuth dance this bot needs: hand out a consent url,
/// turn an authorization code into tokens, and silently refresh them.
pub trait AuthClient: Send + Sync {
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String;

    async fn exchange_code(&self, code: &str, redirect_uri: &str)
        -> Result<TokenSet, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;
}

/// Google OAuth 2.0 client. Token lifetime is one hour; refresh tokens are
/// only issued with `access_type=offline` and `prompt=consent`.
pub struct GoogleAuth {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    auth_endpoint: String,
    token_endpoint: String,
}

impl GoogleAuth {
    pub fn new(client_id: String, client_secret: String, http: reqwest::Client) -> Self {
        Self {
            client_id,
            client_secret,
            http,
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Point the client at a different token endpoint. Used by tests.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl AuthClient for GoogleAuth {
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{endpoint}?client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}\
             &access_type=offline\
             &prompt=consent",
            endpoint = self.auth_endpoint,
            client_id = urlencode(&self.client_id),
            redirect_uri = urlencode(redirect_uri),
            scope = urlencode(CALENDAR_SCOPE),
            state = urlencode(state),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("code", code),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Exchange(format!("token exchange request failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!("token exchange rejected: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| AuthError::Exchange(format!("malformed token response: {e}")))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("refresh_token", refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Refresh(format!("refresh request failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Refresh(format!("refresh rejected: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| AuthError::Refresh(format!("malformed refresh response: {e}")))
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> GoogleAuth {
        GoogleAuth::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            reqwest::Client::new(),
        )
        .with_token_endpoint(format!("{}/token", server.uri()))
    }

    #[test]
    fn authorize_url_carries_state_and_offline_access() {
        let auth = GoogleAuth::new("id".into(), "secret".into(), reqwest::Client::new());
        let url = auth.authorize_url("signed-state", "https://bot.example/oauth2callback");

        assert!(url.starts_with(AUTH_ENDPOINT));
        assert!(url.contains("state=signed-state"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fbot.example%2Foauth2callback"));
    }

    #[tokio::test]
    async fn exchange_code_posts_authorization_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "acc",
                "refresh_token": "ref",
                "token_type": "Bearer",
                "expires_in": 3599,
                "scope": CALENDAR_SCOPE,
            })))
            .mount(&server)
            .await;

        let tokens = client(&server)
            .exchange_code("the-code", "https://bot.example/oauth2callback")
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "acc");
        assert_eq!(tokens.refresh_token.as_deref(), Some("ref"));
        assert_eq!(tokens.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn refresh_posts_refresh_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=ref"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "token_type": "Bearer",
                "expires_in": 3599,
            })))
            .mount(&server)
            .await;

        let tokens = client(&server).refresh("ref").await.unwrap();
        assert_eq!(tokens.access_token, "fresh");
        assert_eq!(tokens.refresh_token, None);
    }

    #[tokio::test]
    async fn rejected_refresh_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let result = client(&server).refresh("revoked").await;
        assert!(matches!(result, Err(AuthError::Refresh(_))));
    }
}
