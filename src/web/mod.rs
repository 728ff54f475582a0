use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use log::{error, info, warn};
use serde::Deserialize;

use crate::auth::google::AuthClient;
use crate::auth::store::TokenStore;
use crate::auth::token::TokenBlob;
use crate::auth::AuthError;

pub mod state;

use self::state::{StateError, StateSigner};

/// Everything the redirect endpoints need. The token store is the same
/// one the command handlers read from.
pub struct WebContext {
    pub store: Arc<dyn TokenStore>,
    pub oauth: Arc<dyn AuthClient>,
    pub signer: StateSigner,
    pub base_url: String,
}

impl WebContext {
    fn redirect_uri(&self) -> String {
        format!("{}/oauth2callback", self.base_url)
    }
}

pub fn router(ctx: Arc<WebContext>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/connect_google", get(connect_google))
        .route("/oauth2callback", get(oauth2callback))
        .with_state(ctx)
}

#[derive(Debug, thiserror::Error)]
enum WebError {
    #[error("missing user id")]
    MissingUser,
    #[error("missing authorization code")]
    MissingCode,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("credential serialization failed: {0}")]
    Blob(#[from] serde_json::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        // expected user mistakes get a 400 and a hint; anything else is
        // logged in full and shown as a generic failure page
        match self {
            WebError::MissingUser => page(
                StatusCode::BAD_REQUEST,
                "Error: Missing user ID.",
                "Please use the /connect command from Discord again.",
            ),
            WebError::MissingCode | WebError::State(StateError::Invalid) => page(
                StatusCode::BAD_REQUEST,
                "Authentication failed.",
                "This link is not valid. Please use /connect to get a fresh one.",
            ),
            WebError::State(StateError::Expired) => page(
                StatusCode::BAD_REQUEST,
                "This link has expired.",
                "Authorization links are valid for 10 minutes. Use /connect again.",
            ),
            err => {
                error!("oauth callback failed: {err}");
                page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An error occurred during authentication.",
                    "Please try again.",
                )
            }
        }
    }
}

fn page(status: StatusCode, title: &str, body: &str) -> Response {
    (status, Html(format!("<h1>{title}</h1><p>{body}</p>"))).into_response()
}

async fn home() -> Html<&'static str> {
    Html("Bot is alive!")
}

#[derive(Deserialize)]
struct ConnectQuery {
    user_id: Option<String>,
}

/// Entry point of the flow; the bot hands users a link here and we
/// forward them to the consent page with a signed state attached.
async fn connect_google(
    State(ctx): State<Arc<WebContext>>,
    Query(query): Query<ConnectQuery>,
) -> Result<Redirect, WebError> {
    let user_id: u64 = query
        .user_id
        .as_deref()
        .and_then(|raw| raw.parse().ok())
        .ok_or(WebError::MissingUser)?;

    let state = ctx.signer.issue(user_id, Utc::now());
    let url = ctx.oauth.authorize_url(&state, &ctx.redirect_uri());
    Ok(Redirect::temporary(&url))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn oauth2callback(
    State(ctx): State<Arc<WebContext>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, WebError> {
    if let Some(reason) = query.error {
        // the user backed out on the consent screen
        warn!("authorization declined: {reason}");
        return Ok(page(
            StatusCode::BAD_REQUEST,
            "Authorization was declined.",
            "You can restart at any time with the /connect command.",
        ));
    }

    let state = query.state.as_deref().ok_or(StateError::Invalid)?;
    let user_id = ctx.signer.redeem(state, Utc::now())?;
    let code = query.code.as_deref().ok_or(WebError::MissingCode)?;

    let tokens = ctx.oauth.exchange_code(code, &ctx.redirect_uri()).await?;
    let blob = TokenBlob::from_token_set(tokens, Utc::now());
    ctx.store.upsert(user_id, &blob.to_json()?).await.map_err(AuthError::from)?;

    info!("stored google credential for user {user_id}");
    Ok(page(
        StatusCode::OK,
        "Authentication successful!",
        "You can now close this window and use the /events command in Discord.",
    ))
}
