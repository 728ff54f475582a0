use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Default)]
/// Configuration regarding the discord bot itself,
/// currently just the gateway token.
pub struct DiscordConfig {
    pub token: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One row per user in a `google_tokens` table.
    Postgres,
    /// In-process map, lost on restart. Only meant for local runs.
    Memory,
}

#[derive(Deserialize, Debug, Clone)]
/// Where user credentials are persisted.
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Postgres connection string. Required when the backend is `postgres`.
    pub url: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
/// OAuth application credentials issued by the Google console.
/// The redirect URI registered there must be `{web.base_url}/oauth2callback`.
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize, Debug, Clone)]
/// The embedded http listener completing the OAuth redirect.
pub struct WebConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8080`.
    pub listen: String,
    /// Externally reachable base url, used to build the links handed
    /// out by `/connect` and the redirect uri sent to Google.
    /// No trailing slash.
    pub base_url: String,
    /// Secret used to sign the OAuth state parameter.
    pub state_secret: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CalendarConfig {
    /// IANA timezone used to interpret `when` arguments and to display
    /// all-day events.
    #[serde(default = "default_timezone")]
    pub timezone: chrono_tz::Tz,
    /// Upper bound on every request to Google, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_timezone() -> chrono_tz::Tz {
    chrono_tz::UTC
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
/// Main configuration structure
/// This does not have any particular meaning; It just contains
/// all the configuration blocks.
pub struct Config {
    pub discord: DiscordConfig,
    pub storage: StorageConfig,
    pub google: GoogleConfig,
    pub web: WebConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
}
