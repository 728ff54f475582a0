use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("calendar api rejected the request: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Google represents event boundaries as either a timestamp (timed event)
/// or a bare date (all-day event); exactly one of the two is set.
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    pub fn timed(at: DateTime<Utc>, time_zone: &str) -> Self {
        Self {
            date_time: Some(at),
            date: None,
            time_zone: Some(time_zone.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    pub id: String,
    pub summary: Option<String>,
    pub html_link: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
/// Body of an event insertion.
pub struct NewEvent {
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventList {
    items: Vec<Event>,
}

/// Thin client for the Calendar v3 REST API, always addressing the
/// authorized user's `primary` calendar. Credentials are passed per call;
/// the client itself holds no user state.
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl CalendarClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
        }
    }

    /// Point the client at a different API host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The next `max_results` events from now on, expanded to single
    /// instances and ordered by start time, as the API guarantees.
    pub async fn upcoming(
        &self,
        access_token: &str,
        max_results: u32,
    ) -> Result<Vec<Event>, CalendarError> {
        let resp = self
            .http
            .get(format!("{}/calendars/primary/events", self.base_url))
            .bearer_auth(access_token)
            .query(&[
                (
                    "timeMin",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                ("maxResults", max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Api(body));
        }

        let list: EventList = resp.json().await?;
        Ok(list.items)
    }

    pub async fn insert(
        &self,
        access_token: &str,
        event: &NewEvent,
    ) -> Result<Event, CalendarError> {
        let resp = self
            .http
            .post(format!("{}/calendars/primary/events", self.base_url))
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Api(body));
        }

        Ok(resp.json().await?)
    }
}
