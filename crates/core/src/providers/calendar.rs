use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub resource_id: String,
    pub expiration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "self")]
    pub is_self: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub event_id: String,
    pub status: String,
    pub title: String,
    pub description: Option<String>,
    pub attendees: Vec<Attendee>,
    pub updated: DateTime<Utc>,
}

pub struct EventPage {
    pub events: Vec<CalendarEvent>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    /// The provider's sync token has expired or is otherwise unusable;
    /// callers must fall back to a full sync.
    #[error("sync token is no longer valid")]
    TokenGone,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn watch(&self, calendar_id: &str) -> anyhow::Result<Channel>;
    async fn stop(&self, channel_id: &str, resource_id: &str) -> anyhow::Result<()>;

    /// Lists events since `sync_token`, or a full listing (bounded to the
    /// last 30 days, page size 250) when `sync_token` is `None`.
    async fn list_events(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventPage, CalendarError>;
}

pub struct HttpCalendarClient {
    client: reqwest::Client,
    base_url: url::Url,
    access_token: String,
}

impl HttpCalendarClient {
    pub fn new(base_url: url::Url, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }
}

#[async_trait]
impl CalendarClient for HttpCalendarClient {
    async fn watch(&self, calendar_id: &str) -> anyhow::Result<Channel> {
        let url = self
            .base_url
            .join(&format!("calendars/{calendar_id}/events/watch"))?;
        let channel_id = uuid::Uuid::new_v4().to_string();

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "id": channel_id, "type": "web_hook" }))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        Ok(Channel {
            channel_id,
            resource_id: body["resourceId"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("missing resourceId in watch response"))?
                .to_string(),
            expiration_ms: body["expiration"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn stop(&self, channel_id: &str, resource_id: &str) -> anyhow::Result<()> {
        let url = self.base_url.join("channels/stop")?;
        self.client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "id": channel_id, "resourceId": resource_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventPage, CalendarError> {
        let url = self
            .base_url
            .join(&format!("calendars/{calendar_id}/events"))
            .map_err(|e| CalendarError::Other(e.into()))?;

        let mut query = Vec::new();
        if let Some(token) = sync_token {
            query.push(("syncToken", token.to_string()));
        } else {
            query.push(("timeMin", (Utc::now() - chrono::Duration::days(30)).to_rfc3339()));
            query.push(("maxResults", "250".to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| CalendarError::Other(e.into()))?;

        if response.status() == reqwest::StatusCode::GONE {
            return Err(CalendarError::TokenGone);
        }
        let response = response
            .error_for_status()
            .map_err(|e| CalendarError::Other(e.into()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CalendarError::Other(e.into()))?;

        let events = body["items"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| parse_event(&item))
            .collect();

        Ok(EventPage {
            events,
            next_page_token: body["nextPageToken"].as_str().map(str::to_string),
            next_sync_token: body["nextSyncToken"].as_str().map(str::to_string),
        })
    }
}

fn parse_event(item: &serde_json::Value) -> Option<CalendarEvent> {
    Some(CalendarEvent {
        event_id: item["id"].as_str()?.to_string(),
        status: item["status"].as_str().unwrap_or("confirmed").to_string(),
        title: item["summary"].as_str().unwrap_or_default().to_string(),
        description: item["description"].as_str().map(str::to_string),
        attendees: item["attendees"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|a| Attendee {
                email: a["email"].as_str().map(str::to_string),
                display_name: a["displayName"].as_str().map(str::to_string),
                is_self: a["self"].as_bool().unwrap_or(false),
            })
            .collect(),
        updated: item["updated"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}
