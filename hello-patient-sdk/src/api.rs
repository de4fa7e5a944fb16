//! REST collaborator: thread creation and message history.

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

use crate::message::{HistoryRecord, Message};

/// Characters escaped in URL path segments built from ids.
pub(crate) const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub(crate) fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Failures of a REST call, split the way the session reacts to them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 404: the referenced thread no longer exists.
    #[error("not found")]
    NotFound,
    /// Any other non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// The user record served by `GET /users/me`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: String,
}

/// The backend calls the session depends on.
#[async_trait]
pub trait Api: Send + Sync {
    /// Create a thread for `user_id`, returning its id.
    async fn create_thread(&self, user_id: &str) -> Result<String, ApiError>;

    /// Full message history of a thread, oldest first.
    async fn fetch_messages(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Vec<Message>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ThreadCreated {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
}

/// Thread and user ids arrive as numbers from the reference backend but are
/// strings everywhere on the client.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Text(String),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Int(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// Decode a history body. Anything but an array of message records is
/// malformed.
pub fn decode_history(body: serde_json::Value) -> Result<Vec<Message>, ApiError> {
    if !body.is_array() {
        return Err(ApiError::Malformed(format!(
            "expected a list of messages, got {}",
            json_kind(&body)
        )));
    }
    if let Some(bad) = body
        .as_array()
        .and_then(|items| items.iter().find(|item| !item.is_object()))
    {
        return Err(ApiError::Malformed(format!(
            "expected message objects, got {}",
            json_kind(bad)
        )));
    }
    let records: Vec<HistoryRecord> =
        serde_json::from_value(body).map_err(|e| ApiError::Malformed(e.to_string()))?;
    Ok(records.into_iter().map(Message::from).collect())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// [`Api`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /users/me`.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let resp = self
            .http
            .get(format!("{}/users/me", self.base_url))
            .send()
            .await?;
        let resp = check_status(resp)?;
        resp.json::<User>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }
    Ok(resp)
}

#[async_trait]
impl Api for HttpApi {
    async fn create_thread(&self, user_id: &str) -> Result<String, ApiError> {
        let url = format!("{}/user/{}/thread", self.base_url, encode_segment(user_id));
        tracing::debug!(%url, "Creating thread");
        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let created: ThreadCreated = resp
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        Ok(created.id)
    }

    async fn fetch_messages(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        let url = format!(
            "{}/user/{}/{}/messages",
            self.base_url,
            encode_segment(user_id),
            encode_segment(thread_id)
        );
        tracing::debug!(%url, "Fetching history");
        let resp = check_status(self.http.get(url).send().await?)?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        decode_history(body)
    }
}
