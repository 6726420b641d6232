//! HTTP implementation of the remote store.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Note, NoteId, OwnerId};

use super::remote::RemoteStore;

/// Bound on every remote call so a dead connection cannot leave the
/// reconciler stuck in a fetching state.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// JSON client for a remote note service exposing upsert, delete, and
/// timestamp-filtered list endpoints.
#[derive(Clone)]
pub struct HttpRemote {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let client = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|error| Error::RemoteUnavailable(error.to_string()))?;

        Ok(Self {
            endpoint,
            auth_token: auth_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.endpoint))
            .header("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|error| Error::RemoteUnavailable(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthenticated);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteUnavailable(parse_api_error(status, &body)));
        }

        Ok(response)
    }

    async fn read_notes(&self, response: reqwest::Response) -> Result<Vec<Note>> {
        response
            .json::<Vec<Note>>()
            .await
            .map_err(|error| Error::RemoteUnavailable(error.to_string()))
    }
}

impl RemoteStore for HttpRemote {
    async fn upsert(&self, note: &Note) -> Result<Note> {
        let response = self
            .send(self.request(reqwest::Method::POST, "/notes").json(note))
            .await?;
        response
            .json::<Note>()
            .await
            .map_err(|error| Error::RemoteUnavailable(error.to_string()))
    }

    async fn delete_by_id(&self, owner: &OwnerId, id: &NoteId) -> Result<()> {
        self.send(
            self.request(reqwest::Method::DELETE, &format!("/notes/{id}"))
                .query(&[("owner", owner.as_str())]),
        )
        .await?;
        Ok(())
    }

    async fn list_since(&self, owner: &OwnerId, since: DateTime<Utc>) -> Result<Vec<Note>> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/notes").query(&[
                ("owner", owner.as_str()),
                (
                    "since",
                    since.to_rfc3339_opts(SecondsFormat::Millis, true).as_str(),
                ),
            ]))
            .await?;
        self.read_notes(response).await
    }

    async fn list_all(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, "/notes")
                    .query(&[("owner", owner.as_str())]),
            )
            .await?;
        self.read_notes(response).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput(
            "endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
