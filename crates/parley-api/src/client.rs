//! Retrying Slack Web API client used by the connection and history flows.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::retry::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

/// A channel or private group from the connect snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
}

/// A direct-message session from the connect snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct ImInfo {
    pub id: String,
    pub user: String,
}

/// Handshake result: the realtime socket URL plus the full identity snapshot.
#[derive(Debug, Clone)]
pub struct RtmSession {
    pub url: String,
    pub channels: Vec<ChannelInfo>,
    pub users: Vec<UserInfo>,
    pub groups: Vec<ChannelInfo>,
    pub ims: Vec<ImInfo>,
}

/// One page of channel history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<Value>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct RtmStartResponse {
    ok: bool,
    error: Option<String>,
    url: Option<String>,
    #[serde(default)]
    channels: Vec<ChannelInfo>,
    #[serde(default)]
    users: Vec<UserInfo>,
    #[serde(default)]
    groups: Vec<ChannelInfo>,
    #[serde(default)]
    ims: Vec<ImInfo>,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    error: Option<String>,
    messages: Option<Vec<Value>>,
    has_more: Option<bool>,
}

/// Paginated history source; implemented by [`SlackApiClient`] and by test
/// doubles in the history walker's tests.
#[async_trait]
pub trait HistoryPager: Send + Sync {
    async fn page(&self, channel_id: &str, latest: Option<&str>) -> Result<HistoryPage>;
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    admin_token: Option<String>,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        token: String,
        admin_token: Option<String>,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("parley-bot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create web api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            admin_token: admin_token
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    /// Whether the elevated credential is configured.
    pub fn has_admin_token(&self) -> bool {
        self.admin_token.is_some()
    }

    /// Performs the handshake and returns the socket URL plus snapshot.
    pub async fn rtm_start(&self) -> Result<RtmSession> {
        let response: RtmStartResponse = self
            .request_json("rtm.start", || {
                self.http
                    .post(format!("{}/rtm.start", self.api_base))
                    .bearer_auth(&self.token)
            })
            .await?;
        if !response.ok {
            bail!(
                "rtm.start failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let url = response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("rtm.start did not return a socket url"))?;
        Ok(RtmSession {
            url,
            channels: response.channels,
            users: response.users,
            groups: response.groups,
            ims: response.ims,
        })
    }

    /// Adds an emoji reaction to the message at `ts` in `channel_id`.
    pub async fn add_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        let params = [
            ("name", emoji),
            ("channel", channel_id),
            ("timestamp", ts),
        ];
        let response: AckResponse = self
            .request_json("reactions.add", || {
                self.http
                    .post(format!("{}/reactions.add", self.api_base))
                    .bearer_auth(&self.token)
                    .form(&params)
            })
            .await?;
        if !response.ok {
            bail!(
                "reactions.add failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    /// Deletes a message. With `elevated` set, the admin credential is used;
    /// if no admin credential is configured the delete is silently skipped
    /// and `Ok(false)` is returned.
    pub async fn delete_message(&self, channel_id: &str, ts: &str, elevated: bool) -> Result<bool> {
        let token = if elevated {
            match &self.admin_token {
                Some(token) => token.clone(),
                None => return Ok(false),
            }
        } else {
            self.token.clone()
        };
        let params = [("channel", channel_id), ("ts", ts), ("as_user", "true")];
        let response: AckResponse = self
            .request_json("chat.delete", || {
                self.http
                    .post(format!("{}/chat.delete", self.api_base))
                    .bearer_auth(&token)
                    .form(&params)
            })
            .await?;
        if !response.ok {
            bail!(
                "chat.delete failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(true)
    }

    /// Uploads a file into a channel or DM session.
    pub async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        filetype: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        if filename.trim().is_empty() {
            bail!("file upload requires a non-empty filename");
        }
        let channel_id = channel_id.to_string();
        let filename = filename.to_string();
        let filetype = filetype.to_string();
        let response: AckResponse = self
            .request_json("files.upload", move || {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone());
                let form = reqwest::multipart::Form::new()
                    .text("channels", channel_id.clone())
                    .text("filename", filename.clone())
                    .text("filetype", filetype.clone())
                    .part("file", part);
                self.http
                    .post(format!("{}/files.upload", self.api_base))
                    .bearer_auth(&self.token)
                    .multipart(form)
            })
            .await?;
        if !response.ok {
            bail!(
                "files.upload failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    /// Fetches one history page. `latest` is the exclusive upper cursor; a
    /// response without `has_more` is a protocol violation and fails the
    /// whole pagination run.
    pub async fn history_page(&self, channel_id: &str, latest: Option<&str>) -> Result<HistoryPage> {
        let method = history_method(channel_id);
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("inclusive", "false".to_string()),
        ];
        if let Some(latest) = latest {
            params.push(("latest", latest.to_string()));
        }
        let response: HistoryResponse = self
            .request_json(method, || {
                self.http
                    .post(format!("{}/{}", self.api_base, method))
                    .bearer_auth(&self.token)
                    .form(&params)
            })
            .await?;
        if !response.ok {
            bail!(
                "{method} failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let has_more = response
            .has_more
            .ok_or_else(|| anyhow!("{method} response is missing has_more"))?;
        let messages = response
            .messages
            .ok_or_else(|| anyhow!("{method} response is missing messages"))?;
        Ok(HistoryPage { messages, has_more })
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match builder().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode {operation} response"));
                    }
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16()) {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    bail!(
                        "web api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("web api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl HistoryPager for SlackApiClient {
    async fn page(&self, channel_id: &str, latest: Option<&str>) -> Result<HistoryPage> {
        self.history_page(channel_id, latest).await
    }
}

/// History endpoint by id-namespace convention: `C` public channel, `G`
/// private group, anything else a DM session.
fn history_method(channel_id: &str) -> &'static str {
    match channel_id.chars().next() {
        Some('C') => "channels.history",
        Some('G') => "groups.history",
        _ => "im.history",
    }
}
