//! Reply delivery to the Bot Framework connector service.
//!
//! `ConnectorClient` is the only component that performs outbound network
//! I/O. It posts activities to the conversation endpoint under the inbound
//! activity's service URL and, when app credentials are configured, attaches
//! a bearer token acquired with the client-credentials grant.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::activity::{Activity, ResourceResponse};
use crate::error::BotError;

pub const DEFAULT_TOKEN_URL: &str =
    "https://login.microsoftonline.com/botframework.com/oauth2/v2.0/token";
const TOKEN_SCOPE: &str = "https://api.botframework.com/.default";
// Refresh a cached token this long before the issuer's expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
// Issuer-supplied lifetimes are capped at this before caching.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Send capability handed to every turn.
#[async_trait]
pub trait ActivitySender: Send + Sync {
    async fn send(&self, activity: &Activity) -> Result<ResourceResponse, BotError>;
}

#[derive(Clone)]
struct Credentials {
    app_id: String,
    app_password: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct ConnectorClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
    token_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl ConnectorClient {
    /// Credentials are only used when both the id and the password are
    /// non-empty; otherwise replies are sent anonymously (emulator mode).
    pub fn new(
        app_id: &str,
        app_password: &str,
        token_url: &str,
        timeout: Duration,
    ) -> Result<Self, BotError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BotError::InvalidSettings(format!("http client: {e}")))?;
        let credentials = if app_id.is_empty() || app_password.is_empty() {
            None
        } else {
            Some(Credentials {
                app_id: app_id.to_string(),
                app_password: app_password.to_string(),
            })
        };
        Ok(Self {
            http,
            credentials,
            token_url: token_url.to_string(),
            token: Mutex::new(None),
        })
    }

    async fn bearer_token(&self) -> Result<Option<String>, BotError> {
        let Some(creds) = &self.credentials else {
            return Ok(None);
        };
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(Some(token.value.clone()));
            }
        }

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", creds.app_id.as_str()),
            ("client_secret", creds.app_password.as_str()),
            ("scope", TOKEN_SCOPE),
        ];
        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Token(format!("status={}", status.as_u16())));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| BotError::Token(e.to_string()))?;
        let lifetime = token_lifetime(body.expires_in);
        tracing::debug!(expires_in_secs = lifetime.as_secs(), "acquired connector token");
        *cached = Instant::now()
            .checked_add(lifetime)
            .map(|expires_at| CachedToken {
                value: body.access_token.clone(),
                expires_at,
            });
        Ok(Some(body.access_token))
    }
}

fn token_lifetime(expires_in: Option<u64>) -> Duration {
    Duration::from_secs(expires_in.unwrap_or(3600)).min(MAX_TOKEN_LIFETIME)
}

/// `{serviceUrl}/v3/conversations/{conversationId}/activities[/{replyToId}]`
/// with each segment percent-encoded.
pub fn activities_url(activity: &Activity) -> Result<Url, BotError> {
    let service_url = activity
        .service_url
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(BotError::MissingRoute("activity has no serviceUrl"))?;
    let conversation_id = activity
        .conversation_id()
        .filter(|s| !s.is_empty())
        .ok_or(BotError::MissingRoute("activity has no conversation id"))?;

    let mut url = Url::parse(service_url)
        .map_err(|e| BotError::InvalidActivity(format!("serviceUrl '{service_url}': {e}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| BotError::MissingRoute("serviceUrl cannot be a base"))?;
        segments
            .pop_if_empty()
            .extend(["v3", "conversations", conversation_id, "activities"]);
        if let Some(reply_to) = activity.reply_to_id.as_deref().filter(|s| !s.is_empty()) {
            segments.push(reply_to);
        }
    }
    Ok(url)
}

#[async_trait]
impl ActivitySender for ConnectorClient {
    async fn send(&self, activity: &Activity) -> Result<ResourceResponse, BotError> {
        let url = activities_url(activity)?;
        let mut request = self.http.post(url.clone()).json(activity);
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BotError::SendFailed {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(url = %url, status = status.as_u16(), "activity delivered");
        // Some channels answer 200/201 with an empty body.
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}
