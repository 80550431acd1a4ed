//! The adapter seam between the HTTP endpoint and the Bot Framework
//! protocol: it turns raw requests into activities and runs them through
//! a handler table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::Url;

use crate::activity::Activity;
use crate::connector::{ActivitySender, ConnectorClient, DEFAULT_TOKEN_URL};
use crate::error::BotError;
use crate::handlers::{HandlerSet, TurnContext};

/// Constructed once at startup and held for the process lifetime.
#[derive(Clone)]
pub struct AdapterSettings {
    pub app_id: String,
    pub app_password: String,
    pub openid_metadata_url: Option<String>,
    pub oauth_token_url: String,
}

impl AdapterSettings {
    pub fn new(app_id: impl Into<String>, app_password: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_password: app_password.into(),
            openid_metadata_url: None,
            oauth_token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    fn validate(&self) -> Result<(), BotError> {
        if let Some(url) = &self.openid_metadata_url {
            ensure_http_url(url).map_err(|reason| {
                BotError::InvalidSettings(format!("openid metadata url '{url}' {reason}"))
            })?;
        }
        ensure_http_url(&self.oauth_token_url).map_err(|reason| {
            BotError::InvalidSettings(format!(
                "oauth token url '{}' {reason}",
                self.oauth_token_url
            ))
        })
    }
}

impl std::fmt::Debug for AdapterSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSettings")
            .field("app_id", &self.app_id)
            .field("app_password", &"<hidden>")
            .field("openid_metadata_url", &self.openid_metadata_url)
            .field("oauth_token_url", &self.oauth_token_url)
            .finish()
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Validate and normalise an inbound request into an activity.
    async fn parse_request(&self, headers: &HeaderMap, body: &[u8]) -> Result<Activity, BotError>;

    /// Run the handler registered for the activity's type, including any
    /// reply delivery. A type with no handler is a no-op.
    async fn process_activity(
        &self,
        activity: Activity,
        handlers: &HandlerSet,
    ) -> Result<(), BotError>;
}

pub struct BotAdapter {
    settings: AdapterSettings,
    sender: Arc<dyn ActivitySender>,
    turn_error_text: Option<String>,
}

impl BotAdapter {
    /// Build an adapter that delivers replies through the connector service.
    /// Invalid settings are the only construction failure.
    pub fn new(settings: AdapterSettings, send_timeout: Duration) -> Result<Self, BotError> {
        settings.validate()?;
        let connector = ConnectorClient::new(
            &settings.app_id,
            &settings.app_password,
            &settings.oauth_token_url,
            send_timeout,
        )?;
        Ok(Self {
            settings,
            sender: Arc::new(connector),
            turn_error_text: None,
        })
    }

    /// Build an adapter around a caller-supplied send capability.
    pub fn with_sender(
        settings: AdapterSettings,
        sender: Arc<dyn ActivitySender>,
    ) -> Result<Self, BotError> {
        settings.validate()?;
        Ok(Self {
            settings,
            sender,
            turn_error_text: None,
        })
    }

    /// Text sent back to the user when a handler fails.
    pub fn with_turn_error_text(mut self, text: Option<String>) -> Self {
        self.turn_error_text = text;
        self
    }

    async fn on_turn_error(&self, turn: &TurnContext, err: &BotError) {
        let Some(text) = self.turn_error_text.as_deref() else {
            return;
        };
        if let Err(send_err) = turn.send_activity(Activity::message(text)).await {
            tracing::warn!(
                error = %send_err,
                turn_error = %err,
                "failed to deliver turn error notice"
            );
        }
    }
}

#[async_trait]
impl Adapter for BotAdapter {
    async fn parse_request(&self, headers: &HeaderMap, body: &[u8]) -> Result<Activity, BotError> {
        // Empty credentials mean emulator mode: unauthenticated requests pass.
        if !self.settings.app_id.is_empty() && bearer_token(headers).is_none() {
            return Err(BotError::Unauthorized);
        }

        let activity: Activity =
            serde_json::from_slice(body).map_err(|e| BotError::MalformedBody(e.to_string()))?;
        if activity.kind.as_str().trim().is_empty() {
            return Err(BotError::InvalidActivity("activity type is empty".into()));
        }
        if let Some(url) = &activity.service_url {
            ensure_http_url(url).map_err(|reason| {
                BotError::InvalidActivity(format!("serviceUrl '{url}' {reason}"))
            })?;
        }
        Ok(activity)
    }

    async fn process_activity(
        &self,
        activity: Activity,
        handlers: &HandlerSet,
    ) -> Result<(), BotError> {
        let Some(handler) = handlers.get(&activity.kind).cloned() else {
            tracing::debug!(activity_type = %activity.kind, "no handler registered");
            return Ok(());
        };
        let turn = TurnContext::new(activity, self.sender.clone());
        match handler.handle(&turn).await {
            Ok(reply) => {
                if let Some(reply) = reply {
                    tracing::debug!(reply_id = ?reply.id, "turn produced reply");
                }
                Ok(())
            }
            Err(err) => {
                self.on_turn_error(&turn, &err).await;
                Err(err)
            }
        }
    }
}

/// Credentials of an `Authorization: Bearer <token>` header. The scheme is
/// case-insensitive and must be followed by a space.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.trim_start().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn ensure_http_url(raw: &str) -> Result<(), &'static str> {
    let url = Url::parse(raw).map_err(|_| "is not an absolute URL")?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err("must use http or https"),
    }
}
