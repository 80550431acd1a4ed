use std::env;
use std::fmt;

use anyhow::{anyhow, Result};

use crate::adapter::AdapterSettings;
use crate::connector::DEFAULT_TOKEN_URL;

pub const DEFAULT_PORT: u16 = 3978;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone)]
pub struct AppConfig {
    pub app_id: String,
    pub app_password: String,
    pub port: u16,
    pub openid_metadata_url: Option<String>,
    pub oauth_token_url: String,
    pub cors_preflight: bool,
    pub max_request_bytes: Option<usize>,
    pub welcome_text: Option<String>,
    pub turn_error_text: Option<String>,
    pub send_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from the process environment. Missing credentials
    /// are not an error: they are reported and left empty so the adapter can
    /// run in emulator mode. Malformed switches are reported and replaced by
    /// their defaults; only adapter construction may stop startup.
    pub fn from_env() -> Result<Self> {
        let app_id = read_credential("APP_ID");
        let app_password = read_credential("APP_PASSWORD");
        if !app_id.is_empty() {
            tracing::info!(app_id = %redact(&app_id), "APP_ID is set");
        }
        if !app_password.is_empty() {
            tracing::info!(length = app_password.chars().count(), "APP_PASSWORD is set (hidden)");
        }

        let port = or_warn("PORT", parse_port("PORT")).unwrap_or(DEFAULT_PORT);

        let openid_metadata_url = parse_optional_string("OPENID_METADATA_URL");
        let oauth_token_url = parse_optional_string("BOT_OAUTH_TOKEN_URL")
            .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string());
        let cors_preflight =
            or_warn("BOT_CORS_PREFLIGHT", parse_bool_env("BOT_CORS_PREFLIGHT")).unwrap_or(false);
        let max_request_bytes =
            or_warn("BOT_MAX_REQUEST_BYTES", parse_optional_usize("BOT_MAX_REQUEST_BYTES"));
        let welcome_text = parse_optional_string("BOT_WELCOME_TEXT");
        let turn_error_text = parse_optional_string("BOT_TURN_ERROR_TEXT");
        let send_timeout_ms =
            or_warn("BOT_SEND_TIMEOUT_MS", parse_optional_u64("BOT_SEND_TIMEOUT_MS"))
                .unwrap_or(DEFAULT_SEND_TIMEOUT_MS);

        Ok(Self {
            app_id,
            app_password,
            port,
            openid_metadata_url,
            oauth_token_url,
            cors_preflight,
            max_request_bytes,
            welcome_text,
            turn_error_text,
            send_timeout_ms,
        })
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            app_id: self.app_id.clone(),
            app_password: self.app_password.clone(),
            openid_metadata_url: self.openid_metadata_url.clone(),
            oauth_token_url: self.oauth_token_url.clone(),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_id", &redact(&self.app_id))
            .field("app_password", &"<hidden>")
            .field("port", &self.port)
            .field("openid_metadata_url", &self.openid_metadata_url)
            .field("oauth_token_url", &self.oauth_token_url)
            .field("cors_preflight", &self.cors_preflight)
            .field("max_request_bytes", &self.max_request_bytes)
            .field("welcome_text", &self.welcome_text)
            .field("turn_error_text", &self.turn_error_text)
            .field("send_timeout_ms", &self.send_timeout_ms)
            .finish()
    }
}

/// Render a credential for logs: at most a four character prefix and the
/// length. Values of eight characters or fewer show no prefix at all.
pub fn redact(value: &str) -> String {
    let len = value.chars().count();
    if len <= 8 {
        return format!("***({} chars)", len);
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{}***({} chars)", prefix, len)
}

fn read_credential(var: &str) -> String {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => {
            tracing::warn!(variable = var, "{} is not set", var);
            String::new()
        }
    }
}

fn parse_optional_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_usize(var: &str) -> Result<Option<usize>> {
    parse_optional_u64(var)?
        .map(|v| usize::try_from(v).map_err(|_| anyhow!("{} is too large", var)))
        .transpose()
}

fn parse_port(var: &str) -> Result<Option<u16>> {
    parse_optional_u64(var)?
        .map(|v| u16::try_from(v).map_err(|_| anyhow!("{} must be a valid TCP port", var)))
        .transpose()
}

/// Swap a parse error for `None` so the caller falls back to its default.
fn or_warn<T>(var: &str, parsed: Result<Option<T>>) -> Option<T> {
    parsed.unwrap_or_else(|err| {
        tracing::warn!(variable = var, error = %err, "ignoring malformed {}, using default", var);
        None
    })
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
