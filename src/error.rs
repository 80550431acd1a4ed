use thiserror::Error;

/// Failures surfaced by the adapter and the connector client.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("malformed activity body: {0}")]
    MalformedBody(String),
    #[error("invalid activity: {0}")]
    InvalidActivity(String),
    #[error("missing or invalid Authorization header")]
    Unauthorized,
    #[error("cannot route reply: {0}")]
    MissingRoute(&'static str),
    #[error("connector request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("connector rejected activity: status={status} body={body}")]
    SendFailed { status: u16, body: String },
    #[error("token acquisition failed: {0}")]
    Token(String),
    #[error("invalid adapter settings: {0}")]
    InvalidSettings(String),
}
