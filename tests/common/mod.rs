#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use echobot::{Activity, ActivitySender, BotError, ResourceResponse};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Every variable the service reads; cleared so tests start from defaults.
pub const BOT_ENV_VARS: &[&str] = &[
    "APP_ID",
    "APP_PASSWORD",
    "PORT",
    "OPENID_METADATA_URL",
    "BOT_OAUTH_TOKEN_URL",
    "BOT_CORS_PREFLIGHT",
    "BOT_MAX_REQUEST_BYTES",
    "BOT_WELCOME_TEXT",
    "BOT_TURN_ERROR_TEXT",
    "BOT_SEND_TIMEOUT_MS",
];

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    /// Start from a clean bot environment.
    pub fn clean() -> Self {
        let mut guard = Self {
            originals: HashMap::new(),
        };
        for key in BOT_ENV_VARS {
            guard.remove(key);
        }
        guard
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        self.originals
            .entry(key.to_string())
            .or_insert_with(|| std::env::var(key).ok());
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// In-process send capability that records outbound activities.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<Activity>>,
    pub fail: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.text().to_string())
            .collect()
    }
}

#[async_trait]
impl ActivitySender for RecordingSender {
    async fn send(&self, activity: &Activity) -> Result<ResourceResponse, BotError> {
        self.sent.lock().unwrap().push(activity.clone());
        if self.fail {
            return Err(BotError::SendFailed {
                status: 503,
                body: "connector unavailable".into(),
            });
        }
        Ok(ResourceResponse {
            id: Some(format!("sent-{}", self.sent.lock().unwrap().len())),
        })
    }
}

pub async fn spawn_app(app: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

/// What the mock connector service observed.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub path: String,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    pub deliveries: Arc<Mutex<Vec<Delivery>>>,
    pub token_requests: Arc<Mutex<Vec<String>>>,
    pub reject_with: Option<u16>,
    /// `expires_in` reported by `/token`; 3600 when unset.
    pub token_expires_in: Option<u64>,
}

impl MockConnector {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn token_request_count(&self) -> usize {
        self.token_requests.lock().unwrap().len()
    }
}

async fn accept_activity(
    State(mock): State<MockConnector>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    mock.deliveries.lock().unwrap().push(Delivery {
        path: format!("/v3/conversations/{}", rest),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    match mock.reject_with {
        Some(code) => (
            StatusCode::from_u16(code).unwrap(),
            Json(serde_json::json!({"error": {"code": "ServiceError"}})),
        ),
        None => (
            StatusCode::OK,
            Json(serde_json::json!({"id": "activity-from-connector"})),
        ),
    }
}

async fn issue_token(State(mock): State<MockConnector>, body: String) -> Json<serde_json::Value> {
    mock.token_requests.lock().unwrap().push(body);
    Json(serde_json::json!({
        "token_type": "Bearer",
        "expires_in": mock.token_expires_in.unwrap_or(3600),
        "access_token": "mock-access-token"
    }))
}

/// Start a connector service stand-in serving both the conversation
/// endpoint and the token endpoint (`/token`).
pub async fn start_mock_connector(mock: MockConnector) -> (String, JoinHandle<()>) {
    let app = Router::new()
        .route("/v3/conversations/*rest", post(accept_activity))
        .route("/token", post(issue_token))
        .with_state(mock);
    spawn_app(app).await
}

pub fn message_activity(service_url: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "message",
        "id": "inbound-1",
        "channelId": "msteams",
        "serviceUrl": service_url,
        "from": { "id": "29:user", "name": "Alice" },
        "recipient": { "id": "28:bot", "name": "EchoBot" },
        "conversation": { "id": "a:conv-1" },
        "text": text
    })
}
