#[path = "common/mod.rs"]
mod common;

use std::io;
use std::sync::{Arc, Mutex};

use common::EnvGuard;
use echobot::AppConfig;
use once_cell::sync::Lazy;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn load_with_captured_logs() -> (anyhow::Result<AppConfig>, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, AppConfig::from_env);
    (result, logs.text())
}

#[test]
fn missing_credentials_warn_by_name_and_continue() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let _env = EnvGuard::clean();

    let (result, logs) = load_with_captured_logs();
    let cfg = result.expect("missing credentials are not fatal");
    assert!(cfg.app_id.is_empty() && cfg.app_password.is_empty());
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("APP_ID is not set"), "{logs}");
    assert!(logs.contains("APP_PASSWORD is not set"), "{logs}");
}

#[test]
fn password_value_never_reaches_the_log() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = EnvGuard::clean();
    let app_id = "0a1b2c3d-aaaa-bbbb-cccc-ddddeeeeffff";
    let password = "Zq8~super.secret-Password_value";
    env.set_many(&[("APP_ID", app_id), ("APP_PASSWORD", password)]);

    let (result, logs) = load_with_captured_logs();
    let cfg = result.unwrap();
    assert_eq!(cfg.app_password, password);
    assert!(logs.contains("APP_PASSWORD is set"), "{logs}");
    assert!(!logs.contains(password), "{logs}");
    assert!(!logs.contains(&password[..4]), "{logs}");
    assert!(!logs.contains(app_id), "{logs}");
    assert!(!logs.contains("is not set"), "{logs}");
}

#[test]
fn malformed_switch_warns_by_name() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = EnvGuard::clean();
    env.set_many(&[("PORT", "70000"), ("BOT_CORS_PREFLIGHT", "maybe")]);

    let (result, logs) = load_with_captured_logs();
    let cfg = result.expect("malformed switches are not fatal");
    assert_eq!(cfg.port, 3978);
    assert!(logs.contains("ignoring malformed PORT"), "{logs}");
    assert!(logs.contains("ignoring malformed BOT_CORS_PREFLIGHT"), "{logs}");
}
