//! Test helpers: a loopback server standing in for the hosted backend, app
//! state wired to it, and log capture.

use std::{
    io,
    sync::{Arc, Mutex},
};

use axum::{Json, Router, body::to_bytes, extract::Request, http::StatusCode};
use serde_json::Value;

use crate::{AppState, config::Config, db::connect_and_migrate};

#[derive(Clone, Debug)]
pub struct Seen {
    pub method: String,
    pub uri: String,
    pub apikey: Option<String>,
    pub authorization: Option<String>,
    pub prefer: Option<String>,
    pub body: Value,
}

impl Seen {
    pub fn param(&self, key: &str) -> Option<String> {
        let url = url::Url::parse(&format!("http://fake{}", self.uri)).ok()?;
        url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }
}

/// Serve `body` with `status` for every request and record what was asked.
pub async fn fake_server(status: StatusCode, body: Value) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let app = Router::new().fallback(move |req: Request| {
        let log = log.clone();
        let body = body.clone();
        async move {
            let mut entry = {
                let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
                Seen {
                    method: req.method().to_string(),
                    uri: req.uri().to_string(),
                    apikey: header("apikey"),
                    authorization: header("authorization"),
                    prefer: header("prefer"),
                    body: Value::Null,
                }
            };
            let bytes = to_bytes(req.into_body(), usize::MAX).await.unwrap_or_default();
            entry.body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            log.lock().unwrap().push(entry);
            (status, Json(body))
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

/// Application state pointing the backend and auth clients at `backend_url`,
/// with external trailer lookups disabled.
pub async fn test_state(backend_url: &str) -> Arc<AppState> {
    let config = Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        backend_url: backend_url.to_string(),
        backend_key: "anon-key".to_string(),
        tmdb_access_token: String::new(),
        tmdb_base_url: "http://127.0.0.1:9".to_string(),
        tmdb_rps: 4,
        youtube_api_key: None,
        cache_database_url: "sqlite::memory:".to_string(),
        cache_ttl_days: 7,
        max_concurrent: 2,
        password_reset_redirect: None,
        secure_cookies: false,
    };
    let db = connect_and_migrate(&config.cache_database_url).await.unwrap();
    Arc::new(AppState::new(config, reqwest::Client::new(), db))
}

/// Formatted log output collected while a [`capture_logs`] guard is alive.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's events into a buffer until the guard is dropped.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
