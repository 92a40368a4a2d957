//! 测试用的本地假上游。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Captured {
    pub headers: HeaderMap,
    pub body: Value,
}

pub struct MockUpstream {
    pub url: String,
    hits: Arc<AtomicUsize>,
    delay_ms: Arc<AtomicU64>,
    last: Arc<Mutex<Option<Captured>>>,
}

impl MockUpstream {
    pub async fn start(status: StatusCode, reply: Value) -> Self {
        Self::spawn(status, reply.to_string(), "application/json").await
    }

    pub async fn start_text(status: StatusCode, reply: &str) -> Self {
        Self::spawn(status, reply.to_string(), "text/html").await
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Captured> {
        self.last.lock().expect("lock captured").clone()
    }

    async fn spawn(status: StatusCode, reply: String, content_type: &'static str) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let delay_ms = Arc::new(AtomicU64::new(0));
        let last = Arc::new(Mutex::new(None));

        let (h, d, l) = (hits.clone(), delay_ms.clone(), last.clone());
        let handler = move |headers: HeaderMap, body: Bytes| {
            let (h, d, l, reply) = (h.clone(), d.clone(), l.clone(), reply.clone());
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
                *l.lock().expect("lock captured") = Some(Captured { headers, body });
                let delay = d.load(Ordering::SeqCst);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                (status, [(header::CONTENT_TYPE, content_type)], reply)
            }
        };
        let app = Router::new().route("/v1/chat/completions", post(handler));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{}/v1/chat/completions", addr),
            hits,
            delay_ms,
            last,
        }
    }
}
