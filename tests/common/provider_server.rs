//! A local HTTP server standing in for the embed providers.

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    Router,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Default)]
struct Responses {
    /// Statuses to hand out for a path before falling back to 200.
    scripted: HashMap<String, VecDeque<StatusCode>>,
    hits: Vec<(Method, String)>,
}

type SharedResponses = Arc<Mutex<Responses>>;

async fn respond(
    State(responses): State<SharedResponses>,
    method: Method,
    uri: Uri,
) -> StatusCode {
    let mut responses = responses.lock().unwrap();
    let path = uri.path().to_string();
    responses.hits.push((method, path.clone()));
    responses
        .scripted
        .get_mut(&path)
        .and_then(|queue| queue.pop_front())
        .unwrap_or(StatusCode::OK)
}

/// Answers every path with 200 unless a status sequence was scripted for it.
/// Shuts down when dropped.
pub struct FakeProviderServer {
    pub base_url: String,
    responses: SharedResponses,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl FakeProviderServer {
    pub async fn spawn() -> Self {
        let responses = SharedResponses::default();
        let app = Router::new()
            .fallback(respond)
            .with_state(responses.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind provider server");
        let addr = listener.local_addr().expect("Failed to read local address");
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Self {
            base_url: format!("http://{}", addr),
            responses,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Answers the next requests to `path` with `statuses`, in order.
    pub fn script(&self, path: &str, statuses: &[StatusCode]) {
        self.responses
            .lock()
            .unwrap()
            .scripted
            .insert(path.to_string(), statuses.iter().copied().collect());
    }

    /// Number of requests seen for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.responses
            .lock()
            .unwrap()
            .hits
            .iter()
            .filter(|(_, p)| p == path)
            .count()
    }

    pub fn methods(&self) -> Vec<Method> {
        self.responses
            .lock()
            .unwrap()
            .hits
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
