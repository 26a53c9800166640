//! Admin API test server
//!
//! Each test gets an isolated server with its own databases and scheduler.

use super::fixtures::{RunningScheduler, TestPipeline};
use std::time::Instant;
use stream_ingest::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use tokio::net::TcpListener;

/// When dropped, the server and its scheduler shut down and temp resources
/// are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    pub pipeline: TestPipeline,
    pub scheduler: RunningScheduler,
    client: reqwest::Client,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let pipeline = TestPipeline::new();
        let scheduler = pipeline.start_scheduler().await;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to read local address");

        let state = ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                port: addr.port(),
            },
            start_time: Instant::now(),
            catalog_store: pipeline.catalog.clone(),
            stream_store: pipeline.catalog.clone(),
            server_store: pipeline.server_store.clone(),
            scheduler_handle: scheduler.handle.clone(),
        };
        let app = make_app(state);

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
            pipeline,
            scheduler,
            client: reqwest::Client::new(),
            _shutdown_tx: shutdown_tx,
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET request failed")
    }

    pub async fn post(&self, path: &str, body: Option<&str>) -> reqwest::Response {
        let mut request = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request
                .header("content-type", "application/json")
                .body(body.to_string());
        }
        request.send().await.expect("POST request failed")
    }

    pub async fn put_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("PUT request failed")
    }
}
