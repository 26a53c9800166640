//! End-to-end tests for the admin API

mod common;

use common::{draft, TestServer, FULL_HD_URL, MATRIX_EXTERNAL_ID, MATRIX_TITLE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use stream_ingest::provider::Provider;
use stream_ingest::server_store::{
    IngestJob, IngestStatus, NewIngestAuditRecord, ServerStore, MAX_QUERY_LIMIT,
};

#[tokio::test]
async fn test_home_reports_name_and_uptime() {
    let server = TestServer::spawn().await;

    let response = server.get("/").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "stream-ingest");
    assert!(body["uptime"].as_str().unwrap().starts_with("0d"));
}

#[tokio::test]
async fn test_status_lists_registered_jobs() {
    let server = TestServer::spawn().await;
    server.pipeline.add_entry(MATRIX_EXTERNAL_ID, MATRIX_TITLE);

    let response = server.get("/v1/ingest/status").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let ids: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["id"].as_str().unwrap())
        .collect();
    for job in IngestJob::ALL {
        assert!(ids.contains(&job.as_str()), "missing {}", job);
    }
    assert!(ids.contains(&"audit_log_cleanup"));
    assert_eq!(body["entries"], 1);
    assert_eq!(body["streams"]["active"], 0);
}

#[tokio::test]
async fn test_run_match_then_read_active_stream() {
    let server = TestServer::spawn().await;
    let entry = server.pipeline.add_entry(MATRIX_EXTERNAL_ID, MATRIX_TITLE);
    server
        .pipeline
        .provider
        .set_streams(Provider::TwoEmbed, vec![draft(FULL_HD_URL, "1080p", 75.0)]);

    let response = server
        .post("/v1/ingest/run/match", Some(r#"{"externalId": 603}"#))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"job": "content.match", "queued": true}));

    server.scheduler.wait_idle().await;

    let response = server
        .get(&format!("/v1/entries/{}/active-stream", entry.id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let active: Value = response.json().await.unwrap();
    assert_eq!(active["url"], FULL_HD_URL);

    let response = server.get(&format!("/v1/entries/{}/streams", entry.id)).await;
    let streams: Value = response.json().await.unwrap();
    assert_eq!(streams.as_array().unwrap().len(), 1);

    let response = server.get("/v1/ingest/jobs/match/history").await;
    let history: Value = response.json().await.unwrap();
    assert_eq!(history[0]["status"], "completed");
    assert_eq!(history[0]["triggered_by"], "api");
}

#[tokio::test]
async fn test_run_rejects_bad_requests() {
    let server = TestServer::spawn().await;

    let response = server.post("/v1/ingest/run/transcode", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["valid_jobs"]
        .as_array()
        .unwrap()
        .contains(&json!("content.match")));

    let response = server.post("/v1/ingest/run/match", Some("{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server.post("/v1/ingest/run/match", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Either externalId or catalogEntryId is required"));
}

#[tokio::test]
async fn test_unknown_entry_returns_404() {
    let server = TestServer::spawn().await;

    let response = server.get("/v1/entries/999/active-stream").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let entry = server.pipeline.add_entry(MATRIX_EXTERNAL_ID, MATRIX_TITLE);
    let response = server
        .get(&format!("/v1/entries/{}/active-stream", entry.id))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_logs_filter_by_job_and_status() {
    let server = TestServer::spawn().await;

    server.post("/v1/ingest/run/refresh", None).await;
    server
        .post("/v1/ingest/run/match", Some(r#"{"externalId": 12345}"#))
        .await;
    server.scheduler.wait_idle().await;

    let response = server.get("/v1/ingest/logs?job=refresh").await;
    assert_eq!(response.status(), StatusCode::OK);
    let records: Value = response.json().await.unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["job"], "content.refresh");
    assert_eq!(records[0]["status"], "OK");

    let response = server
        .get("/v1/ingest/logs?status=SKIP&externalId=12345")
        .await;
    let records: Value = response.json().await.unwrap();
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(records[0]["job"], "content.match");

    let response = server.get("/v1/ingest/logs?status=MAYBE").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logs_limit_is_capped() {
    let server = TestServer::spawn().await;
    for i in 0..MAX_QUERY_LIMIT + 10 {
        server
            .pipeline
            .server_store
            .log_ingest_audit(&NewIngestAuditRecord {
                job: IngestJob::Refresh,
                catalog_entry_id: None,
                external_id: None,
                status: IngestStatus::Ok,
                message: format!("Checked {} streams, upgraded 0", i),
                payload: json!({}),
                error: None,
                duration_ms: 1,
                metadata: None,
            })
            .unwrap();
    }

    let response = server
        .get(&format!("/v1/ingest/logs?limit={}", u64::MAX))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let records: Value = response.json().await.unwrap();
    assert_eq!(records.as_array().unwrap().len(), MAX_QUERY_LIMIT);
}

#[tokio::test]
async fn test_settings_round_trip_through_api() {
    let server = TestServer::spawn().await;

    let response = server.get("/v1/ingest/settings").await;
    assert_eq!(response.status(), StatusCode::OK);
    let settings: Value = response.json().await.unwrap();
    assert!(settings
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["key"] == "TARGET_QUALITY"));

    let response = server
        .put_json("/v1/ingest/settings/TARGET_QUALITY", json!({"value": "1080P"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let stored: Value = response.json().await.unwrap();
    assert_eq!(stored["value"], "1080p");

    let response = server
        .put_json("/v1/ingest/settings/MIN_QUALITY_TO_PUBLISH", json!({"value": "8K HDR"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .put_json("/v1/ingest/settings/NOT_A_SETTING", json!({"value": 1}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let setting = server
        .pipeline
        .server_store
        .get_setting("TARGET_QUALITY")
        .unwrap()
        .unwrap();
    assert_eq!(setting.value, json!("1080p"));
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_http_counters() {
    let server = TestServer::spawn().await;
    stream_ingest::server::metrics::init_metrics();

    server.get("/v1/ingest/status").await;
    let response = server.get("/metrics").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("stream_ingest_http_requests_total"));
}
