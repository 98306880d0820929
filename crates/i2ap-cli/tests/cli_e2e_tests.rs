//! End-to-end tests for the i2ap binary
//!
//! These run the compiled binary against a mock server and check what ends up
//! on stdout and stderr, and the exit code.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn i2ap(server: &MockServer) -> Command {
    let mut cmd = Command::cargo_bin("i2ap").unwrap();
    cmd.env_clear()
        .env("I2AP_SERVER_URL", server.uri())
        .env("I2AP_CLIENT_ID", "airflow")
        .env("I2AP_CLIENT_SECRET", "s3cret");
    cmd
}

fn status_body(job_id: &str, service: &str, status: &str) -> serde_json::Value {
    json!({
        "status-message": "OK",
        "status": "200 OK",
        "pod": "pod-1",
        "job-id": job_id,
        "service": service,
        "job-status": status,
    })
}

#[tokio::test]
async fn test_sync_prints_accepted_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Sync"))
        .and(header("Tt-I2ap-Id", "airflow"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "status-message": "Sync accepted",
            "status": "202 Accepted",
            "pod": "pod-1",
            "job-id": "sync-1",
            "service": "salesforce",
        })))
        .expect(1)
        .mount(&server)
        .await;

    i2ap(&server)
        .args(["sync", "--object", "Account", "--load-type", "INCREMENTAL"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"job-id\": \"sync-1\""));
}

#[tokio::test]
async fn test_replicate_with_wait_polls_service_folder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Replicate"))
        .and(query_param("dest-dataset", "mart"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "status-message": "Replicate accepted",
            "status": "202 Accepted",
            "pod": "pod-1",
            "job-id": "rep-1",
            "service": "replicate",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/replicate/rep-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(status_body("rep-1", "replicate", "COMPLETE")),
        )
        .expect(1)
        .mount(&server)
        .await;

    i2ap(&server)
        .args([
            "replicate",
            "--object",
            "account",
            "--source-project",
            "proj",
            "--source-dataset",
            "raw",
            "--dest-project",
            "proj",
            "--dest-dataset",
            "mart",
            "--wait",
            "--interval",
            "1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"job-status\": \"COMPLETE\""));
}

#[tokio::test]
async fn test_status_of_unknown_job_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Sync/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    i2ap(&server)
        .args(["status", "Sync", "nope"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[tokio::test]
async fn test_wait_on_failed_job_exits_nonzero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/DbToDb/j-9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(status_body("j-9", "processor", "ERROR")),
        )
        .mount(&server)
        .await;

    i2ap(&server)
        .args(["wait", "DbToDb", "j-9", "--interval", "1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("finished with status ERROR"));
}

#[test]
fn test_bad_param_is_a_usage_error() {
    Command::cargo_bin("i2ap")
        .unwrap()
        .env_clear()
        .args(["db-to-db", "--object", "orders", "--param", "novalue"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("KEY=VALUE"));
}
