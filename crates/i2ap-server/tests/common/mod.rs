//! Shared fixtures for i2ap server integration tests
//!
//! Builds the full router over an in-memory object store and warehouse,
//! with DDL and SQL directories in a temporary folder.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use i2ap_server::config::{AuthConfig, BucketConfig, ProjectConfig};
use i2ap_server::etl::EtlContext;
use i2ap_server::events::EventLogKind;
use i2ap_server::features::{self, AppState};
use i2ap_server::salesforce::SalesforceApi;
use i2ap_server::storage::memory::MemoryStore;
use i2ap_server::warehouse::memory::MemoryWarehouse;

pub const CLIENT_ID: &str = "airflow@tests";
pub const CLIENT_SECRET: &str = "E8OLhEWWihzdpIz5";
pub const POD: &str = "pod-under-test";

pub const STAGE_BUCKET: &str = "stage";
pub const ARCHIVE_BUCKET: &str = "archive";
pub const STATE_BUCKET: &str = "state";

pub struct TestApp {
    pub router: Router,
    pub ctx: EtlContext,
    pub warehouse: Arc<MemoryWarehouse>,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(MemoryWarehouse::new()), None)
    }

    pub fn with_parts(
        warehouse: Arc<MemoryWarehouse>,
        salesforce: Option<Arc<dyn SalesforceApi>>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ctx = EtlContext {
            store: Arc::new(MemoryStore::new()),
            warehouse: warehouse.clone(),
            project: ProjectConfig {
                project_id: "proj".into(),
                dataset: "mart".into(),
                ddl_dir: dir.path().join("ddl"),
                sql_dir: dir.path().join("sql"),
            },
            buckets: BucketConfig {
                stage: STAGE_BUCKET.into(),
                archive: ARCHIVE_BUCKET.into(),
                state: STATE_BUCKET.into(),
            },
            events: i2ap_server::config::EventSettings {
                kind: EventLogKind::Console,
                log_name: None,
                directory: dir.path().join("events"),
            },
            event_writer: None,
            pod: POD.into(),
        };
        let state = AppState {
            ctx: ctx.clone(),
            auth: AuthConfig {
                client_id: CLIENT_ID.into(),
                client_secret: CLIENT_SECRET.into(),
            },
            salesforce,
        };
        Self {
            router: features::router(state),
            ctx,
            warehouse,
            _dir: dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// GET without the origination headers
    pub async fn get_public(&self, uri: &str) -> (StatusCode, String) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header("Tt-I2ap-Id", CLIENT_ID)
            .header("Tt-I2ap-Sec", CLIENT_SECRET)
            .body(Body::empty())
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_str(&body).unwrap_or(Value::Null))
    }

    pub async fn post(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .header("Tt-I2ap-Id", CLIENT_ID)
            .header("Tt-I2ap-Sec", CLIENT_SECRET)
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_str(&body).unwrap_or(Value::Null))
    }

    /// Poll `GET /{route}/{job_id}` until the job is COMPLETE or ERROR
    pub async fn wait_for_job(&self, route: &str, job_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self.get(&format!("/{}/{}", route, job_id)).await;
            if status == StatusCode::OK
                && matches!(body["job-status"].as_str(), Some("COMPLETE") | Some("ERROR"))
            {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }
}
