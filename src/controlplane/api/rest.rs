//! REST API Handlers
//!
//! Thin translation between HTTP and [`Dispatcher`] operations. The
//! `User-Agent` header is the caller identifier used for driver selection.

use crate::controlplane::dispatcher::{Dispatcher, Operation, OperationOutcome};
use crate::domain::ports::{Disk, DiskSpec, Labels};
use crate::error::{Error, ErrorKind};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// API versions served by this router
pub const API_VERSIONS: [&str; 1] = ["v1"];

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCreateRequest {
    pub spec: DiskSpec,
    #[serde(default)]
    pub labels: Labels,
}

/// Host-side action on a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeAction {
    Attach,
    Detach,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSetRequest {
    #[serde(default)]
    pub action: Option<VolumeAction>,
    /// Labels to apply
    #[serde(default)]
    pub labels: Option<Labels>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSetResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCreateRequest {
    pub volume_id: String,
    #[serde(default)]
    pub readonly: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreQuery {
    pub snap_id: String,
}

/// A volume or snapshot as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeResponse {
    pub id: String,
    pub driver: String,
    pub attributes: BTreeMap<String, String>,
}

impl From<&Disk> for VolumeResponse {
    fn from(disk: &Disk) -> Self {
        Self {
            id: disk.handle().to_string(),
            driver: disk.driver().to_string(),
            attributes: disk.attributes().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub versions: Vec<String>,
    pub drivers: Vec<String>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Transport status for each error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::NotSupported => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Backend => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let kind = err.kind();
    match kind {
        ErrorKind::NotSupported | ErrorKind::NotFound => debug!(error = %err, "Request rejected"),
        _ => error!(error = %err, "Request failed"),
    }

    (
        status_for(kind),
        Json(ApiErrorResponse {
            error: kind.as_str().into(),
            message: err.to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn unexpected_outcome(outcome: OperationOutcome) -> Response {
    error_response(Error::Internal(format!("unexpected outcome {:?}", outcome)))
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    dispatcher: Arc<Dispatcher>,
}

impl RestRouter {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/osd-volumes", post(create_volume).get(enumerate_volumes))
            .route("/v1/osd-volumes/versions", get(versions))
            .route("/v1/osd-volumes/stats/:id", get(volume_stats))
            .route(
                "/v1/osd-volumes/:id",
                get(inspect_volume).put(set_volume).delete(delete_volume),
            )
            // Snapshot endpoints
            .route("/v1/osd-snapshots", post(create_snapshot))
            .route("/v1/osd-snapshots/restore/:id", post(restore_volume))
            .route("/v1/osd-snapshots/:id", delete(delete_snapshot))
            // Operational endpoints
            .route("/health", get(health_check))
            .route("/metrics", get(metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    async fn execute(&self, headers: &HeaderMap, op: Operation) -> Result<OperationOutcome, Error> {
        let client_id = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
        self.dispatcher.execute(client_id, op).await
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VolumeCreateRequest>,
) -> Response {
    let op = Operation::Create {
        spec: request.spec,
        labels: request.labels,
    };
    match state.execute(&headers, op).await {
        Ok(OperationOutcome::Created(disk)) => {
            (StatusCode::CREATED, Json(VolumeResponse::from(&disk))).into_response()
        }
        Ok(other) => unexpected_outcome(other),
        Err(e) => error_response(e),
    }
}

/// Enumerate volumes.
///
/// Query: `name` (matches the `name` label), `label` (JSON object), `set`
/// (label key to group by), `id` (repeatable).
async fn enumerate_volumes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let mut volume_ids = Vec::new();
    let mut labels = Labels::new();
    let mut set_identifier = None;

    for (key, value) in params {
        match key.as_str() {
            "id" => volume_ids.push(value),
            "name" => {
                labels.insert("name".to_string(), value);
            }
            "label" => match serde_json::from_str::<Labels>(&value) {
                Ok(parsed) => labels.extend(parsed),
                Err(e) => {
                    return error_response(Error::InvalidArgument(format!(
                        "label must be a JSON object of strings: {}",
                        e
                    )))
                }
            },
            "set" => set_identifier = Some(value),
            _ => {}
        }
    }

    let op = Operation::Enumerate {
        volume_ids,
        labels,
        set_identifier,
    };
    match state.execute(&headers, op).await {
        Ok(OperationOutcome::Grouped(groups)) => {
            let body: BTreeMap<String, Vec<VolumeResponse>> = groups
                .iter()
                .map(|(set, disks)| (set.clone(), disks.iter().map(VolumeResponse::from).collect()))
                .collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(other) => unexpected_outcome(other),
        Err(e) => error_response(e),
    }
}

async fn inspect_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let op = Operation::Inspect {
        volume_ids: vec![id.clone()],
    };
    match state.execute(&headers, op).await {
        Ok(OperationOutcome::Volumes(disks)) => match disks.first() {
            Some(disk) => (StatusCode::OK, Json(VolumeResponse::from(disk))).into_response(),
            None => error_response(Error::ResourceNotFound {
                kind: "volume".into(),
                id,
            }),
        },
        Ok(other) => unexpected_outcome(other),
        Err(e) => error_response(e),
    }
}

async fn set_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<VolumeSetRequest>,
) -> Response {
    let mut response = VolumeSetResponse::default();

    if let Some(labels) = request.labels {
        let op = Operation::ApplyTags {
            volume_id: id.clone(),
            labels,
        };
        if let Err(e) = state.execute(&headers, op).await {
            return error_response(e);
        }
    }

    match request.action {
        Some(VolumeAction::Attach) => {
            match state.execute(&headers, Operation::Attach { volume_id: id }).await {
                Ok(OperationOutcome::Attached { device_path }) => {
                    response.device_path = Some(device_path)
                }
                Ok(other) => return unexpected_outcome(other),
                Err(e) => return error_response(e),
            }
        }
        Some(VolumeAction::Detach) => {
            if let Err(e) = state.execute(&headers, Operation::Detach { volume_id: id }).await {
                return error_response(e);
            }
        }
        None => {}
    }

    (StatusCode::OK, Json(response)).into_response()
}

async fn delete_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    match state.execute(&headers, Operation::Delete { volume_id: id }).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn volume_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    match state.execute(&headers, Operation::Stats { volume_id: id }).await {
        Ok(OperationOutcome::Stats(stats)) => (StatusCode::OK, Json(stats)).into_response(),
        Ok(other) => unexpected_outcome(other),
        Err(e) => error_response(e),
    }
}

async fn create_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SnapshotCreateRequest>,
) -> Response {
    let op = Operation::Snapshot {
        volume_id: request.volume_id,
        readonly: request.readonly,
    };
    match state.execute(&headers, op).await {
        Ok(OperationOutcome::Snapshot(disk)) => {
            (StatusCode::CREATED, Json(VolumeResponse::from(&disk))).into_response()
        }
        Ok(other) => unexpected_outcome(other),
        Err(e) => error_response(e),
    }
}

async fn restore_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<RestoreQuery>,
) -> Response {
    let op = Operation::Restore {
        volume_id: id,
        snapshot_id: query.snap_id,
    };
    match state.execute(&headers, op).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    match state
        .execute(&headers, Operation::SnapshotDelete { snapshot_id: id })
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn versions(State(state): State<AppState>) -> impl IntoResponse {
    Json(VersionsResponse {
        versions: API_VERSIONS.iter().map(|v| v.to_string()).collect(),
        drivers: state.dispatcher.registry().names(),
    })
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.dispatcher.metrics().encode() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalDriverConfig;
    use crate::controlplane::backends::{LocalOps, UnsupportedOps};
    use crate::controlplane::registry::DriverRegistry;
    use crate::metrics::Metrics;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        let registry = Arc::new(DriverRegistry::new());
        registry
            .register(
                "osd",
                Arc::new(LocalOps::new(LocalDriverConfig {
                    name: "osd".into(),
                    ..Default::default()
                })),
            )
            .unwrap();
        registry
            .register("vsphere", Arc::new(UnsupportedOps::new("vsphere")))
            .unwrap();
        let dispatcher = Dispatcher::new(registry, "osd", Arc::new(Metrics::new().unwrap()));
        RestRouter::new(Arc::new(dispatcher)).build()
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create(app: &Router, labels: Value) -> String {
        let (status, body) = send(
            app,
            request(
                "POST",
                "/v1/osd-volumes",
                Some(json!({
                    "spec": {"storageTier": "endurance", "iopsPerGb": 2, "capacityGb": 10},
                    "labels": labels,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_volume_lifecycle() {
        let app = router();
        let id = create(&app, json!({"name": "db"})).await;

        let (status, body) =
            send(&app, request("GET", &format!("/v1/osd-volumes/{}", id), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["driver"], "osd");

        let (status, body) = send(
            &app,
            request("PUT", &format!("/v1/osd-volumes/{}", id), Some(json!({"action": "attach"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devicePath"], "/dev/xvdf");

        let (status, body) =
            send(&app, request("DELETE", &format!("/v1/osd-volumes/{}", id), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        send(
            &app,
            request("PUT", &format!("/v1/osd-volumes/{}", id), Some(json!({"action": "detach"}))),
        )
        .await;
        let (status, _) =
            send(&app, request("DELETE", &format!("/v1/osd-volumes/{}", id), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) =
            send(&app, request("GET", &format!("/v1/osd-volumes/{}", id), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_enumerate_filters() {
        let app = router();
        create(&app, json!({"name": "a", "set": "x"})).await;
        create(&app, json!({"name": "b", "set": "x"})).await;

        let (status, body) = send(&app, request("GET", "/v1/osd-volumes?name=a", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[""].as_array().unwrap().len(), 1);

        let (_, body) = send(&app, request("GET", "/v1/osd-volumes?set=set", None)).await;
        assert_eq!(body["x"].as_array().unwrap().len(), 2);

        let (status, _) = send(&app, request("GET", "/v1/osd-volumes?label=notjson", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_user_agent_selects_driver() {
        let app = router();
        let req = Request::builder()
            .method("POST")
            .uri("/v1/osd-volumes")
            .header("content-type", "application/json")
            .header("user-agent", "vsphere/6.7")
            .body(Body::from(
                json!({"spec": {"storageTier": "endurance", "iopsPerGb": 2, "capacityGb": 10}})
                    .to_string(),
            ))
            .unwrap();

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["error"], "not_supported");
    }

    #[tokio::test]
    async fn test_no_driver_is_not_found() {
        let registry = Arc::new(DriverRegistry::new());
        let dispatcher = Dispatcher::new(registry, "osd", Arc::new(Metrics::new().unwrap()));
        let app = RestRouter::new(Arc::new(dispatcher)).build();

        let (status, body) = send(&app, request("GET", "/v1/osd-volumes", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let app = router();
        let id = create(&app, json!({})).await;

        let (status, body) = send(
            &app,
            request("POST", "/v1/osd-snapshots", Some(json!({"volumeId": id, "readonly": true}))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let snap_id = body["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            request(
                "POST",
                &format!("/v1/osd-snapshots/restore/{}?snap_id={}", id, snap_id),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) =
            send(&app, request("DELETE", &format!("/v1/osd-snapshots/{}", snap_id), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_stats_versions_health_metrics() {
        let app = router();
        let id = create(&app, json!({})).await;

        let (status, body) =
            send(&app, request("GET", &format!("/v1/osd-volumes/stats/{}", id), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reads"], 0);

        let (_, body) = send(&app, request("GET", "/v1/osd-volumes/versions", None)).await;
        assert_eq!(body["versions"], json!(["v1"]));
        assert_eq!(body["drivers"], json!(["osd", "vsphere"]));

        let response = app.clone().oneshot(request("GET", "/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request("GET", "/metrics", None)).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("storage_ops_operations_total"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::NotSupported), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Backend), StatusCode::BAD_GATEWAY);
    }
}
