//! HTTP query surface over the topology model.
//!
//! Grounded on the teacher's `create_router` (axum `Router` + `Extension` +
//! `TraceLayer` + `CorsLayer::permissive()`) and the endpoint list in
//! `original_source/src/api.py`'s FastAPI app: list and single-item routes
//! for groups/edge nodes/devices, the group->nodes/devices and node->devices
//! relationship routes, and `/devices/{id}/metrics`.

use std::sync::Arc;

use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{HostError, Result};
use crate::model::{self, Model};

#[derive(Serialize)]
pub struct GroupDto {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize)]
pub struct NodeDto {
    pub id: i64,
    pub name: String,
    pub group_id: i64,
    pub status: String,
    pub birth_timestamp: Option<i64>,
    pub death_timestamp: Option<i64>,
}

#[derive(Serialize)]
pub struct DeviceDto {
    pub id: i64,
    pub name: String,
    pub edge_node_id: i64,
    pub status: String,
    pub birth_timestamp: Option<i64>,
    pub death_timestamp: Option<i64>,
}

#[derive(Serialize)]
pub struct MetricDto {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: Option<serde_json::Value>,
    pub timestamp: Option<i64>,
}

fn group_dto(g: &model::Group) -> Result<GroupDto> {
    Ok(GroupDto { id: g.id(), name: g.name()? })
}

fn node_dto(n: &model::Node) -> Result<NodeDto> {
    Ok(NodeDto {
        id: n.id(),
        name: n.name()?,
        group_id: n.group()?.id(),
        status: n.status()?,
        birth_timestamp: n.birth_timestamp()?,
        death_timestamp: n.death_timestamp()?,
    })
}

fn device_dto(d: &model::Device) -> Result<DeviceDto> {
    Ok(DeviceDto {
        id: d.id(),
        name: d.name()?,
        edge_node_id: d.node()?.id(),
        status: d.status()?,
        birth_timestamp: d.birth_timestamp()?,
        death_timestamp: d.death_timestamp()?,
    })
}

fn metric_dto(m: &model::Metric) -> Result<MetricDto> {
    let sample = m.value()?;
    Ok(MetricDto {
        name: m.name()?,
        metric_type: m.metric_type()?,
        value: sample.as_ref().map(|s| s.value.to_json()),
        timestamp: sample.map(|s| s.timestamp),
    })
}

/// Read-only endpoints never surface an unknown id as an error: a `NotFound`
/// from the model collapses to "nothing here" instead, so a single-entity
/// lookup and a listing endpoint share the same empty-list shape for an id
/// that doesn't exist.
fn some_unless_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(HostError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn list_groups(Extension(model): Extension<Arc<Model>>) -> Result<Json<Vec<GroupDto>>> {
    Ok(Json(model.groups()?.iter().map(group_dto).collect::<Result<_>>()?))
}

async fn list_nodes(Extension(model): Extension<Arc<Model>>) -> Result<Json<Vec<NodeDto>>> {
    Ok(Json(model.nodes()?.iter().map(node_dto).collect::<Result<_>>()?))
}

async fn list_devices(Extension(model): Extension<Arc<Model>>) -> Result<Json<Vec<DeviceDto>>> {
    Ok(Json(model.devices()?.iter().map(device_dto).collect::<Result<_>>()?))
}

async fn get_group(
    Extension(model): Extension<Arc<Model>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<GroupDto>>> {
    let dto = some_unless_not_found(model.group(id))?.map(|g| group_dto(&g)).transpose()?;
    Ok(Json(dto.into_iter().collect()))
}

async fn get_node(
    Extension(model): Extension<Arc<Model>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<NodeDto>>> {
    let dto = some_unless_not_found(model.node(id))?.map(|n| node_dto(&n)).transpose()?;
    Ok(Json(dto.into_iter().collect()))
}

async fn get_device(
    Extension(model): Extension<Arc<Model>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<DeviceDto>>> {
    let dto = some_unless_not_found(model.device(id))?.map(|d| device_dto(&d)).transpose()?;
    Ok(Json(dto.into_iter().collect()))
}

async fn group_nodes(
    Extension(model): Extension<Arc<Model>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<NodeDto>>> {
    let nodes = match some_unless_not_found(model.group(id))? {
        Some(group) => group.nodes()?,
        None => Vec::new(),
    };
    Ok(Json(nodes.iter().map(node_dto).collect::<Result<_>>()?))
}

async fn group_devices(
    Extension(model): Extension<Arc<Model>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<DeviceDto>>> {
    let devices = match some_unless_not_found(model.group(id))? {
        Some(group) => group.devices()?,
        None => Vec::new(),
    };
    Ok(Json(devices.iter().map(device_dto).collect::<Result<_>>()?))
}

async fn node_devices(
    Extension(model): Extension<Arc<Model>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<DeviceDto>>> {
    let devices = match some_unless_not_found(model.node(id))? {
        Some(node) => node.devices()?,
        None => Vec::new(),
    };
    Ok(Json(devices.iter().map(device_dto).collect::<Result<_>>()?))
}

async fn device_metrics(
    Extension(model): Extension<Arc<Model>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MetricDto>>> {
    let metrics = match some_unless_not_found(model.device(id))? {
        Some(device) => device.metrics()?,
        None => Vec::new(),
    };
    Ok(Json(metrics.iter().map(metric_dto).collect::<Result<_>>()?))
}

pub fn create_router(model: Arc<Model>) -> Router {
    Router::new()
        .route("/groups", get(list_groups))
        .route("/groups/:id", get(get_group))
        .route("/groups/:id/nodes", get(group_nodes))
        .route("/groups/:id/devices", get(group_devices))
        .route("/nodes", get(list_nodes))
        .route("/nodes/:id", get(get_node))
        .route("/nodes/:id/devices", get(node_devices))
        .route("/devices", get(list_devices))
        .route("/devices/:id", get(get_device))
        .route("/devices/:id/metrics", get(device_metrics))
        .layer(Extension(model))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MetricDatatype;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router_with_fixture() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("h.db")).unwrap());
        let model = Arc::new(Model::new(store));
        model.create_group("plant1").unwrap();
        model.create_node("plant1", "edge1").unwrap();
        model.create_device("plant1", "edge1", "pump1").unwrap();
        model
            .create_metric("plant1", "edge1", "pump1", "temperature", MetricDatatype::Double)
            .unwrap();
        (create_router(model), dir)
    }

    #[tokio::test]
    async fn lists_groups() {
        let (app, _dir) = router_with_fixture();
        let response = app
            .oneshot(Request::builder().uri("/groups").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_group_is_an_empty_list_not_an_error() {
        let (app, _dir) = router_with_fixture();
        let response = app
            .oneshot(Request::builder().uri("/groups/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn device_metrics_round_trip() {
        let (app, _dir) = router_with_fixture();
        let response = app
            .oneshot(Request::builder().uri("/devices/1/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
