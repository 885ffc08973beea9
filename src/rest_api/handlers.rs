//! HTTP handlers for the REST API

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::ResourceExt;
use tracing::{error, instrument};

use super::dto::{ErrorResponse, HealthResponse, VdbDetailResponse, VdbListResponse, VdbSummary};
use super::server::ApiState;
use crate::controller::{ObjectKey, ResourceStore};
use crate::crd::VirtualDatabase;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn summarize(vdb: &VirtualDatabase) -> VdbSummary {
    let status = vdb.status.clone().unwrap_or_default();
    VdbSummary {
        name: vdb.name_any(),
        namespace: vdb.namespace().unwrap_or_default(),
        phase: status.phase,
        version: status.version,
        route: status.route,
        replicas: vdb.spec.replicas,
        ready_replicas: status.ready_replicas,
    }
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        leader: state.is_leader.load(Ordering::Relaxed),
    })
}

/// List all VirtualDatabases
#[instrument(skip(state))]
pub async fn list_vdbs(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<VdbListResponse>, ApiError> {
    match state.store.list(None).await {
        Ok(vdbs) => {
            let items: Vec<VdbSummary> = vdbs.iter().map(summarize).collect();
            let total = items.len();
            Ok(Json(VdbListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list VirtualDatabases: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Get a specific VirtualDatabase
#[instrument(skip(state), fields(name = %name, namespace = %namespace))]
pub async fn get_vdb(
    State(state): State<Arc<ApiState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<VdbDetailResponse>, ApiError> {
    let key = ObjectKey::new(namespace, name);
    match state.store.get(&key).await {
        Ok(Some(vdb)) => Ok(Json(VdbDetailResponse {
            name: vdb.name_any(),
            namespace: vdb.namespace().unwrap_or_default(),
            status: vdb.status.clone().unwrap_or_default(),
            created_at: vdb
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0.to_rfc3339()),
        })),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("VirtualDatabase {} not found", key),
            )),
        )),
        Err(e) => {
            error!("Failed to get VirtualDatabase {}: {:?}", key, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}
