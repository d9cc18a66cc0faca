use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use shared::types::{DynamicAnnouncement, Entry, Service};
use crate::distributed::{DynamicStore, StoreError};
use crate::store::local::LocalStore;
use crate::store::translate::ReplicationMode;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DynamicStore>,
    pub local: Arc<LocalStore>,
    pub node: Arc<NodeInfo>,
}

/// Identity of this node as reported by `/v1/config`
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub environment: String,
    pub pool: String,
    pub map_target: String,
    pub replication_mode: ReplicationMode,
}

#[derive(Serialize)]
pub struct ServicesResponse {
    pub environment: String,
    pub services: Vec<Service>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/config", get(get_config))
        .route("/v1/announcement/:node_id", put(put_announcement).delete(delete_announcement))
        .route("/v1/service", get(get_all_services))
        .route("/v1/service/:service_type", get(get_services))
        .route("/v1/service/:service_type/:pool", get(get_services_in_pool))
        .route("/v1/store/dynamic", get(get_snapshot).post(post_entry))
        .route("/v1/store/dynamic/digest", get(get_digest))
        .with_state(state)
}

fn error_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        StoreError::Disabled => StatusCode::METHOD_NOT_ALLOWED,
        StoreError::Validation(reason) => {
            tracing::debug!("Rejected announcement: {}", reason);
            StatusCode::BAD_REQUEST
        }
    }
}

async fn get_config(State(state): State<AppState>) -> Json<NodeInfo> {
    Json(state.node.as_ref().clone())
}

async fn put_announcement(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path(node_id): Path<String>,
    Json(announcement): Json<DynamicAnnouncement>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .put(&node_id, &announcement, remote.ip())
        .await
        .map(|()| StatusCode::ACCEPTED)
        .map_err(error_status)
}

async fn delete_announcement(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path(node_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .delete(&node_id, remote.ip())
        .await
        .map(|()| StatusCode::OK)
        .map_err(error_status)
}

async fn get_all_services(State(state): State<AppState>) -> Json<ServicesResponse> {
    services_response(&state, state.store.get_all())
}

async fn get_services(
    State(state): State<AppState>,
    Path(service_type): Path<String>,
) -> Json<ServicesResponse> {
    services_response(&state, state.store.get(&service_type))
}

async fn get_services_in_pool(
    State(state): State<AppState>,
    Path((service_type, pool)): Path<(String, String)>,
) -> Json<ServicesResponse> {
    services_response(&state, state.store.get_in_pool(&service_type, &pool))
}

fn services_response(state: &AppState, services: Vec<Service>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        environment: state.node.environment.clone(),
        services,
    })
}

async fn get_snapshot(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<Json<Vec<Entry>>, StatusCode> {
    state.store.snapshot(remote.ip()).map(Json).map_err(error_status)
}

async fn post_entry(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(entry): Json<Entry>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .accept_replicated(entry, remote.ip())
        .map(|_| StatusCode::OK)
        .map_err(error_status)
}

async fn get_digest(State(state): State<AppState>) -> String {
    state.local.digest()
}
