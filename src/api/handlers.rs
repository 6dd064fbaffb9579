use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;

use super::protocol::{
    ENDPOINT_ENTRY, ENDPOINT_KV, ENDPOINT_MEMBERS, ENDPOINT_REPLICATE, EntryParams, FetchResponse,
    MembersResponse, PutParams, ReplicateRequest, ReplicateResponse, WriteResponse,
};
use crate::coordinator::{Coordinator, WriteOutcome};
use crate::error::{KvError, KvResult};
use crate::membership::table::MembershipTable;

/// Header carrying the JSON-encoded version of a value returned by Get.
pub const VERSION_HEADER: &str = "x-kv-version";
/// Set on Get responses when concurrent versions had to be merged.
pub const CONFLICT_HEADER: &str = "x-kv-conflict-resolved";

pub fn router(coordinator: Arc<Coordinator>, table: Arc<MembershipTable>) -> Router {
    Router::new()
        .route(
            &format!("{ENDPOINT_KV}/:key"),
            get(handle_get).put(handle_put).delete(handle_delete),
        )
        .route(ENDPOINT_REPLICATE, post(handle_replicate))
        .route(ENDPOINT_ENTRY, get(handle_fetch))
        .route(ENDPOINT_MEMBERS, get(handle_members))
        .layer(Extension(coordinator))
        .layer(Extension(table))
}

fn error_status(error: &KvError) -> StatusCode {
    match error {
        KvError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        KvError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        KvError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        KvError::Transport(_) | KvError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn write_reply(result: KvResult<WriteOutcome>) -> (StatusCode, Json<WriteResponse>) {
    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(WriteResponse {
                success: true,
                version: Some(outcome.version),
                acked: outcome.acked,
                required: outcome.required,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Write failed: {}", e);
            let (acked, required) = match &e {
                KvError::Timeout { acked, required } => (*acked, *required),
                _ => (0, 0),
            };
            (
                error_status(&e),
                Json(WriteResponse {
                    success: false,
                    version: None,
                    acked,
                    required,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_put(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
    Query(params): Query<PutParams>,
    body: Bytes,
) -> (StatusCode, Json<WriteResponse>) {
    let ttl = params.ttl_ms.map(Duration::from_millis);
    write_reply(coordinator.put(&key, body.to_vec(), ttl).await)
}

pub async fn handle_delete(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<WriteResponse>) {
    write_reply(coordinator.delete(&key).await)
}

pub async fn handle_get(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
) -> Response {
    match coordinator.get(&key).await {
        Ok(outcome) => {
            let version = outcome
                .version
                .as_ref()
                .and_then(|v| serde_json::to_string(v).ok())
                .unwrap_or_default();
            let conflict = if outcome.conflict_resolved { "true" } else { "false" };
            match outcome.value {
                Some(value) => (
                    StatusCode::OK,
                    [(VERSION_HEADER, version), (CONFLICT_HEADER, conflict.to_string())],
                    value,
                )
                    .into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        Err(e) => {
            tracing::error!("Read of {:?} failed: {}", key, e);
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

pub async fn handle_replicate(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(req): Json<ReplicateRequest>,
) -> (StatusCode, Json<ReplicateResponse>) {
    let outcome = coordinator.apply_replica(req.entry);
    (StatusCode::OK, Json(ReplicateResponse { outcome }))
}

pub async fn handle_fetch(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Query(params): Query<EntryParams>,
) -> (StatusCode, Json<FetchResponse>) {
    let entry = coordinator.read_replica(&params.key);
    (StatusCode::OK, Json(FetchResponse { entry }))
}

pub async fn handle_members(
    Extension(table): Extension<Arc<MembershipTable>>,
) -> (StatusCode, Json<MembersResponse>) {
    let mut members = table.members();
    members.sort_by(|a, b| a.id.cmp(&b.id));
    (
        StatusCode::OK,
        Json(MembersResponse {
            local: table.local_id().clone(),
            members,
        }),
    )
}
