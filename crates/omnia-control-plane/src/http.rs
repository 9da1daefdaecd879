//! Operator-facing HTTP surface (spec.md §6 exit codes/events note, §11 of
//! the expanded spec): liveness/readiness probes, a debug counters endpoint,
//! and the object-status/resync/DLQ surface `omnia-cli` drives. No agent
//! traffic flows through this process — the data plane is external
//! (spec.md §1) — so this is intentionally a small, unauthenticated surface
//! for operators and orchestrators (load balancer probes, `omnia status`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use omnia_storage::{DesiredStateStore, DlqStore, ObjectKey};
use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::queue::{ReconcileKey, WorkQueue};
use crate::reconcile::eval_dispatcher::{EvalDispatcher, SessionEvent};

#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn DesiredStateStore>,
    pub queue: Arc<WorkQueue>,
    pub dlq: Arc<dyn DlqStore>,
    pub eval_dispatcher: Arc<EvalDispatcher>,
    pub is_leader: Arc<AtomicBool>,
    pub ready: Arc<AtomicBool>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/debug/reconcile-counters", get(reconcile_counters))
        .route("/v1/objects/:kind/:name", get(get_object))
        .route("/v1/resync/:kind/:name", post(resync_object))
        .route("/v1/dlq", get(dlq_list))
        .route("/v1/dlq/:kind/:name", post(dlq_requeue))
        .route("/v1/eval-events", post(submit_eval_event))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    leader: bool,
}

async fn readyz(State(state): State<HttpState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: state.ready.load(Ordering::SeqCst),
        leader: state.is_leader.load(Ordering::SeqCst),
    })
}

#[derive(Serialize)]
struct CounterEntry {
    kind: String,
    outcome: &'static str,
    count: u64,
}

async fn reconcile_counters(State(state): State<HttpState>) -> Json<Vec<CounterEntry>> {
    Json(
        state
            .dispatcher
            .counters_snapshot()
            .into_iter()
            .map(|(kind, outcome, count)| CounterEntry { kind, outcome, count })
            .collect(),
    )
}

/// Cluster-scoped kinds (spec.md §3) are looked up with an empty namespace
/// query param, e.g. `?namespace=`.
#[derive(Deserialize)]
struct NamespaceQuery {
    #[serde(default)]
    namespace: String,
}

#[derive(Serialize)]
struct ObjectResponse {
    kind: String,
    namespace: String,
    name: String,
    generation: i64,
    observed_generation: i64,
    spec: serde_json::Value,
    status: serde_json::Value,
    conditions: Vec<omnia_core::Condition>,
}

async fn get_object(
    State(state): State<HttpState>,
    Path((kind, name)): Path<(String, String)>,
    Query(q): Query<NamespaceQuery>,
) -> Result<Json<ObjectResponse>, StatusCode> {
    let key = ObjectKey::new(kind.clone(), q.namespace.clone(), name.clone());
    let object = state.store.get(&key).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let object = object.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ObjectResponse {
        kind,
        namespace: q.namespace,
        name,
        generation: object.generation,
        observed_generation: object.observed_generation,
        spec: object.spec,
        status: object.status,
        conditions: object.conditions,
    }))
}

#[derive(Serialize)]
struct ResyncResponse {
    enqueued: bool,
}

async fn resync_object(
    State(state): State<HttpState>,
    Path((kind, name)): Path<(String, String)>,
    Query(q): Query<NamespaceQuery>,
) -> Result<Json<ResyncResponse>, StatusCode> {
    let object_key = ObjectKey::new(kind.clone(), q.namespace.clone(), name.clone());
    if state.store.get(&object_key).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    state.queue.enqueue(ReconcileKey::new(kind, q.namespace, name)).await;
    Ok(Json(ResyncResponse { enqueued: true }))
}

#[derive(Serialize)]
struct DlqEntryResponse {
    kind: String,
    namespace: String,
    name: String,
    last_error: String,
    attempts: u32,
    observed_generation: i64,
    dead_lettered_at: chrono::DateTime<chrono::Utc>,
}

async fn dlq_list(State(state): State<HttpState>) -> Result<Json<Vec<DlqEntryResponse>>, StatusCode> {
    let entries = state.dlq.list().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| DlqEntryResponse {
                kind: e.key.kind,
                namespace: e.key.namespace,
                name: e.key.name,
                last_error: e.last_error,
                attempts: e.attempts,
                observed_generation: e.observed_generation,
                dead_lettered_at: e.dead_lettered_at,
            })
            .collect(),
    ))
}

async fn dlq_requeue(
    State(state): State<HttpState>,
    Path((kind, name)): Path<(String, String)>,
    Query(q): Query<NamespaceQuery>,
) -> Result<Json<ResyncResponse>, StatusCode> {
    let object_key = ObjectKey::new(kind.clone(), q.namespace.clone(), name.clone());
    state.dlq.remove(&object_key).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state.queue.enqueue(ReconcileKey::new(kind, q.namespace, name)).await;
    Ok(Json(ResyncResponse { enqueued: true }))
}

#[derive(Serialize)]
struct SubmitEventResponse {
    accepted: bool,
}

/// Ingress for session events (spec.md §4.9: "delivered over a durable
/// stream"). No streaming-bus *consumer* trait exists anywhere in this
/// corpus (only [`omnia_storage::collaborators::StreamingBusProducer`], used
/// to publish eval results out) — this endpoint is the documented substitute
/// an external subscriber relays onto (see DESIGN.md).
async fn submit_eval_event(
    State(state): State<HttpState>,
    Json(event): Json<SessionEvent>,
) -> Result<Json<SubmitEventResponse>, StatusCode> {
    state
        .eval_dispatcher
        .submit_event(event)
        .await
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    Ok(Json(SubmitEventResponse { accepted: true }))
}
