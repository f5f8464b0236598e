#![cfg(feature = "web-api")]

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info;

use cadence_core::{CancelOutcome, NewJob, SchedError, SchedulerHandle};
use crate::module::{Module, ModuleCtx};

#[derive(Clone)]
struct AppState {
    sched: SchedulerHandle,
    started: Instant,
}

#[derive(Serialize)]
struct Status {
    uptime_ms: u64,
}

pub struct WebServer {
    pub http_addr: SocketAddr,
}

impl WebServer {
    pub fn new(http_addr: SocketAddr) -> Self {
        Self { http_addr }
    }
}

impl Module for WebServer {
    fn name(&self) -> &'static str { "web" }

    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let state = AppState { sched: ctx.sched.clone(), started: Instant::now() };
            let app = Router::new()
                .route("/status", get(status))
                .route("/jobs", axum::routing::post(jobs_create))
                .route("/jobs/:id", get(jobs_status).delete(jobs_cancel))
                .with_state(state);

            let listener = tokio::net::TcpListener::bind(self.http_addr).await?;
            info!("web http listening on http://{}", self.http_addr);
            let mut sd = ctx.shutdown.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while sd.changed().await.is_ok() {
                        if *sd.borrow() {
                            break;
                        }
                    }
                })
                .await?;
            Ok(())
        })
    }
}

fn error_status(e: &SchedError) -> StatusCode {
    match e {
        SchedError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedError::NotFound(_) => StatusCode::NOT_FOUND,
        SchedError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        SchedError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: SchedError) -> Response {
    (error_status(&e), Json(json!({ "error": e.to_string() }))).into_response()
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_ms = state.started.elapsed().as_millis() as u64;
    Json(json!(Status { uptime_ms }))
}

async fn jobs_create(State(state): State<AppState>, Json(new): Json<NewJob>) -> Response {
    match state.sched.create(new).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn jobs_status(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.sched.status(&id).await {
        Ok(snap) => Json(snap).into_response(),
        Err(e) => error_response(e),
    }
}

async fn jobs_cancel(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.sched.cancel(&id).await {
        Ok(CancelOutcome::NotFound) => error_response(SchedError::NotFound(id)),
        Ok(outcome) => Json(json!({ "id": id, "outcome": outcome })).into_response(),
        Err(e) => error_response(e),
    }
}
