use std::sync::Arc;

use adrules_rules::{AlertLog, ErrorResponse, HistoryLogger, RuleStore};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::connector::AdPlatformConnector;
use crate::dispatcher::{DispatchIntervals, Dispatcher, SnapshotEvent};
use crate::error::EngineError;
use crate::guard::LockTable;
use crate::notifier::Notifier;
use crate::retry::RetryPolicy;
use crate::runner::RuleRunner;
use crate::runtime::{EngineHandle, ExecutionRuntime};
use crate::task::{EvaluationTask, RuntimeStats};

/// Shared collaborators the engine runs against.
pub struct EngineServices {
    pub store: RuleStore,
    pub history: HistoryLogger,
    pub alerts: AlertLog,
    pub connector: Arc<dyn AdPlatformConnector>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
struct EngineApiState {
    store: RuleStore,
    handle: EngineHandle,
    events: mpsc::Sender<SnapshotEvent>,
    alerts: AlertLog,
}

/// Builder that starts the worker pool and dispatcher and exposes the
/// engine's REST routes.
pub struct EngineApiBuilder {
    services: EngineServices,
    config: EngineConfig,
}

impl EngineApiBuilder {
    pub fn new(services: EngineServices, config: EngineConfig) -> Self {
        Self { services, config }
    }

    fn build_router(state: EngineApiState) -> Router {
        Router::new()
            .route("/rules/:rule_id/run", post(run_rule))
            .route("/snapshots", post(publish_snapshot))
            .route("/engine/status", get(engine_status))
            .with_state(state)
    }

    /// Spawns the workers and the dispatcher. Must be called inside a tokio
    /// runtime.
    pub fn start(self) -> Result<RunningEngine, EngineError> {
        let EngineServices {
            store,
            history,
            alerts,
            connector,
            notifier,
        } = self.services;
        let config = self.config;

        let retry = RetryPolicy {
            max_attempts: config.retry_attempts,
            base_backoff: config.retry_backoff,
            attempt_timeout: config.connector_timeout,
            ..RetryPolicy::default()
        };
        let locks = LockTable::new();
        let runner = RuleRunner::new(
            store.clone(),
            history,
            Arc::new(alerts.clone()),
            connector,
            notifier,
            retry,
            locks.clone(),
        )?;

        let mut runtime = ExecutionRuntime::new(locks, Arc::new(alerts.clone()));
        runtime.start(Arc::new(runner), config.workers);
        let handle = runtime.handle();

        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatcher = Dispatcher::new(store.clone(), handle.clone(), DispatchIntervals::from(&config));

        let task = tokio::spawn(async move {
            dispatcher.run(events_rx, shutdown_rx).await;
            runtime.shutdown().await;
            info!("engine stopped");
        });

        let router = Self::build_router(EngineApiState {
            store,
            handle: handle.clone(),
            events: events_tx.clone(),
            alerts,
        });

        Ok(RunningEngine {
            router,
            handle,
            events: events_tx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// A started engine. Dropping it without [`RunningEngine::shutdown`] leaves
/// the workers running until the process exits.
pub struct RunningEngine {
    router: Router,
    handle: EngineHandle,
    events: mpsc::Sender<SnapshotEvent>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningEngine {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn events(&self) -> mpsc::Sender<SnapshotEvent> {
        self.events.clone()
    }

    /// Stops dispatching, then waits for in-flight cycles to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            error!("engine task crashed: {:?}", err);
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunAccepted {
    pub rule_id: Uuid,
    /// `false` when an evaluation of the rule was already waiting.
    pub queued: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotAccepted {
    pub entity_id: String,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub workers: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub stats: RuntimeStats,
    pub recent_alerts: Vec<adrules_rules::alert::AlertRecord>,
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message,
            violations: Vec::new(),
        }),
    )
        .into_response()
}

fn map_error(err: EngineError) -> Response {
    match err {
        EngineError::RuleNotFound(id) => {
            error_response(StatusCode::NOT_FOUND, "not_found", format!("rule {id} not found"))
        }
        EngineError::ShuttingDown => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting_down",
            "engine is shutting down".into(),
        ),
        other => {
            error!(error = %other, "engine request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string())
        }
    }
}

async fn run_rule(State(state): State<EngineApiState>, Path(rule_id): Path<Uuid>) -> Response {
    let result = async {
        state
            .store
            .find(rule_id)
            .await?
            .ok_or(EngineError::RuleNotFound(rule_id))?;
        let queued = state.handle.submit(EvaluationTask::manual(rule_id))?;
        info!(%rule_id, queued, "manual run requested");
        Ok::<_, EngineError>(RunAccepted { rule_id, queued })
    }
    .await;

    match result {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(err) => map_error(err),
    }
}

async fn publish_snapshot(State(state): State<EngineApiState>, Json(event): Json<SnapshotEvent>) -> Response {
    if event.entity_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "bad_request", "entity_id must not be blank".into());
    }
    let entity_id = event.entity_id.clone();
    match state.events.send(event).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(SnapshotAccepted { entity_id })).into_response(),
        Err(_) => map_error(EngineError::ShuttingDown),
    }
}

async fn engine_status(State(state): State<EngineApiState>) -> impl IntoResponse {
    Json(EngineStatus {
        workers: state.handle.workers(),
        pending: state.handle.pending(),
        in_flight: state.handle.in_flight(),
        stats: state.handle.stats(),
        recent_alerts: state.alerts.recent(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::InMemoryConnector;
    use crate::notifier::MemoryNotifier;
    use adrules_rules::draft::{ConditionDraft, RuleDraft};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn services(store: RuleStore) -> EngineServices {
        let alerts = AlertLog::default();
        EngineServices {
            history: HistoryLogger::in_memory(Arc::new(alerts.clone())),
            store,
            alerts,
            connector: Arc::new(InMemoryConnector::default()),
            notifier: Arc::new(MemoryNotifier::default()),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn manual_run_requires_an_existing_rule() {
        let store = RuleStore::in_memory();
        let rule = store
            .create(
                "acct",
                &RuleDraft {
                    name: Some("manual".into()),
                    entity_type: Some("AD".into()),
                    entity_ids: vec!["ad-1".into()],
                    evaluation_type: Some("TRIGGER".into()),
                    conditions: vec![ConditionDraft {
                        field: Some("frequency".into()),
                        operator: Some("GREATER_THAN".into()),
                        value: Some(json!(4)),
                    }],
                    execution_type: Some("PAUSE".into()),
                    ..RuleDraft::default()
                },
            )
            .await
            .unwrap();
        let engine = EngineApiBuilder::new(services(store), EngineConfig::default())
            .start()
            .unwrap();

        let response = engine
            .router()
            .oneshot(
                Request::post(format!("/rules/{}/run", rule.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["rule_id"], json!(rule.id));

        let missing = engine
            .router()
            .oneshot(
                Request::post(format!("/rules/{}/run", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn snapshots_are_accepted_and_status_reports_workers() {
        let engine = EngineApiBuilder::new(services(RuleStore::in_memory()), EngineConfig::default())
            .start()
            .unwrap();

        let response = engine
            .router()
            .oneshot(
                Request::post("/snapshots")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"entity_id": "c-9"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let status = engine
            .router()
            .oneshot(Request::get("/engine/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        let body = json_body(status).await;
        assert_eq!(body["workers"], json!(4));
        assert_eq!(body["recent_alerts"], json!([]));

        engine.shutdown().await;
    }
}
