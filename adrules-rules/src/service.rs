use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::draft::{RuleDraft, RulePatch};
use crate::error::{FieldViolation, RuleError};
use crate::history::{ExecutionHistoryEntry, HistoryLogger};
use crate::rule::{Rule, RuleFilter, RuleStatus};
use crate::store::RuleStore;
use crate::template::{RuleTemplate, TemplateCatalog, TemplateInstance};

/// Error body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,
}

/// [`RuleError`] mapped onto an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                code: "bad_request".into(),
                message: message.into(),
                violations: Vec::new(),
            },
        }
    }

    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorResponse {
                code: "not_found".into(),
                message,
                violations: Vec::new(),
            },
        }
    }
}

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::Validation(validation) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: ErrorResponse {
                    code: "validation_failed".into(),
                    message: "rule definition is invalid".into(),
                    violations: validation.violations,
                },
            },
            RuleError::NotFound(id) => Self::not_found(format!("rule {id} not found")),
            RuleError::TemplateNotFound(key) => Self::not_found(format!("template {key} not found")),
            other => {
                error!(error = %other, "rule service failure");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: ErrorResponse {
                        code: "internal".into(),
                        message: other.to_string(),
                        violations: Vec::new(),
                    },
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub entity_type: Option<String>,
    pub evaluation_type: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<RuleFilter, ApiError> {
        fn parse<T: std::str::FromStr<Err = String>>(raw: Option<String>) -> Result<Option<T>, ApiError> {
            raw.map(|value| value.parse().map_err(ApiError::bad_request))
                .transpose()
        }

        Ok(RuleFilter {
            status: parse(self.status)?,
            entity_type: parse(self.entity_type)?,
            evaluation_type: parse(self.evaluation_type)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: RuleStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub rule_id: Uuid,
    pub entries: Vec<ExecutionHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone)]
struct RuleServiceState {
    store: RuleStore,
    history: HistoryLogger,
    templates: Arc<TemplateCatalog>,
}

/// Composes the rule management REST API.
#[derive(Clone)]
pub struct RuleApiBuilder {
    state: RuleServiceState,
}

impl RuleApiBuilder {
    pub fn new(store: RuleStore, history: HistoryLogger, templates: Arc<TemplateCatalog>) -> Self {
        Self {
            state: RuleServiceState {
                store,
                history,
                templates,
            },
        }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/accounts/:account/rules", get(list_rules).post(create_rule))
            .route(
                "/accounts/:account/rules/:rule_id",
                get(get_rule).patch(update_rule).delete(delete_rule),
            )
            .route("/accounts/:account/rules/:rule_id/status", put(set_status))
            .route("/accounts/:account/rules/:rule_id/history", get(rule_history))
            .route("/templates", get(list_templates))
            .route(
                "/accounts/:account/templates/:key/rules",
                post(create_from_template),
            )
            .with_state(self.state)
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_rules(
    State(state): State<RuleServiceState>,
    Path(account): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Rule>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.store.list(&account, &filter).await?))
}

async fn create_rule(
    State(state): State<RuleServiceState>,
    Path(account): Path<String>,
    Json(draft): Json<RuleDraft>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let rule = state.store.create(&account, &draft).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn get_rule(
    State(state): State<RuleServiceState>,
    Path((account, rule_id)): Path<(String, Uuid)>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(state.store.get(&account, rule_id).await?))
}

async fn update_rule(
    State(state): State<RuleServiceState>,
    Path((account, rule_id)): Path<(String, Uuid)>,
    Json(patch): Json<RulePatch>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(state.store.update(&account, rule_id, &patch).await?))
}

async fn delete_rule(
    State(state): State<RuleServiceState>,
    Path((account, rule_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&account, rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_status(
    State(state): State<RuleServiceState>,
    Path((account, rule_id)): Path<(String, Uuid)>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(
        state.store.set_status(&account, rule_id, request.status).await?,
    ))
}

/// History survives deletion, so a missing rule is not an error here; a rule
/// owned by another account is.
async fn rule_history(
    State(state): State<RuleServiceState>,
    Path((account, rule_id)): Path<(String, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    if let Some(rule) = state.store.find(rule_id).await? {
        if rule.account_id != account {
            warn!(rule_id = %rule_id, account = %account, "history requested from foreign account");
            return Err(RuleError::NotFound(rule_id).into());
        }
    }

    let entries = state.history.list(rule_id, query.limit).await?;
    let message = entries.is_empty().then(|| "no history yet".to_string());
    Ok(Json(HistoryResponse {
        rule_id,
        entries,
        message,
    }))
}

async fn list_templates(State(state): State<RuleServiceState>) -> Json<Vec<RuleTemplate>> {
    Json(state.templates.list().into_iter().cloned().collect())
}

async fn create_from_template(
    State(state): State<RuleServiceState>,
    Path((account, key)): Path<(String, String)>,
    Json(instance): Json<TemplateInstance>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let draft = state.templates.instantiate(&key, &instance)?;
    let rule = state.store.create(&account, &draft).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::TracingAlertSink;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        history: HistoryLogger,
    }

    fn harness() -> Harness {
        let history = HistoryLogger::in_memory(Arc::new(TracingAlertSink));
        let router = RuleApiBuilder::new(
            RuleStore::in_memory(),
            history.clone(),
            Arc::new(TemplateCatalog::builtin().unwrap()),
        )
        .into_router();
        Harness { router, history }
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn low_ctr() -> Value {
        json!({
            "name": "Pause low CTR",
            "entity_type": "CAMPAIGN",
            "entity_ids": ["c-1"],
            "evaluation_type": "TRIGGER",
            "conditions": [{"field": "ctr", "operator": "LESS_THAN", "value": 1.0}],
            "execution_type": "PAUSE"
        })
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let Harness { router, .. } = harness();

        let (status, created) = call(&router, "POST", "/accounts/a1/rules", Some(low_ctr())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "ENABLED");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, listed) = call(&router, "GET", "/accounts/a1/rules?status=ENABLED", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, patched) = call(
            &router,
            "PATCH",
            &format!("/accounts/a1/rules/{id}"),
            Some(json!({"name": "Renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["name"], "Renamed");

        let (status, disabled) = call(
            &router,
            "PUT",
            &format!("/accounts/a1/rules/{id}/status"),
            Some(json!({"status": "DISABLED"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(disabled["status"], "DISABLED");

        let (status, _) = call(&router, "DELETE", &format!("/accounts/a1/rules/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&router, "DELETE", &format!("/accounts/a1/rules/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&router, "GET", &format!("/accounts/a1/rules/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn invalid_draft_is_unprocessable_with_violations() {
        let Harness { router, .. } = harness();
        let mut draft = low_ctr();
        draft["conditions"] = json!([]);
        draft["execution_type"] = json!("NOTIFICATION");

        let (status, body) = call(&router, "POST", "/accounts/a1/rules", Some(draft)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "validation_failed");
        let fields: Vec<&str> = body["violations"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v["field"].as_str())
            .collect();
        assert!(fields.contains(&"conditions"));
        assert!(fields.contains(&"execution_options.recipients"));
    }

    #[tokio::test]
    async fn history_is_empty_then_kept_after_delete() {
        let Harness { router, history } = harness();
        let (_, created) = call(&router, "POST", "/accounts/a1/rules", Some(low_ctr())).await;
        let id = created["id"].as_str().unwrap().to_string();
        let uri = format!("/accounts/a1/rules/{id}/history");

        let (status, body) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "no history yet");
        assert!(body["entries"].as_array().unwrap().is_empty());

        let rule_id: Uuid = id.parse().unwrap();
        history
            .append(ExecutionHistoryEntry::success(rule_id, false, vec!["c-1".into()]))
            .await
            .unwrap();
        call(&router, "DELETE", &format!("/accounts/a1/rules/{id}"), None).await;

        let (status, body) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"][0]["results"], json!(["c-1"]));
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn template_clone_matches_template() {
        let Harness { router, .. } = harness();
        let (status, templates) = call(&router, "GET", "/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        let template = templates
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["key"] == "pause-low-ctr")
            .unwrap()
            .clone();

        let (status, created) = call(
            &router,
            "POST",
            "/accounts/a1/templates/pause-low-ctr/rules",
            Some(json!({"entity_ids": ["c-9"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(template["key"], "pause-low-ctr");

        let id = created["id"].as_str().unwrap();
        let (status, fetched) = call(&router, "GET", &format!("/accounts/a1/rules/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let rule: Rule = serde_json::from_value(fetched).unwrap();

        let expected = TemplateCatalog::builtin()
            .unwrap()
            .get("pause-low-ctr")
            .unwrap()
            .instantiate(vec!["c-9".into()], &RulePatch::default())
            .validate()
            .unwrap();
        assert_eq!(rule.entity_ids, vec!["c-9".to_string()]);
        assert_eq!(rule.entity_type, expected.entity_type);
        assert_eq!(rule.evaluation_type, expected.evaluation_type);
        assert_eq!(rule.time_preset, expected.time_preset);
        assert_eq!(rule.conditions, expected.conditions);
        assert_eq!(rule.conditions.len(), 2);
        assert_eq!(rule.action, expected.action);
        assert_eq!(rule.action_frequency, expected.action_frequency);
        assert_eq!(rule.action_frequency, Some(86_400));
        assert_eq!(rule.execution_count_limit, expected.execution_count_limit);
        assert_eq!(rule.schedule, expected.schedule);

        let (status, _) = call(
            &router,
            "POST",
            "/accounts/a1/templates/missing/rules",
            Some(json!({"entity_ids": ["c-9"]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_filter_value_is_a_bad_request() {
        let Harness { router, .. } = harness();
        let (status, body) = call(&router, "GET", "/accounts/a1/rules?status=PAUSED", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
    }
}
