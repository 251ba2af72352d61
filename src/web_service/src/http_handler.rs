use crate::http_server::VeritaserumRestState;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use engine::store::model::{Interaction, Protocol, ResponseSpec, TableSchema, TestCase};
use engine::store::persist::{self, SuiteFile};
use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub async fn landing() -> &'static str {
    "Hi I'm Veritaserum"
}

#[derive(Clone, Copy)]
pub struct MetricsHandler;

impl MetricsHandler {
    pub fn render(&self) -> String {
        if let Some(prometheus_handle) = common::metrics::try_handle() {
            prometheus_handle.render()
        } else {
            "Please initialize the prometheus context first.".to_string()
        }
    }
}

pub fn route_metrics<S>(metrics_handler: MetricsHandler) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/metrics", get(metrics_get))
        .with_state(metrics_handler)
}

async fn metrics_get(state: State<MetricsHandler>) -> String {
    state.render()
}

pub async fn list_interactions(
    State(state): State<VeritaserumRestState>,
) -> Json<Vec<Interaction>> {
    Json(state.store.list_all())
}

pub async fn list_pending(State(state): State<VeritaserumRestState>) -> Json<Vec<Interaction>> {
    Json(state.store.list_pending())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureBody {
    #[serde(default)]
    pub name: Option<String>,
    pub response: serde_json::Value,
}

/// `POST /api/interactions/{id}/configure` is the only mutation path for an
/// interaction. The payload is shaped by the interaction's own protocol.
pub async fn configure_interaction(
    State(state): State<VeritaserumRestState>,
    Path(id): Path<String>,
    Json(body): Json<ConfigureBody>,
) -> Response {
    let Some(interaction) = state.store.get(&id) else {
        return not_found(&id);
    };
    let response = match ResponseSpec::from_config(interaction.protocol, body.response) {
        Ok(response) => response,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})))
                .into_response();
        }
    };
    match state.store.configure(&id, body.name, response) {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

pub async fn import_suite(
    State(state): State<VeritaserumRestState>,
    Json(suite): Json<SuiteFile>,
) -> Json<serde_json::Value> {
    let imported = state.store.import_suite(suite);
    info!("suite import hydrated {imported} interactions");
    Json(json!({"imported": imported}))
}

pub async fn export_suite(
    State(state): State<VeritaserumRestState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<SuiteFile> {
    Json(state.store.export_suite(params.get("testCase").map(String::as_str)))
}

pub async fn save_state(State(state): State<VeritaserumRestState>) -> Response {
    let snapshot = state.store.snapshot_state();
    match persist::save_state(&state.state_path, &snapshot) {
        Ok(()) => Json(json!({"saved": state.state_path.display().to_string()})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

pub async fn list_test_cases(
    State(state): State<VeritaserumRestState>,
) -> Json<Vec<TestCase>> {
    Json(state.store.list_test_cases())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interactions: Vec<String>,
}

pub async fn create_test_case(
    State(state): State<VeritaserumRestState>,
    Json(body): Json<TestCaseBody>,
) -> Json<TestCase> {
    Json(
        state
            .store
            .create_test_case(body.name, body.description, body.interactions),
    )
}

pub async fn list_schemas(State(state): State<VeritaserumRestState>) -> Json<Vec<TableSchema>> {
    Json(state.store.list_schemas())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaBody {
    pub protocol: Protocol,
    pub table: String,
    pub ddl: String,
}

pub async fn put_schema(
    State(state): State<VeritaserumRestState>,
    Json(body): Json<SchemaBody>,
) -> Json<TableSchema> {
    Json(state.store.put_schema(body.protocol, body.table, body.ddl))
}

fn not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("no interaction with id {id}")})),
    )
        .into_response()
}
