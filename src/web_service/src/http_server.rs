use crate::http_handler::*;

use anyhow::anyhow;
use axum::routing::{get, post};
use axum::Router;
use engine::store::CaptureStore;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

pub struct VeritaserumRest;

/// Shared by every handler: the capture store plus the state-file target for
/// `POST /api/state/save`.
#[derive(Clone)]
pub struct VeritaserumRestState {
    pub store: Arc<CaptureStore>,
    pub state_path: Arc<PathBuf>,
}

impl VeritaserumRest {
    pub fn router(store: Arc<CaptureStore>, state_path: PathBuf) -> Router {
        let app_state = VeritaserumRestState {
            store,
            state_path: Arc::new(state_path),
        };
        Router::new()
            .route("/", get(landing))
            .route("/api/interactions", get(list_interactions))
            .route("/api/interactions/pending", get(list_pending))
            .route("/api/interactions/:id/configure", post(configure_interaction))
            .route("/api/import", post(import_suite))
            .route("/api/export", get(export_suite))
            .route("/api/state/save", post(save_state))
            .route("/api/testcases", get(list_test_cases).post(create_test_case))
            .route("/api/schemas", get(list_schemas).post(put_schema))
            .with_state(app_state)
    }

    pub async fn start_server<F>(
        addr: String,
        port: u16,
        store: Arc<CaptureStore>,
        state_path: PathBuf,
        enable_metric: bool,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut app = Self::router(store, state_path);
        if enable_metric {
            app = app.merge(route_metrics(MetricsHandler {}));
        }
        app = app.layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new()));
        let listener = tokio::net::TcpListener::bind(format!("{addr}:{port}")).await?;

        match axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!("Failed to start VeritaserumRest {e:?}");
                Err(anyhow!(e.to_string()))
            }
        }
    }
}
