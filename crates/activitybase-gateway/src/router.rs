use activitybase_db::MigrationRunner;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::{Value, json};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status));

    let admin_dir = state.admin_dir();
    if admin_dir.is_dir() {
        info!("serving admin UI from {}", admin_dir.display());
        router = router.nest_service("/admin", ServeDir::new(admin_dir));
    } else {
        warn!(
            "admin directory {} not found, /admin route disabled",
            admin_dir.display()
        );
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<SharedState>) -> Result<Json<Value>, (StatusCode, String)> {
    let internal = |e: activitybase_common::Error| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());

    let collections: Vec<String> = state
        .store
        .transaction(|dao| dao.list_collections())
        .map_err(internal)?
        .into_iter()
        .map(|c| c.name)
        .collect();

    let runner = MigrationRunner::new(&state.store, &state.migrations);
    let applied = runner.applied().map_err(internal)?;
    let pending = runner.pending().map_err(internal)?;

    Ok(Json(json!({
        "status": "running",
        "collections": collections,
        "migrations": {
            "applied": applied,
            "pending": pending,
        },
    })))
}
