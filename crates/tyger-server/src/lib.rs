//! The control-plane HTTP surface: an axum [`Router`] over the
//! buffer/codespec/run registries.

pub mod api_version;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the full router. Split out from `main` so integration tests can
/// mount it directly with `tower::ServiceExt::oneshot` instead of binding
/// a real socket.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/metadata", get(routes::meta::metadata))
        .route("/healthcheck", get(routes::meta::healthcheck))
        .route("/buffers", post(routes::buffers::create).get(routes::buffers::list))
        .route("/buffers", delete(routes::buffers::delete_bulk))
        .route("/buffers/restore", post(routes::buffers::restore_bulk))
        .route("/buffers/purge", post(routes::buffers::purge_bulk))
        .route("/buffers/{id}", get(routes::buffers::get))
        .route("/buffers/{id}", put(routes::buffers::update))
        .route("/buffers/{id}", delete(routes::buffers::delete_one))
        .route("/buffers/{id}/tags", put(routes::buffers::set_tags))
        .route("/buffers/{id}/access", post(routes::buffers::access))
        .route("/buffers/{id}/restore", post(routes::buffers::restore_one))
        .route("/buffers/{id}/purge", post(routes::buffers::purge_one))
        .route(
            "/codespecs/{name}",
            put(routes::codespecs::put).get(routes::codespecs::get_latest),
        )
        .route("/codespecs", get(routes::codespecs::list))
        .route("/codespecs/{name}/versions/{version}", get(routes::codespecs::get_version))
        .route("/runs", post(routes::runs::create).get(routes::runs::list))
        .route("/runs/_sweep", post(routes::runs::sweep))
        .route("/runs/{id}", get(routes::runs::get))
        .route("/runs/{id}/cancel", post(routes::runs::cancel))
        .route("/runs/{id}/logs", get(routes::runs::logs))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use tyger_config::ServerConfig;
    use tyger_logstore::LogArchive;
    use tyger_registry::{BufferRegistry, CodespecRegistry};
    use tyger_runs::test_support::FakeBackend;
    use tyger_runs::RunCoordinator;
    use tyger_runstate::RunWatchHub;

    use super::*;

    fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let buffers = Arc::new(BufferRegistry::new(None));
        let codespecs = Arc::new(CodespecRegistry::new(None));
        let watch_hub = Arc::new(RunWatchHub::new());
        let log_archive = Arc::new(LogArchive::new(dir.path()));
        let backend = Arc::new(FakeBackend::new());
        let runs = Arc::new(RunCoordinator::new(
            None,
            buffers.clone(),
            codespecs.clone(),
            watch_hub.clone(),
            log_archive.clone(),
            backend,
        ));
        AppState {
            config: Arc::new(ServerConfig::default()),
            buffers,
            codespecs,
            runs,
            watch_hub,
            log_archive,
        }
    }

    #[tokio::test]
    async fn healthcheck_needs_no_api_version() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder().uri("/healthcheck").body(axum::body::Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_api_version_is_rejected() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder().uri("/buffers").body(axum::body::Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_then_get_buffer_round_trips() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/buffers?api-version=1.0")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{}"))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let buffer: tyger_core::Buffer = serde_json::from_slice(&body).unwrap();

        let req = axum::http::Request::builder()
            .uri(format!("/buffers/{}?api-version=1.0", buffer.id))
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn unsupported_api_version_reports_supported_list() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder()
            .uri("/buffers?api-version=99.0")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"]["apiVersions"].is_array());
    }
}
