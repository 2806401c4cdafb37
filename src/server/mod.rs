use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{app_state::AppState, tracing::LogChannel};

pub mod admin_api;
pub mod recognition_api;

/// Uploads bigger than this are rejected before decoding
pub const MAX_UPLOAD_SIZE: usize = 200 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub status: Status,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            message: message.into(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        admin_api::root,
        admin_api::latest_log,
        admin_api::server_configuration,
        recognition_api::register,
        recognition_api::identify,
        recognition_api::all_tracks,
        recognition_api::track,
        recognition_api::remove_track,
    ),
    components(schemas(
        Status,
        StatusResponse,
        recognition_api::IdentifyResponse,
        crate::index::Track,
        crate::app_state::AppError,
        crate::app_state::AppErrorKind,
        crate::tracing::JsonTracingEvent,
        admin_api::ConfigurationResponse,
    )),
    tags(
        (name = "Recognition", description = "Register and identify audio"),
        (name = "Tracks", description = "Registered tracks"),
        (name = "Logs", description = "Server logs"),
        (name = "Configuration", description = "Server configuration"),
    )
)]
pub struct OpenApiDoc;

pub fn router(app_state: AppState, log_channel: LogChannel) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/register", post(recognition_api::register))
        .route("/identify", post(recognition_api::identify))
        .route("/tracks", get(recognition_api::all_tracks))
        .route("/tracks/{id}", get(recognition_api::track))
        .route("/tracks/{id}", delete(recognition_api::remove_track))
        .route("/log/latest", get(admin_api::latest_log))
        .route("/configuration", get(admin_api::server_configuration))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE));

    Router::new()
        .route("/", get(admin_api::root))
        .route("/api/log", get(LogChannel::into_sse_stream))
        .layer(Extension(log_channel))
        .nest("/api", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", OpenApiDoc::openapi()))
        .layer(cors)
        .with_state(app_state)
}
