use std::{path::Path, sync::Arc};

use axum::{extract::State, Json};
use axum_extra::{headers, TypedHeader};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt};

use crate::{
    app_state::AppError,
    config::{FingerprintSettings, ServerConfiguration},
};

/// Tail of the log file that is returned by the latest log endpoint
const LATEST_LOG_BYTES: u64 = 40_000;

/// Liveness check
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, body = String, content_type = "application/json"),
    ),
    tag = "Logs",
)]
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "AudioPrint Backend is Live!" }))
}

/// Latest log
#[utoipa::path(
    get,
    path = "/api/log/latest",
    responses(
        (status = 200, body = Vec<crate::tracing::JsonTracingEvent>, content_type = "application/json"),
    ),
    tag = "Logs",
)]
pub async fn latest_log(
    State(configuration): State<Arc<ServerConfiguration>>,
) -> Result<(TypedHeader<headers::ContentType>, String), AppError> {
    let json = read_log_tail(&configuration.log_path, LATEST_LOG_BYTES).await?;
    Ok((TypedHeader(headers::ContentType::json()), json))
}

/// Last `take` bytes of the json log as a json array. A partially cut first line is skipped.
async fn read_log_tail(log_path: &Path, take: u64) -> Result<String, std::io::Error> {
    use tokio::{fs, io};
    let file = fs::File::open(log_path).await?;
    let length = file.metadata().await?.len();
    let start = std::cmp::min(length, take) as i64;
    let mut reader = io::BufReader::new(file);
    reader.seek(io::SeekFrom::End(-start)).await?;

    let mut buffer = String::new();
    let mut lines = Vec::new();
    if length > take {
        reader.read_line(&mut buffer).await?;
        buffer.clear();
    }
    while reader.read_line(&mut buffer).await? != 0 {
        let line = buffer.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
        buffer.clear();
    }
    Ok(format!("[{}]", lines.join(",")))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ConfigurationResponse {
    pub port: u16,
    pub log_level: String,
    pub max_clip_seconds: u32,
    pub min_offset_votes: u32,
    #[schema(value_type = Object)]
    pub fingerprint: FingerprintSettings,
}

/// Server configuration
#[utoipa::path(
    get,
    path = "/api/configuration",
    responses(
        (status = 200, body = ConfigurationResponse),
    ),
    tag = "Configuration",
)]
pub async fn server_configuration(
    State(configuration): State<Arc<ServerConfiguration>>,
) -> Json<ConfigurationResponse> {
    let level: tracing::Level = configuration.log_level.into();
    Json(ConfigurationResponse {
        port: configuration.port,
        log_level: level.to_string(),
        max_clip_seconds: configuration.max_clip_seconds,
        min_offset_votes: configuration.min_offset_votes,
        fingerprint: configuration.fingerprint,
    })
}
