use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    app_state::{AppError, AppState},
    config::ServerConfiguration,
    decode::{decode_clip, file_hash, DecodedClip},
    index::Track,
    recognition::{Identification, Recognizer},
};

use super::{Status, StatusResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct IdentifyResponse {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
    /// Position of the clip inside the matched track
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IdentifyResponse {
    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            song: None,
            confidence: None,
            offset_seconds: None,
            message: Some(message.into()),
        }
    }
}

impl From<Identification> for IdentifyResponse {
    fn from(identification: Identification) -> Self {
        match identification {
            Identification::Match(result) => Self {
                status: Status::Success,
                song: Some(result.song),
                confidence: Some(result.confidence),
                offset_seconds: Some((result.offset_seconds * 100.0).round() / 100.0),
                message: None,
            },
            Identification::NoMatch => Self::fail("No matches found"),
            Identification::Silent => Self::fail("Audio is silent"),
        }
    }
}

#[derive(Debug, Default)]
struct Upload {
    file: Option<Bytes>,
    file_name: Option<String>,
    song_name: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut upload = Upload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("Failed to handle multipart request: {e}")))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("file") => {
                upload.file_name = field.file_name().map(ToString::to_string);
                upload.file = Some(field.bytes().await.map_err(|e| {
                    AppError::bad_request(format!("Failed to read uploaded file: {e}"))
                })?);
            }
            Some("song_name") => {
                upload.song_name = Some(field.text().await.map_err(|e| {
                    AppError::bad_request(format!("Failed to read song name: {e}"))
                })?);
            }
            _ => continue,
        }
    }
    Ok(upload)
}

async fn decode_upload(
    bytes: Bytes,
    configuration: &ServerConfiguration,
) -> Result<DecodedClip, AppError> {
    let sample_rate = configuration.fingerprint.sample_rate;
    let max_duration = Duration::from_secs(configuration.max_clip_seconds as u64);
    let clip =
        tokio::task::spawn_blocking(move || decode_clip(&bytes, sample_rate, max_duration))
            .await??;
    if clip.truncated {
        tracing::debug!(
            "Upload is trimmed to the first {} seconds",
            configuration.max_clip_seconds
        );
    }
    tracing::debug!(
        source_rate = clip.source_rate,
        channels = clip.channels,
        "Decoded {:.1}s of audio",
        clip.duration().as_secs_f32()
    );
    Ok(clip)
}

/// Decode, fingerprint and store an audio file
pub async fn register_file(
    recognizer: &Recognizer,
    configuration: &ServerConfiguration,
    name: &str,
    bytes: Bytes,
) -> Result<StatusResponse, AppError> {
    let hash = file_hash(&bytes);
    let clip = decode_upload(bytes, configuration).await?;
    let registration = recognizer
        .register(name, clip.samples, clip.sample_rate, Some(&hash))
        .await?;
    if registration.is_success() {
        Ok(StatusResponse::success(format!("Successfully added {name}")))
    } else {
        Ok(StatusResponse::fail(registration.message(name)))
    }
}

/// Decode an audio clip and look it up
pub async fn identify_file(
    recognizer: &Recognizer,
    configuration: &ServerConfiguration,
    bytes: Bytes,
) -> Result<IdentifyResponse, AppError> {
    let clip = decode_upload(bytes, configuration).await?;
    Ok(recognizer.identify(clip.samples, clip.sample_rate).await?.into())
}

/// Register audio file
#[utoipa::path(
    post,
    path = "/api/register",
    request_body(content_type = "multipart/form-data", description = "`file` with the audio and `song_name`"),
    responses(
        (status = 200, body = StatusResponse),
        (status = 400, body = AppError),
    ),
    tag = "Recognition",
)]
pub async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<StatusResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let file = upload
        .file
        .ok_or_else(|| AppError::bad_request("Missing file field"))?;
    let name = upload
        .song_name
        .filter(|name| !name.trim().is_empty())
        .or(upload.file_name)
        .ok_or_else(|| AppError::bad_request("Missing song_name field"))?;
    tracing::info!("Processing upload of {name}");
    let response = register_file(&state.recognizer, &state.configuration, name.trim(), file).await?;
    Ok(Json(response))
}

/// Identify audio clip
#[utoipa::path(
    post,
    path = "/api/identify",
    request_body(content_type = "multipart/form-data", description = "`file` with the audio clip"),
    responses(
        (status = 200, body = IdentifyResponse),
        (status = 400, body = AppError),
    ),
    tag = "Recognition",
)]
pub async fn identify(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IdentifyResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let file = upload
        .file
        .ok_or_else(|| AppError::bad_request("Missing file field"))?;
    let response = identify_file(&state.recognizer, &state.configuration, file).await?;
    Ok(Json(response))
}

/// All registered tracks
#[utoipa::path(
    get,
    path = "/api/tracks",
    responses(
        (status = 200, body = Vec<Track>),
    ),
    tag = "Tracks",
)]
pub async fn all_tracks(State(recognizer): State<Recognizer>) -> Result<Json<Vec<Track>>, AppError> {
    Ok(Json(recognizer.tracks().await?))
}

/// Track by id
#[utoipa::path(
    get,
    path = "/api/tracks/{id}",
    params(
        ("id", description = "Track id"),
    ),
    responses(
        (status = 200, body = Track),
        (status = 404, body = AppError),
    ),
    tag = "Tracks",
)]
pub async fn track(
    State(recognizer): State<Recognizer>,
    Path(id): Path<i64>,
) -> Result<Json<Track>, AppError> {
    Ok(Json(recognizer.track(id).await?))
}

/// Remove track and its fingerprints
#[utoipa::path(
    delete,
    path = "/api/tracks/{id}",
    params(
        ("id", description = "Track id"),
    ),
    responses(
        (status = 200),
        (status = 404, body = AppError),
    ),
    tag = "Tracks",
)]
pub async fn remove_track(
    State(recognizer): State<Recognizer>,
    Path(id): Path<i64>,
) -> Result<(), AppError> {
    recognizer.remove(id).await
}
