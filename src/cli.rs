use std::path::Path;

use axum::body::Bytes;

use crate::{
    config::ServerConfiguration,
    recognition::Recognizer,
    server::{recognition_api, Status},
};

/// Registers a file from disk. Name defaults to the file stem.
pub async fn register(
    recognizer: &Recognizer,
    configuration: &ServerConfiguration,
    path: &Path,
    name: Option<String>,
) -> Result<(), anyhow::Error> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?,
    };
    let bytes = Bytes::from(tokio::fs::read(path).await?);
    let response = recognition_api::register_file(recognizer, configuration, &name, bytes).await?;
    println!("{}", response.message);
    if response.status == Status::Fail {
        return Err(anyhow::anyhow!("registration of {} failed", path.display()));
    }
    Ok(())
}

pub async fn identify(
    recognizer: &Recognizer,
    configuration: &ServerConfiguration,
    path: &Path,
) -> Result<(), anyhow::Error> {
    let bytes = Bytes::from(tokio::fs::read(path).await?);
    let response = recognition_api::identify_file(recognizer, configuration, bytes).await?;
    match (response.song, response.confidence, response.offset_seconds) {
        (Some(song), Some(confidence), Some(offset)) => {
            println!("{song} (confidence {confidence}, offset {offset:.2}s)");
        }
        _ => println!("{}", response.message.unwrap_or_default()),
    }
    Ok(())
}

pub async fn tracks(recognizer: &Recognizer) -> Result<(), anyhow::Error> {
    let tracks = recognizer.tracks().await?;
    if tracks.is_empty() {
        println!("No tracks registered");
    }
    for track in tracks {
        println!(
            "{:>6}  {:<40}  {} fingerprints",
            track.id, track.name, track.fingerprint_count
        );
    }
    Ok(())
}

pub async fn remove(recognizer: &Recognizer, id: i64) -> Result<(), anyhow::Error> {
    recognizer.remove(id).await?;
    println!("Removed track {id}");
    Ok(())
}
