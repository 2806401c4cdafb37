use std::sync::Arc;

use fingerprint::{
    matching::{query_map, OffsetVotes},
    Analysis, Fingerprinter, TrackId,
};
use serde::Serialize;

use crate::{
    app_state::AppError,
    index::{FingerprintIndex, Track, TrackInsert},
};

/// Votes the best offset needs before a candidate counts as a match
pub const DEFAULT_MIN_OFFSET_VOTES: u32 = 3;

/// Outcome of a registration that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Registered { track_id: TrackId, fingerprints: usize },
    /// Same file is already registered
    Duplicate(Track),
    Silent,
    /// Audio produced no peaks or no pairs
    NoFingerprints,
}

impl Registration {
    pub fn is_success(&self) -> bool {
        matches!(self, Registration::Registered { .. })
    }

    pub fn message(&self, name: &str) -> String {
        match self {
            Registration::Registered {
                track_id,
                fingerprints,
            } => format!("registered {name} as track {track_id} with {fingerprints} fingerprints"),
            Registration::Duplicate(track) => {
                format!("file is already registered as {} (track {})", track.name, track.id)
            }
            Registration::Silent => "audio is silent".to_string(),
            Registration::NoFingerprints => "no fingerprints could be extracted".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct IdentificationResult {
    pub track_id: TrackId,
    pub song: String,
    /// Votes of the winning track summed over all offsets
    pub confidence: u32,
    /// Frames between the start of the track and the start of the query
    pub offset: i64,
    pub offset_seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Match(IdentificationResult),
    NoMatch,
    Silent,
}

/// Registration and identification on top of an explicit index handle.
#[derive(Debug, Clone)]
pub struct Recognizer {
    fingerprinter: Arc<Fingerprinter>,
    index: Arc<dyn FingerprintIndex>,
    min_offset_votes: u32,
}

impl Recognizer {
    pub fn new(fingerprinter: Fingerprinter, index: Arc<dyn FingerprintIndex>) -> Self {
        Self {
            fingerprinter: Arc::new(fingerprinter),
            index,
            min_offset_votes: DEFAULT_MIN_OFFSET_VOTES,
        }
    }

    pub fn with_min_offset_votes(mut self, min_offset_votes: u32) -> Self {
        self.min_offset_votes = min_offset_votes;
        self
    }

    async fn analyze(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        query: bool,
    ) -> Result<Analysis, AppError> {
        let fingerprinter = self.fingerprinter.clone();
        let analysis = tokio::task::spawn_blocking(move || {
            if query {
                fingerprinter.fingerprint_query(&samples, sample_rate)
            } else {
                fingerprinter.fingerprint(&samples, sample_rate)
            }
        })
        .await??;
        tracing::debug!(
            frames = analysis.frames,
            peaks = analysis.peaks,
            hashes = analysis.fingerprints.len(),
            "Analyzed samples"
        );
        Ok(analysis)
    }

    /// Samples must be mono. A sample rate other than the configured one is a bad request.
    pub async fn register(
        &self,
        name: &str,
        samples: Vec<f32>,
        sample_rate: u32,
        file_hash: Option<&str>,
    ) -> Result<Registration, AppError> {
        if let Some(hash) = file_hash {
            if let Some(existing) = self.index.track_by_file_hash(hash).await? {
                tracing::warn!("Refusing to register {name}: same file as track {}", existing.id);
                return Ok(Registration::Duplicate(existing));
            }
        }

        let analysis = self.analyze(samples, sample_rate, false).await?;
        if analysis.silent {
            tracing::warn!("Refusing to register silent audio as {name}");
            return Ok(Registration::Silent);
        }
        if analysis.is_empty() {
            tracing::warn!("No fingerprints extracted from {name}");
            return Ok(Registration::NoFingerprints);
        }

        let track_id = match self.index.register_track(name, file_hash).await? {
            TrackInsert::Created(track_id) => track_id,
            TrackInsert::Duplicate(existing) => {
                tracing::warn!("Refusing to register {name}: same file as track {}", existing.id);
                return Ok(Registration::Duplicate(existing));
            }
        };
        if let Err(e) = self
            .index
            .store_fingerprints(track_id, &analysis.fingerprints)
            .await
        {
            tracing::error!("Failed to store fingerprints of track {track_id}: {e}");
            if let Err(e) = self.index.remove_track(track_id).await {
                tracing::error!("Failed to clean up track {track_id}: {e}");
            }
            return Err(e.into());
        }

        let fingerprints = analysis.fingerprints.len();
        tracing::info!("Registered {name} as track {track_id} with {fingerprints} fingerprints");
        Ok(Registration::Registered {
            track_id,
            fingerprints,
        })
    }

    /// Samples must be mono. A sample rate other than the configured one is a bad request.
    pub async fn identify(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<Identification, AppError> {
        let analysis = self.analyze(samples, sample_rate, true).await?;
        if analysis.silent {
            tracing::warn!("Identification query is silent");
            return Ok(Identification::Silent);
        }
        if analysis.is_empty() {
            return Ok(Identification::NoMatch);
        }

        let query = query_map(&analysis.fingerprints);
        let hashes: Vec<_> = query.keys().copied().collect();
        let records = self.index.lookup(&hashes).await?;
        tracing::trace!("Lookup of {} hashes returned {} records", hashes.len(), records.len());

        let mut votes = OffsetVotes::tally(&query, &records);
        tracing::debug!(
            candidates = votes.candidates(),
            votes = votes.len(),
            "Voted offsets"
        );
        while let Some(alignment) = votes.best() {
            let Some(track) = self.index.track(alignment.track_id).await? else {
                tracing::debug!(
                    "Track {} was removed during identification, voting again",
                    alignment.track_id
                );
                votes.remove_track(alignment.track_id);
                continue;
            };
            if alignment.offset_votes < self.min_offset_votes {
                tracing::info!(
                    "Best offset of {} has {} votes, {} required",
                    track.name,
                    alignment.offset_votes,
                    self.min_offset_votes
                );
                return Ok(Identification::NoMatch);
            }
            let offset_seconds = self.fingerprinter.config().frames_to_seconds(alignment.offset);
            tracing::info!(
                "Identified {} with confidence {} at {offset_seconds:.2}s",
                track.name,
                alignment.confidence
            );
            return Ok(Identification::Match(IdentificationResult {
                track_id: track.id,
                song: track.name,
                confidence: alignment.confidence,
                offset: alignment.offset,
                offset_seconds,
            }));
        }
        tracing::info!("No matches found");
        Ok(Identification::NoMatch)
    }

    pub async fn remove(&self, track_id: TrackId) -> Result<(), AppError> {
        if !self.index.remove_track(track_id).await? {
            return Err(AppError::not_found(format!("track {track_id} is not found")));
        }
        tracing::info!("Removed track {track_id}");
        Ok(())
    }

    pub async fn tracks(&self) -> Result<Vec<Track>, AppError> {
        Ok(self.index.tracks().await?)
    }

    pub async fn track(&self, track_id: TrackId) -> Result<Track, AppError> {
        self.index
            .track(track_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("track {track_id} is not found")))
    }
}
