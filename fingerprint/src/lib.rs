use std::fmt::Display;

pub mod config;
pub mod hashing;
pub mod matching;
pub mod peaks;
pub mod spectrogram;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Configuration;
pub use hashing::{Fingerprint, FingerprintHash, HashGenerator};
pub use matching::{Alignment, FingerprintRecord, OffsetVotes, TrackId};
pub use peaks::{ConstellationPoint, PeakExtractor};
pub use spectrogram::{Spectrogram, SpectrogramBuilder, Spectrum};

#[derive(Debug)]
pub enum FingerprintError {
    EmptyInput,
    SampleRateMismatch { expected: u32, actual: u32 },
    InvalidConfiguration(&'static str),
    Transform(String),
}

impl Display for FingerprintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FingerprintError::EmptyInput => write!(f, "sample sequence is empty"),
            FingerprintError::SampleRateMismatch { expected, actual } => {
                write!(f, "expected {expected} Hz samples, got {actual} Hz")
            }
            FingerprintError::InvalidConfiguration(reason) => {
                write!(f, "invalid fingerprint configuration: {reason}")
            }
            FingerprintError::Transform(reason) => write!(f, "fourier transform failed: {reason}"),
        }
    }
}

impl std::error::Error for FingerprintError {}

/// Result of running samples through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Input had zero amplitude throughout.
    pub silent: bool,
    pub frames: usize,
    pub peaks: usize,
    pub fingerprints: Vec<Fingerprint>,
}

impl Analysis {
    fn silent() -> Self {
        Self {
            silent: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Samples -> spectrogram -> constellation -> hashes.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    config: Configuration,
    spectrogram: SpectrogramBuilder,
    peaks: PeakExtractor,
    hashes: HashGenerator,
}

impl Fingerprinter {
    pub fn new(config: Configuration) -> Result<Self, FingerprintError> {
        config.validate()?;
        Ok(Self {
            spectrogram: SpectrogramBuilder::new(&config),
            peaks: PeakExtractor::new(config.neighborhood),
            hashes: HashGenerator::new(config.fan_value, config.max_delta),
            config,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Constellation of the samples. Silent input yields an empty set.
    pub fn constellation(
        &self,
        samples: &[f32],
        sample_rate: u32,
        amplitude_floor: f32,
    ) -> Result<(Spectrum, Vec<ConstellationPoint>), FingerprintError> {
        let spectrum = self.spectrogram.build(samples, sample_rate)?;
        let points = match &spectrum {
            Spectrum::Silent => Vec::new(),
            Spectrum::Ready(spectrogram) => self.peaks.extract(spectrogram, amplitude_floor),
        };
        Ok((spectrum, points))
    }

    fn analyze(
        &self,
        samples: &[f32],
        sample_rate: u32,
        amplitude_floor: f32,
    ) -> Result<Analysis, FingerprintError> {
        let (spectrum, points) = self.constellation(samples, sample_rate, amplitude_floor)?;
        let Spectrum::Ready(spectrogram) = spectrum else {
            return Ok(Analysis::silent());
        };
        Ok(Analysis {
            silent: false,
            frames: spectrogram.frames(),
            peaks: points.len(),
            fingerprints: self.hashes.generate(&points),
        })
    }

    /// Fingerprints of a track that is about to be registered.
    pub fn fingerprint(&self, samples: &[f32], sample_rate: u32) -> Result<Analysis, FingerprintError> {
        self.analyze(samples, sample_rate, self.config.amplitude_floor)
    }

    /// Fingerprints of a query clip, extracted with the query amplitude floor.
    pub fn fingerprint_query(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Analysis, FingerprintError> {
        self.analyze(samples, sample_rate, self.config.query_amplitude_floor)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::{
        Configuration, FingerprintError, FingerprintRecord, Fingerprinter,
        config::DEFAULT_CONFIG,
        hashing::Fingerprint,
        matching::align,
        testing::{melody, white_noise, with_noise},
    };

    const RATE: u32 = DEFAULT_CONFIG.sample_rate;
    const HOP: usize = DEFAULT_CONFIG.hop_length;

    fn fingerprinter() -> Fingerprinter {
        Fingerprinter::new(Configuration::default()).unwrap()
    }

    fn as_records(track_id: i64, fingerprints: &[Fingerprint]) -> Vec<FingerprintRecord> {
        fingerprints
            .iter()
            .map(|f| FingerprintRecord {
                hash: f.hash,
                track_id,
                anchor_time: f.anchor_time,
            })
            .collect()
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = Configuration {
            neighborhood: 0,
            ..Default::default()
        };
        assert!(matches!(
            Fingerprinter::new(config),
            Err(FingerprintError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn silence_produces_empty_analysis() {
        let analysis = fingerprinter().fingerprint(&vec![0.0; 44100], RATE).unwrap();
        assert!(analysis.silent);
        assert!(analysis.is_empty());
    }

    #[test]
    fn pipeline_is_deterministic() {
        let samples = melody(3, 8.0, RATE);
        let fingerprinter = fingerprinter();
        let first: HashSet<_> = fingerprinter
            .fingerprint(&samples, RATE)
            .unwrap()
            .fingerprints
            .into_iter()
            .collect();
        let second: HashSet<_> = fingerprinter
            .fingerprint(&samples, RATE)
            .unwrap()
            .fingerprints
            .into_iter()
            .collect();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn hashes_respect_bounds() {
        let analysis = fingerprinter().fingerprint(&melody(4, 10.0, RATE), RATE).unwrap();
        assert!(analysis.peaks > 0);
        for fingerprint in &analysis.fingerprints {
            assert!(fingerprint.hash.delta > 0 && fingerprint.hash.delta < 200);
            assert!((fingerprint.anchor_time as usize) < analysis.frames);
        }
    }

    #[test]
    fn identifies_itself() {
        let fingerprinter = fingerprinter();
        let samples = melody(11, 20.0, RATE);
        let stored = fingerprinter.fingerprint(&samples, RATE).unwrap().fingerprints;
        let query = fingerprinter.fingerprint_query(&samples, RATE).unwrap().fingerprints;
        let distinct: HashSet<_> = query.iter().map(|f| f.hash).collect();

        let alignment = align(&query, &as_records(1, &stored)).unwrap();
        assert_eq!(alignment.track_id, 1);
        assert_eq!(alignment.offset, 0);
        assert!(alignment.confidence as usize >= distinct.len());
    }

    #[test]
    fn shifted_clip_reports_its_offset() {
        let fingerprinter = fingerprinter();
        let samples = melody(12, 20.0, RATE);
        let shift = 50;
        let stored = fingerprinter.fingerprint(&samples, RATE).unwrap().fingerprints;
        let query = fingerprinter
            .fingerprint_query(&samples[shift * HOP..], RATE)
            .unwrap()
            .fingerprints;

        let alignment = align(&query, &as_records(1, &stored)).unwrap();
        assert_eq!(alignment.offset, shift as i64);
        let seconds = DEFAULT_CONFIG.frames_to_seconds(alignment.offset);
        assert!((seconds - 4.644).abs() < 0.01);
    }

    #[test]
    fn noisy_excerpt_finds_the_right_track() {
        let fingerprinter = fingerprinter();
        let first = melody(21, 20.0, RATE);
        let second = melody(22, 20.0, RATE);
        let mut records = as_records(1, &fingerprinter.fingerprint(&first, RATE).unwrap().fingerprints);
        records.extend(as_records(
            2,
            &fingerprinter.fingerprint(&second, RATE).unwrap().fingerprints,
        ));

        let excerpt = with_noise(&second[30 * HOP..130 * HOP], 5, 0.02);
        let query = fingerprinter.fingerprint_query(&excerpt, RATE).unwrap().fingerprints;
        let alignment = align(&query, &records).unwrap();
        assert_eq!(alignment.track_id, 2);
        assert!((alignment.offset - 30).abs() <= 1);
    }

    #[test]
    fn unrelated_noise_has_no_consistent_offset() {
        let fingerprinter = fingerprinter();
        let mut records = Vec::new();
        for track_id in 1..=3 {
            let track = melody(track_id as u64, 30.0, RATE);
            let stored = fingerprinter.fingerprint(&track, RATE).unwrap().fingerprints;
            records.extend(as_records(track_id, &stored));
        }

        for seed in 100..105 {
            let noise = white_noise(seed, 5.0, RATE, 0.5);
            let query = fingerprinter.fingerprint_query(&noise, RATE).unwrap().fingerprints;
            assert!(!query.is_empty());
            // stray hash collisions may still elect a track, but never on a shared offset
            if let Some(alignment) = align(&query, &records) {
                assert!(alignment.offset_votes < 3, "{alignment:?}");
            }
        }
    }
}
