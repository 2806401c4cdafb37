use std::{f32::consts::PI, fmt::Debug, sync::Arc};

use realfft::{RealFftPlanner, RealToComplex};

use crate::{FingerprintError, config::Configuration};

/// Magnitudes below this value are clamped before taking the logarithm.
const AMPLITUDE_MIN: f32 = 1e-5;
/// Dynamic range kept below the loudest cell.
const TOP_DB: f32 = 80.0;

/// Log-magnitude matrix `S[bin][frame]` normalized so the loudest cell is 0 dB.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    bins: usize,
    frames: usize,
    /// bin-major storage
    values: Vec<f32>,
}

impl Spectrogram {
    pub fn from_values(bins: usize, frames: usize, values: Vec<f32>) -> Self {
        assert_eq!(bins * frames, values.len());
        Self {
            bins,
            frames,
            values,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn get(&self, bin: usize, frame: usize) -> f32 {
        self.values[bin * self.frames + frame]
    }

    /// All frames of a single frequency bin.
    pub fn bin(&self, bin: usize) -> &[f32] {
        &self.values[bin * self.frames..(bin + 1) * self.frames]
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn min(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }
}

/// Outcome of a transform. Silence is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Spectrum {
    Silent,
    Ready(Spectrogram),
}

/// Short-time Fourier transform with a periodic Hann window and centered frames.
///
/// Frame `t` is centered on sample `t * hop_length`; the signal is zero-padded by half a
/// window on both sides, which yields `1 + len / hop_length` frames.
#[derive(Clone)]
pub struct SpectrogramBuilder {
    sample_rate: u32,
    window_size: usize,
    hop_length: usize,
    window: Arc<[f32]>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl Debug for SpectrogramBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramBuilder")
            .field("sample_rate", &self.sample_rate)
            .field("window_size", &self.window_size)
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

fn hann_window(size: usize) -> Arc<[f32]> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / size as f32).cos())
        .collect()
}

impl SpectrogramBuilder {
    pub fn new(config: &Configuration) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.window_size);
        Self {
            sample_rate: config.sample_rate,
            window_size: config.window_size,
            hop_length: config.hop_length,
            window: hann_window(config.window_size),
            fft,
        }
    }

    pub fn frame_count(&self, samples_len: usize) -> usize {
        1 + samples_len / self.hop_length
    }

    pub fn build(&self, samples: &[f32], sample_rate: u32) -> Result<Spectrum, FingerprintError> {
        if samples.is_empty() {
            return Err(FingerprintError::EmptyInput);
        }
        if sample_rate != self.sample_rate {
            return Err(FingerprintError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: sample_rate,
            });
        }
        let peak_amplitude = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak_amplitude == 0.0 {
            return Ok(Spectrum::Silent);
        }

        let bins = self.window_size / 2 + 1;
        let frames = self.frame_count(samples.len());
        let pad = self.window_size / 2;

        let mut magnitudes = vec![0.0f32; bins * frames];
        let mut input = self.fft.make_input_vec();
        let mut output = self.fft.make_output_vec();
        let mut scratch = self.fft.make_scratch_vec();

        for frame in 0..frames {
            // position of input[0] in the unpadded signal
            let origin = (frame * self.hop_length) as isize - pad as isize;
            for (i, slot) in input.iter_mut().enumerate() {
                let position = origin + i as isize;
                let sample = if position >= 0 && (position as usize) < samples.len() {
                    samples[position as usize]
                } else {
                    0.0
                };
                *slot = sample * self.window[i];
            }
            self.fft
                .process_with_scratch(&mut input, &mut output, &mut scratch)
                .map_err(|e| FingerprintError::Transform(e.to_string()))?;
            for (bin, value) in output.iter().enumerate() {
                magnitudes[bin * frames + frame] = value.norm();
            }
        }

        Ok(Spectrum::Ready(Spectrogram::from_values(
            bins,
            frames,
            amplitude_to_db(magnitudes),
        )))
    }
}

/// `20 * log10(|X| / max|X|)` with the floor clamped to `-TOP_DB`.
fn amplitude_to_db(mut magnitudes: Vec<f32>) -> Vec<f32> {
    let reference = magnitudes
        .iter()
        .copied()
        .fold(0.0f32, f32::max)
        .max(AMPLITUDE_MIN);
    let reference_db = 20.0 * reference.log10();
    for value in magnitudes.iter_mut() {
        let db = 20.0 * value.max(AMPLITUDE_MIN).log10() - reference_db;
        *value = db.max(-TOP_DB);
    }
    magnitudes
}

#[cfg(test)]
mod tests {
    use crate::{
        FingerprintError,
        config::{Configuration, DEFAULT_CONFIG},
        testing::sine,
    };

    use super::{Spectrum, SpectrogramBuilder};

    fn builder() -> SpectrogramBuilder {
        SpectrogramBuilder::new(&DEFAULT_CONFIG)
    }

    #[test]
    fn rejects_invalid_input() {
        let builder = builder();
        assert!(matches!(
            builder.build(&[], 22050),
            Err(FingerprintError::EmptyInput)
        ));
        assert!(matches!(
            builder.build(&[0.1; 100], 44100),
            Err(FingerprintError::SampleRateMismatch {
                expected: 22050,
                actual: 44100
            })
        ));
    }

    #[test]
    fn silence_is_reported() {
        let spectrum = builder().build(&vec![0.0; 22050], 22050).unwrap();
        assert_eq!(spectrum, Spectrum::Silent);
    }

    #[test]
    fn pure_tone_lands_in_its_bin() {
        let config = DEFAULT_CONFIG;
        // 1000 Hz -> bin 1000 * 4096 / 22050 ~= 185.8
        let samples = sine(1000.0, 3.0, config.sample_rate);
        let Spectrum::Ready(spectrogram) = builder().build(&samples, config.sample_rate).unwrap()
        else {
            panic!("tone must not be silent");
        };
        assert_eq!(spectrogram.bins(), 2049);
        assert_eq!(spectrogram.frames(), 1 + samples.len() / 2048);
        assert_eq!(spectrogram.max(), 0.0);
        assert!(spectrogram.min() >= -80.0);

        let middle = spectrogram.frames() / 2;
        let loudest = (0..spectrogram.bins())
            .max_by(|a, b| {
                spectrogram
                    .get(*a, middle)
                    .total_cmp(&spectrogram.get(*b, middle))
            })
            .unwrap();
        assert!((185..=187).contains(&loudest), "loudest bin was {loudest}");
    }

    #[test]
    fn short_clip_still_produces_frames() {
        let config = Configuration::default();
        let samples = sine(440.0, 0.05, config.sample_rate);
        let spectrum = builder().build(&samples, config.sample_rate).unwrap();
        let Spectrum::Ready(spectrogram) = spectrum else {
            panic!("tone must not be silent");
        };
        assert_eq!(spectrogram.frames(), 1);
    }
}
