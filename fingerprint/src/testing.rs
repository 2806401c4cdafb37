//! Deterministic synthetic audio for tests.

use std::f32::consts::TAU;

use rand::{Rng, SeedableRng, rngs::StdRng};

pub fn sine(frequency: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    (0..len)
        .map(|n| 0.5 * (TAU * frequency * n as f32 / sample_rate as f32).sin())
        .collect()
}

/// Two phase-continuous voices jumping between random pitches every 150-500 ms.
pub fn melody(seed: u64, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = (seconds * sample_rate as f32) as usize;
    let mut samples = vec![0.0f32; len];
    for _voice in 0..2 {
        let mut phase = 0.0f32;
        let mut position = 0;
        while position < len {
            let frequency: f32 = rng.random_range(150.0..4000.0);
            let duration: f32 = rng.random_range(0.15..0.5);
            let note_len = ((duration * sample_rate as f32) as usize).min(len - position);
            let step = TAU * frequency / sample_rate as f32;
            for sample in &mut samples[position..position + note_len] {
                *sample += 0.3 * phase.sin();
                phase = (phase + step) % TAU;
            }
            position += note_len;
        }
    }
    samples
}

pub fn white_noise(seed: u64, seconds: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = (seconds * sample_rate as f32) as usize;
    (0..len)
        .map(|_| amplitude * rng.random_range(-1.0f32..1.0))
        .collect()
}

/// Adds seeded noise on top of a signal.
pub fn with_noise(samples: &[f32], seed: u64, amplitude: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    samples
        .iter()
        .map(|s| s + amplitude * rng.random_range(-1.0f32..1.0))
        .collect()
}
