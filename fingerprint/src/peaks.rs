use crate::spectrogram::Spectrogram;

/// Spectrogram local maximum. A "star" of the constellation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstellationPoint {
    pub bin: u32,
    pub frame: u32,
}

impl ConstellationPoint {
    pub fn new(bin: u32, frame: u32) -> Self {
        Self { bin, frame }
    }
}

/// Finds cells that are the maximum of their rectangular neighborhood.
///
/// For a neighborhood of `n` cells the window spans `n / 2` cells before and `n - n / 2 - 1`
/// cells after the center on both axes and is clamped at the edges.
/// Cells tied with the neighborhood maximum are all reported.
#[derive(Debug, Clone, Copy)]
pub struct PeakExtractor {
    neighborhood: usize,
}

impl PeakExtractor {
    pub fn new(neighborhood: usize) -> Self {
        Self {
            neighborhood: neighborhood.max(1),
        }
    }

    fn reach(&self) -> (usize, usize) {
        let before = self.neighborhood / 2;
        (before, self.neighborhood - before - 1)
    }

    /// Output order is not part of the contract.
    pub fn extract(&self, spectrogram: &Spectrogram, amplitude_floor: f32) -> Vec<ConstellationPoint> {
        let bins = spectrogram.bins();
        let frames = spectrogram.frames();
        if bins == 0 || frames == 0 {
            return Vec::new();
        }
        let (before, after) = self.reach();

        // max along time, bin by bin
        let mut time_max = vec![0.0f32; bins * frames];
        for bin in 0..bins {
            sliding_max(
                spectrogram.bin(bin),
                &mut time_max[bin * frames..(bin + 1) * frames],
                before,
                after,
            );
        }

        // then along frequency, frame by frame
        let mut column = vec![0.0f32; bins];
        let mut column_max = vec![0.0f32; bins];
        let mut peaks = Vec::new();
        for frame in 0..frames {
            for (bin, slot) in column.iter_mut().enumerate() {
                *slot = time_max[bin * frames + frame];
            }
            sliding_max(&column, &mut column_max, before, after);
            for (bin, neighborhood_max) in column_max.iter().enumerate() {
                let value = spectrogram.get(bin, frame);
                if value == *neighborhood_max && value > amplitude_floor {
                    peaks.push(ConstellationPoint::new(bin as u32, frame as u32));
                }
            }
        }
        peaks
    }
}

fn sliding_max(input: &[f32], output: &mut [f32], before: usize, after: usize) {
    let len = input.len();
    for (i, out) in output.iter_mut().enumerate() {
        let start = i.saturating_sub(before);
        let end = (i + after + 1).min(len);
        *out = input[start..end]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
    }
}

#[cfg(test)]
mod tests {
    use crate::spectrogram::Spectrogram;

    use super::{ConstellationPoint, PeakExtractor, sliding_max};

    fn flat(bins: usize, frames: usize, level: f32) -> Vec<f32> {
        vec![level; bins * frames]
    }

    #[test]
    fn sliding_window_is_clamped() {
        let input = [1.0, 5.0, 2.0, 0.0, 0.0, 0.0, 3.0];
        let mut output = [0.0; 7];
        sliding_max(&input, &mut output, 1, 1);
        assert_eq!(output, [5.0, 5.0, 5.0, 2.0, 0.0, 3.0, 3.0]);
    }

    #[test]
    fn single_peak_is_found() {
        let (bins, frames) = (30, 30);
        let mut values = flat(bins, frames, -80.0);
        values[12 * frames + 7] = -3.0;
        let spectrogram = Spectrogram::from_values(bins, frames, values);
        let peaks = PeakExtractor::new(10).extract(&spectrogram, -40.0);
        assert_eq!(peaks, vec![ConstellationPoint::new(12, 7)]);
    }

    #[test]
    fn floor_is_exclusive() {
        let (bins, frames) = (20, 20);
        let mut values = flat(bins, frames, -80.0);
        values[3 * frames + 3] = -40.0;
        values[15 * frames + 15] = -39.5;
        let spectrogram = Spectrogram::from_values(bins, frames, values);
        let peaks = PeakExtractor::new(10).extract(&spectrogram, -40.0);
        assert_eq!(peaks, vec![ConstellationPoint::new(15, 15)]);
    }

    #[test]
    fn weaker_neighbor_is_suppressed() {
        let (bins, frames) = (40, 40);
        let mut values = flat(bins, frames, -80.0);
        values[10 * frames + 10] = -1.0;
        // inside the neighborhood of the stronger peak
        values[13 * frames + 12] = -2.0;
        // outside of it
        values[25 * frames + 30] = -2.0;
        let spectrogram = Spectrogram::from_values(bins, frames, values);
        let mut peaks = PeakExtractor::new(10).extract(&spectrogram, -40.0);
        peaks.sort();
        assert_eq!(
            peaks,
            vec![ConstellationPoint::new(10, 10), ConstellationPoint::new(25, 30)]
        );
    }

    #[test]
    fn ties_are_all_kept() {
        let (bins, frames) = (20, 20);
        let mut values = flat(bins, frames, -80.0);
        values[5 * frames + 5] = -10.0;
        values[5 * frames + 6] = -10.0;
        let spectrogram = Spectrogram::from_values(bins, frames, values);
        let peaks = PeakExtractor::new(10).extract(&spectrogram, -40.0);
        assert_eq!(peaks.len(), 2);
    }

    #[test]
    fn silent_floor_yields_nothing() {
        let spectrogram = Spectrogram::from_values(10, 10, flat(10, 10, -80.0));
        assert!(PeakExtractor::new(10).extract(&spectrogram, -40.0).is_empty());
        let empty = Spectrogram::from_values(0, 0, Vec::new());
        assert!(PeakExtractor::new(10).extract(&empty, -40.0).is_empty());
    }
}
