use crate::{FingerprintError, hashing::KEY_FIELD_BITS};

pub const DEFAULT_SAMPLE_RATE: u32 = 22050;
pub const DEFAULT_WINDOW_SIZE: usize = 4096;
pub const DEFAULT_HOP_LENGTH: usize = 2048;
pub const DEFAULT_FAN_VALUE: usize = 40;
pub const DEFAULT_MAX_DELTA: u32 = 200;
pub const DEFAULT_NEIGHBORHOOD: usize = 10;
pub const DEFAULT_AMPLITUDE_FLOOR: f32 = -40.0;

/// Tunables of the fingerprinting pipeline.
///
/// Registration and identification must agree on everything except the amplitude floors,
/// otherwise hashes produced by the two sides never meet in the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Configuration {
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_length: usize,
    /// Each anchor pairs with `fan_value - 1` following points.
    pub fan_value: usize,
    /// Exclusive upper bound of the anchor to target frame distance.
    pub max_delta: u32,
    /// Side of the square neighborhood used to detect local maxima.
    pub neighborhood: usize,
    /// Peaks at or below this level (dB relative to the loudest cell) are dropped.
    pub amplitude_floor: f32,
    /// Floor used for query clips. Microphone captures tend to need a different value.
    pub query_amplitude_floor: f32,
}

pub const DEFAULT_CONFIG: Configuration = Configuration::new();

impl Configuration {
    /// Creates a new default configuration.
    pub const fn new() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            window_size: DEFAULT_WINDOW_SIZE,
            hop_length: DEFAULT_HOP_LENGTH,
            fan_value: DEFAULT_FAN_VALUE,
            max_delta: DEFAULT_MAX_DELTA,
            neighborhood: DEFAULT_NEIGHBORHOOD,
            amplitude_floor: DEFAULT_AMPLITUDE_FLOOR,
            query_amplitude_floor: DEFAULT_AMPLITUDE_FLOOR,
        }
    }

    pub fn validate(&self) -> Result<(), FingerprintError> {
        if self.sample_rate == 0 {
            return Err(FingerprintError::InvalidConfiguration("sample rate is zero"));
        }
        if self.window_size == 0 || self.hop_length == 0 {
            return Err(FingerprintError::InvalidConfiguration(
                "window size and hop length must be positive",
            ));
        }
        if self.neighborhood == 0 {
            return Err(FingerprintError::InvalidConfiguration(
                "peak neighborhood must be positive",
            ));
        }
        if self.fan_value < 2 {
            return Err(FingerprintError::InvalidConfiguration(
                "fan value must be at least 2",
            ));
        }
        if self.max_delta < 2 {
            return Err(FingerprintError::InvalidConfiguration(
                "max delta must be at least 2",
            ));
        }
        // bins and deltas have to fit the packed hash key
        if self.max_delta as u64 > 1 << KEY_FIELD_BITS {
            return Err(FingerprintError::InvalidConfiguration(
                "max delta does not fit the hash key",
            ));
        }
        if self.frequency_bins() as u64 > 1 << KEY_FIELD_BITS {
            return Err(FingerprintError::InvalidConfiguration(
                "window size is too large for the hash key",
            ));
        }
        Ok(())
    }

    /// Number of frequency bins in a spectrogram frame.
    pub fn frequency_bins(&self) -> usize {
        self.window_size / 2 + 1
    }

    /// Converts a frame offset into seconds. Negative offsets stay negative.
    pub fn frames_to_seconds(&self, frames: i64) -> f64 {
        frames as f64 * self.hop_length as f64 / self.sample_rate as f64
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Configuration, DEFAULT_CONFIG};

    #[test]
    fn default_offset_conversion() {
        let seconds = DEFAULT_CONFIG.frames_to_seconds(50);
        assert!((seconds - 50.0 * 2048.0 / 22050.0).abs() < 1e-9);
        assert!(DEFAULT_CONFIG.frames_to_seconds(-3) < 0.0);
        assert_eq!(DEFAULT_CONFIG.frequency_bins(), 2049);
    }

    #[test]
    fn rejects_degenerate_values() {
        assert!(DEFAULT_CONFIG.validate().is_ok());
        let config = Configuration {
            fan_value: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = Configuration {
            hop_length: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_values_that_overflow_hash_key() {
        let widest = Configuration {
            max_delta: 1 << 20,
            window_size: 2 * ((1 << 20) - 1),
            ..Default::default()
        };
        assert!(widest.validate().is_ok());
        let config = Configuration {
            max_delta: (1 << 20) + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = Configuration {
            window_size: 1 << 21,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
