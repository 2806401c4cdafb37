use std::fmt::Display;

use crate::peaks::ConstellationPoint;

/// Width of every field of a packed hash key.
pub const KEY_FIELD_BITS: u32 = 20;
const FIELD_MASK: u64 = (1 << KEY_FIELD_BITS) - 1;

/// Pair of constellation points: both frequencies and the frame distance between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintHash {
    pub anchor_bin: u32,
    pub target_bin: u32,
    pub delta: u32,
}

impl FingerprintHash {
    pub fn new(anchor_bin: u32, target_bin: u32, delta: u32) -> Self {
        Self {
            anchor_bin,
            target_bin,
            delta,
        }
    }

    /// Packed form used as the index key: 20 bits per field, anchor bin in the high bits.
    pub fn key(&self) -> u64 {
        ((self.anchor_bin as u64 & FIELD_MASK) << (2 * KEY_FIELD_BITS))
            | ((self.target_bin as u64 & FIELD_MASK) << KEY_FIELD_BITS)
            | (self.delta as u64 & FIELD_MASK)
    }

    pub fn from_key(key: u64) -> Self {
        Self {
            anchor_bin: ((key >> (2 * KEY_FIELD_BITS)) & FIELD_MASK) as u32,
            target_bin: ((key >> KEY_FIELD_BITS) & FIELD_MASK) as u32,
            delta: (key & FIELD_MASK) as u32,
        }
    }
}

impl Display for FingerprintHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.anchor_bin, self.target_bin, self.delta)
    }
}

/// Hash anchored to the absolute frame of its earlier point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub hash: FingerprintHash,
    pub anchor_time: u32,
}

/// Combinatorial hashing over time-sorted constellation points.
#[derive(Debug, Clone, Copy)]
pub struct HashGenerator {
    fan_value: usize,
    max_delta: u32,
}

impl HashGenerator {
    pub fn new(fan_value: usize, max_delta: u32) -> Self {
        Self {
            fan_value,
            max_delta,
        }
    }

    /// Pairs every point with up to `fan_value - 1` points that follow it in time order.
    ///
    /// Points are ordered by frame, then by bin. Pairs outside `0 < delta < max_delta` are
    /// skipped, so simultaneous points never pair with each other.
    pub fn generate(&self, points: &[ConstellationPoint]) -> Vec<Fingerprint> {
        let mut points = points.to_vec();
        points.sort_unstable_by_key(|p| (p.frame, p.bin));
        points.dedup();

        let fan_out = self.fan_value.saturating_sub(1);
        let mut fingerprints = Vec::with_capacity(points.len() * fan_out);
        for (i, anchor) in points.iter().enumerate() {
            for target in points.iter().skip(i + 1).take(fan_out) {
                let delta = target.frame - anchor.frame;
                if delta == 0 || delta >= self.max_delta {
                    continue;
                }
                fingerprints.push(Fingerprint {
                    hash: FingerprintHash::new(anchor.bin, target.bin, delta),
                    anchor_time: anchor.frame,
                });
            }
        }
        fingerprints
    }
}
