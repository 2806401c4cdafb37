use std::collections::HashMap;

use crate::hashing::{Fingerprint, FingerprintHash};

pub type TrackId = i64;

/// Stored association of a hash with a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FingerprintRecord {
    pub hash: FingerprintHash,
    pub track_id: TrackId,
    pub anchor_time: u32,
}

/// Winner of the vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    pub track_id: TrackId,
    /// Votes of the track summed over all of its offsets.
    pub confidence: u32,
    /// `stored anchor - query anchor`, in frames.
    pub offset: i64,
    /// Votes of the winning offset alone.
    pub offset_votes: u32,
}

/// Maps every query hash to its anchor time. A repeated hash keeps its last anchor.
pub fn query_map(fingerprints: &[Fingerprint]) -> HashMap<FingerprintHash, u32> {
    let mut map = HashMap::with_capacity(fingerprints.len());
    for fingerprint in fingerprints {
        map.insert(fingerprint.hash, fingerprint.anchor_time);
    }
    map
}

/// Two-stage offset histogram.
///
/// Tracks are ranked by the sum of all their votes, ties going to the lowest track id.
/// Inside the winning track the offset with the most votes wins, ties going to the smallest
/// offset.
#[derive(Debug, Default, Clone)]
pub struct OffsetVotes {
    tracks: HashMap<TrackId, HashMap<i64, u32>>,
    total: usize,
}

impl OffsetVotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, track_id: TrackId, offset: i64) {
        *self
            .tracks
            .entry(track_id)
            .or_default()
            .entry(offset)
            .or_default() += 1;
        self.total += 1;
    }

    /// Drops every vote of the track and returns how many there were.
    pub fn remove_track(&mut self, track_id: TrackId) -> u32 {
        let removed: u32 = self
            .tracks
            .remove(&track_id)
            .map(|offsets| offsets.values().sum())
            .unwrap_or(0);
        self.total -= removed as usize;
        removed
    }

    /// Casts a vote for every record whose hash is present in the query.
    pub fn tally<'a>(
        query: &HashMap<FingerprintHash, u32>,
        records: impl IntoIterator<Item = &'a FingerprintRecord>,
    ) -> Self {
        let mut votes = Self::new();
        for record in records {
            let Some(query_anchor) = query.get(&record.hash) else {
                continue;
            };
            let offset = record.anchor_time as i64 - *query_anchor as i64;
            votes.add(record.track_id, offset);
        }
        votes
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Total amount of casted votes.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn count(&self, track_id: TrackId, offset: i64) -> u32 {
        self.tracks
            .get(&track_id)
            .and_then(|offsets| offsets.get(&offset))
            .copied()
            .unwrap_or(0)
    }

    pub fn candidates(&self) -> usize {
        self.tracks.values().map(|offsets| offsets.len()).sum()
    }

    /// Votes per track summed over offsets, sorted by track id.
    pub fn track_totals(&self) -> Vec<(TrackId, u32)> {
        let mut totals: Vec<_> = self
            .tracks
            .iter()
            .map(|(track_id, offsets)| (*track_id, offsets.values().sum()))
            .collect();
        totals.sort_unstable_by_key(|(track_id, _)| *track_id);
        totals
    }

    pub fn best(&self) -> Option<Alignment> {
        let (track_id, confidence) = self
            .track_totals()
            .into_iter()
            // reversed id makes max_by_key pick the lowest id among equal totals
            .max_by_key(|(track_id, total)| (*total, std::cmp::Reverse(*track_id)))?;
        let (offset, offset_votes) = self.tracks[&track_id]
            .iter()
            .map(|(offset, votes)| (*offset, *votes))
            .max_by_key(|(offset, votes)| (*votes, std::cmp::Reverse(*offset)))?;
        Some(Alignment {
            track_id,
            confidence,
            offset,
            offset_votes,
        })
    }
}

/// Votes the records against the query fingerprints and returns the winner, if any.
pub fn align(query: &[Fingerprint], records: &[FingerprintRecord]) -> Option<Alignment> {
    let query = query_map(query);
    OffsetVotes::tally(&query, records).best()
}

#[cfg(test)]
mod tests {
    use crate::hashing::{Fingerprint, FingerprintHash};

    use super::{Alignment, FingerprintRecord, OffsetVotes, align, query_map};

    fn hash(n: u32) -> FingerprintHash {
        FingerprintHash::new(n, n + 1, 1 + n % 100)
    }

    fn fingerprint(n: u32, anchor_time: u32) -> Fingerprint {
        Fingerprint {
            hash: hash(n),
            anchor_time,
        }
    }

    fn record(n: u32, track_id: i64, anchor_time: u32) -> FingerprintRecord {
        FingerprintRecord {
            hash: hash(n),
            track_id,
            anchor_time,
        }
    }

    #[test]
    fn shifted_query_votes_for_one_offset() {
        let stored = [record(1, 7, 5), record(2, 7, 30), record(3, 7, 60)];
        let query = [fingerprint(1, 0), fingerprint(2, 25)];
        let votes = OffsetVotes::tally(&query_map(&query), &stored);
        assert_eq!(votes.len(), 2);
        assert_eq!(votes.candidates(), 1);
        assert_eq!(votes.count(7, 5), 2);
        assert_eq!(
            votes.best(),
            Some(Alignment {
                track_id: 7,
                confidence: 2,
                offset: 5,
                offset_votes: 2,
            })
        );
    }

    #[test]
    fn consistent_track_beats_collision() {
        let mut stored = vec![record(0, 1, 400)];
        let mut query = vec![fingerprint(0, 3)];
        for n in 1..=20 {
            stored.push(record(n, 2, 100 + n * 3));
            query.push(fingerprint(n, n * 3));
        }
        let alignment = align(&query, &stored).unwrap();
        assert_eq!(alignment.track_id, 2);
        assert_eq!(alignment.confidence, 20);
        assert_eq!(alignment.offset, 100);
    }

    #[test]
    fn spread_votes_still_pick_the_track() {
        // track 1 has many votes scattered over offsets, track 2 a small tight cluster
        let mut stored = Vec::new();
        let mut query = Vec::new();
        for n in 0..10 {
            stored.push(record(n, 1, 50 + n * 7));
            query.push(fingerprint(n, n));
        }
        for n in 10..14 {
            stored.push(record(n, 2, n + 40));
            query.push(fingerprint(n, n));
        }
        let alignment = align(&query, &stored).unwrap();
        assert_eq!(alignment.track_id, 1);
        assert_eq!(alignment.confidence, 10);
        assert_eq!(alignment.offset_votes, 1);
        // all offsets of track 1 are tied, the smallest wins
        assert_eq!(alignment.offset, 50);
    }

    #[test]
    fn ties_go_to_lowest_track_id() {
        let stored = [record(1, 9, 10), record(1, 4, 20), record(1, 6, 30)];
        let query = [fingerprint(1, 0)];
        let alignment = align(&query, &stored).unwrap();
        assert_eq!(alignment.track_id, 4);
        assert_eq!(alignment.offset, 20);
    }

    #[test]
    fn last_anchor_wins_for_repeated_hash() {
        let query = [fingerprint(1, 3), fingerprint(1, 8)];
        let map = query_map(&query);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&hash(1)], 8);
    }

    #[test]
    fn negative_offsets_are_kept() {
        let stored = [record(1, 1, 2), record(2, 1, 4)];
        let query = [fingerprint(1, 12), fingerprint(2, 14)];
        let alignment = align(&query, &stored).unwrap();
        assert_eq!(alignment.offset, -10);
    }

    #[test]
    fn runner_up_wins_after_removal() {
        let stored = [
            record(1, 1, 10),
            record(2, 1, 11),
            record(3, 1, 12),
            record(1, 2, 40),
            record(2, 2, 41),
        ];
        let query = [fingerprint(1, 0), fingerprint(2, 1), fingerprint(3, 2)];
        let mut votes = OffsetVotes::tally(&query_map(&query), &stored);
        assert_eq!(votes.best().unwrap().track_id, 1);
        assert_eq!(votes.remove_track(1), 3);
        assert_eq!(votes.remove_track(1), 0);
        assert_eq!(votes.len(), 2);
        let alignment = votes.best().unwrap();
        assert_eq!(alignment.track_id, 2);
        assert_eq!(alignment.offset, 40);
        votes.remove_track(2);
        assert!(votes.is_empty());
        assert!(votes.best().is_none());
    }

    #[test]
    fn nothing_to_vote_for() {
        assert!(align(&[], &[]).is_none());
        let query = [fingerprint(1, 0)];
        let unrelated = [record(2, 1, 0)];
        let votes = OffsetVotes::tally(&query_map(&query), &unrelated);
        assert!(votes.is_empty());
        assert!(votes.best().is_none());
    }
}
