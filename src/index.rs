use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Debug,
    sync::RwLock,
};

use fingerprint::{Fingerprint, FingerprintHash, FingerprintRecord, TrackId};
use serde::Serialize;

/// Registered recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Sha256 of the registered file
    pub file_hash: Option<String>,
    pub fingerprint_count: i64,
    /// Unix timestamp
    pub created_at: i64,
}

/// Outcome of inserting a track row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackInsert {
    Created(TrackId),
    /// Another track already carries the same file hash
    Duplicate(Track),
}

/// Hash keyed store of registered fingerprints.
///
/// Implementations must make `store_fingerprints` all-or-nothing so a lookup never observes
/// half of a track, and must not hold locks across await points.
#[async_trait::async_trait]
pub trait FingerprintIndex: Debug + Send + Sync {
    /// File hashes are unique across tracks, tracks without a hash never collide.
    async fn register_track(
        &self,
        name: &str,
        file_hash: Option<&str>,
    ) -> Result<TrackInsert, anyhow::Error>;

    async fn store_fingerprints(
        &self,
        track_id: TrackId,
        fingerprints: &[Fingerprint],
    ) -> Result<(), anyhow::Error>;

    /// Every stored record whose hash is in `hashes`, across all tracks.
    async fn lookup(
        &self,
        hashes: &[FingerprintHash],
    ) -> Result<Vec<FingerprintRecord>, anyhow::Error>;

    /// Removes the track and all of its fingerprints. Returns false for unknown tracks.
    async fn remove_track(&self, track_id: TrackId) -> Result<bool, anyhow::Error>;

    async fn track(&self, track_id: TrackId) -> Result<Option<Track>, anyhow::Error>;

    async fn tracks(&self) -> Result<Vec<Track>, anyhow::Error>;

    async fn track_by_file_hash(&self, file_hash: &str) -> Result<Option<Track>, anyhow::Error>;
}

#[derive(Debug, Default)]
struct MemoryStore {
    last_id: TrackId,
    tracks: BTreeMap<TrackId, Track>,
    fingerprints: HashMap<FingerprintHash, Vec<(TrackId, u32)>>,
}

/// In-process index. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    store: RwLock<MemoryStore>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("memory index lock is poisoned")
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FingerprintIndex for MemoryIndex {
    async fn register_track(
        &self,
        name: &str,
        file_hash: Option<&str>,
    ) -> Result<TrackInsert, anyhow::Error> {
        let mut store = self.store.write().map_err(poisoned)?;
        if let Some(hash) = file_hash {
            if let Some(existing) = store
                .tracks
                .values()
                .find(|t| t.file_hash.as_deref() == Some(hash))
            {
                return Ok(TrackInsert::Duplicate(existing.clone()));
            }
        }
        store.last_id += 1;
        let id = store.last_id;
        store.tracks.insert(
            id,
            Track {
                id,
                name: name.to_string(),
                file_hash: file_hash.map(ToString::to_string),
                fingerprint_count: 0,
                created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
            },
        );
        Ok(TrackInsert::Created(id))
    }

    async fn store_fingerprints(
        &self,
        track_id: TrackId,
        fingerprints: &[Fingerprint],
    ) -> Result<(), anyhow::Error> {
        let mut store = self.store.write().map_err(poisoned)?;
        let Some(track) = store.tracks.get_mut(&track_id) else {
            return Err(anyhow::anyhow!("track {track_id} is not registered"));
        };
        track.fingerprint_count += fingerprints.len() as i64;
        for fingerprint in fingerprints {
            store
                .fingerprints
                .entry(fingerprint.hash)
                .or_default()
                .push((track_id, fingerprint.anchor_time));
        }
        Ok(())
    }

    async fn lookup(
        &self,
        hashes: &[FingerprintHash],
    ) -> Result<Vec<FingerprintRecord>, anyhow::Error> {
        let store = self.store.read().map_err(poisoned)?;
        let unique: HashSet<_> = hashes.iter().collect();
        let mut records = Vec::new();
        for hash in unique {
            let Some(entries) = store.fingerprints.get(hash) else {
                continue;
            };
            records.extend(entries.iter().map(|(track_id, anchor_time)| FingerprintRecord {
                hash: *hash,
                track_id: *track_id,
                anchor_time: *anchor_time,
            }));
        }
        Ok(records)
    }

    async fn remove_track(&self, track_id: TrackId) -> Result<bool, anyhow::Error> {
        let mut store = self.store.write().map_err(poisoned)?;
        if store.tracks.remove(&track_id).is_none() {
            return Ok(false);
        }
        store.fingerprints.retain(|_, entries| {
            entries.retain(|(id, _)| *id != track_id);
            !entries.is_empty()
        });
        Ok(true)
    }

    async fn track(&self, track_id: TrackId) -> Result<Option<Track>, anyhow::Error> {
        let store = self.store.read().map_err(poisoned)?;
        Ok(store.tracks.get(&track_id).cloned())
    }

    async fn tracks(&self) -> Result<Vec<Track>, anyhow::Error> {
        let store = self.store.read().map_err(poisoned)?;
        Ok(store.tracks.values().cloned().collect())
    }

    async fn track_by_file_hash(&self, file_hash: &str) -> Result<Option<Track>, anyhow::Error> {
        let store = self.store.read().map_err(poisoned)?;
        Ok(store
            .tracks
            .values()
            .find(|t| t.file_hash.as_deref() == Some(file_hash))
            .cloned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use fingerprint::{Fingerprint, FingerprintHash, TrackId};

    use super::{FingerprintIndex, MemoryIndex, TrackInsert};

    pub fn fingerprint(anchor_bin: u32, delta: u32, anchor_time: u32) -> Fingerprint {
        Fingerprint {
            hash: FingerprintHash::new(anchor_bin, anchor_bin + 3, delta),
            anchor_time,
        }
    }

    pub async fn create(
        index: &impl FingerprintIndex,
        name: &str,
        file_hash: Option<&str>,
    ) -> TrackId {
        match index.register_track(name, file_hash).await.unwrap() {
            TrackInsert::Created(id) => id,
            TrackInsert::Duplicate(track) => panic!("{name} collided with track {}", track.id),
        }
    }

    /// Contract shared by every index implementation
    pub async fn index_contract(index: &impl FingerprintIndex) {
        assert!(index.lookup(&[]).await.unwrap().is_empty());

        let first = create(index, "first", Some("abc")).await;
        let second = create(index, "second", None).await;
        let third = create(index, "third", None).await;
        assert_ne!(first, second);
        assert_ne!(second, third);

        let TrackInsert::Duplicate(existing) =
            index.register_track("copy", Some("abc")).await.unwrap()
        else {
            panic!("same file hash registered twice");
        };
        assert_eq!(existing.id, first);
        assert_eq!(existing.name, "first");

        index
            .store_fingerprints(first, &[fingerprint(10, 4, 5), fingerprint(20, 9, 30)])
            .await
            .unwrap();
        index
            .store_fingerprints(second, &[fingerprint(10, 4, 70), fingerprint(30, 1, 2)])
            .await
            .unwrap();

        let shared = fingerprint(10, 4, 0).hash;
        let mut records = index.lookup(&[shared, shared]).await.unwrap();
        records.sort_by_key(|r| r.track_id);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].track_id, first);
        assert_eq!(records[0].anchor_time, 5);
        assert_eq!(records[1].track_id, second);
        assert_eq!(records[1].anchor_time, 70);
        assert!(records.iter().all(|r| r.hash == shared));

        let unknown = FingerprintHash::new(999, 1, 1);
        assert!(index.lookup(&[unknown]).await.unwrap().is_empty());

        let track = index.track(first).await.unwrap().unwrap();
        assert_eq!(track.name, "first");
        assert_eq!(track.fingerprint_count, 2);
        assert_eq!(
            index.track_by_file_hash("abc").await.unwrap().map(|t| t.id),
            Some(first)
        );
        assert!(index.track_by_file_hash("nope").await.unwrap().is_none());
        assert_eq!(index.tracks().await.unwrap().len(), 3);

        assert!(index.remove_track(first).await.unwrap());
        assert!(!index.remove_track(first).await.unwrap());
        let records = index.lookup(&[shared]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].track_id, second);
        assert!(index.track(first).await.unwrap().is_none());

        assert!(index.store_fingerprints(first, &[fingerprint(1, 1, 1)]).await.is_err());

        // hash is free again once its track is gone
        let reused = create(index, "reused", Some("abc")).await;
        assert_ne!(reused, first);
    }

    #[tokio::test]
    async fn memory_index_contract() {
        index_contract(&MemoryIndex::new()).await;
    }
}
