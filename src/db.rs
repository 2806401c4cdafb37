use std::{collections::HashSet, ops::Deref, path::Path, str::FromStr, time::Duration};

use fingerprint::{Fingerprint, FingerprintHash, FingerprintRecord, TrackId};
use sqlx::{
    migrate::{MigrateError, Migrator},
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Acquire, Error, Pool, QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction,
};

use crate::index::{FingerprintIndex, Track, TrackInsert};

fn path_to_url(path: &Path) -> String {
    #[allow(unused_mut)]
    let mut path = path.to_string_lossy().to_string();
    #[cfg(target_os = "windows")]
    {
        let stupid_pattern = r#"\\?"#;
        if path.starts_with(stupid_pattern) {
            path = path.replace(stupid_pattern, "");
        };
        path = path.replace(r#"\"#, "/")
    }
    format!("sqlite://{}", path)
}

/// Rows per multi-row insert. Three bound parameters per row.
const INSERT_BATCH: usize = 3000;
/// Hashes per `IN (...)` lookup.
const LOOKUP_BATCH: usize = 900;

/// All database queries and mutations
pub trait DbActions<'a>: Acquire<'a, Database = Sqlite> + Send
where
    Self: Sized,
{
    fn insert_track(
        self,
        name: &str,
        file_hash: Option<&str>,
    ) -> impl std::future::Future<Output = Result<i64, Error>> + Send {
        async move {
            let mut conn = self.acquire().await?;
            tracing::debug!("Inserting new track: {name}");
            let created_at = time::OffsetDateTime::now_utc().unix_timestamp();
            sqlx::query_scalar(
                "INSERT INTO tracks (name, file_hash, created_at)
            VALUES (?, ?, ?) RETURNING id;",
            )
            .bind(name)
            .bind(file_hash)
            .bind(created_at)
            .fetch_one(&mut *conn)
            .await
        }
    }

    /// Batched insert. Wrap in a transaction to make it atomic.
    fn insert_fingerprints(
        self,
        track_id: TrackId,
        fingerprints: &[Fingerprint],
    ) -> impl std::future::Future<Output = Result<u64, Error>> + Send {
        async move {
            let mut conn = self.acquire().await?;
            let mut inserted = 0;
            for chunk in fingerprints.chunks(INSERT_BATCH) {
                let mut builder: QueryBuilder<Sqlite> =
                    QueryBuilder::new("INSERT INTO fingerprints (hash, track_id, anchor_time) ");
                builder.push_values(chunk, |mut row, fingerprint| {
                    row.push_bind(fingerprint.hash.key() as i64)
                        .push_bind(track_id)
                        .push_bind(fingerprint.anchor_time as i64);
                });
                inserted += builder.build().execute(&mut *conn).await?.rows_affected();
            }
            Ok(inserted)
        }
    }

    fn add_fingerprint_count(
        self,
        track_id: TrackId,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send {
        async move {
            let mut conn = self.acquire().await?;
            let result = sqlx::query(
                "UPDATE tracks SET fingerprint_count = fingerprint_count + ? WHERE id = ?;",
            )
            .bind(amount)
            .bind(track_id)
            .execute(&mut *conn)
            .await?;
            if result.rows_affected() == 0 {
                return Err(Error::RowNotFound);
            }
            Ok(())
        }
    }

    fn get_fingerprints_by_hashes(
        self,
        hashes: &[FingerprintHash],
    ) -> impl std::future::Future<Output = Result<Vec<FingerprintRecord>, Error>> + Send {
        async move {
            let unique: Vec<i64> = hashes
                .iter()
                .map(|h| h.key() as i64)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if unique.is_empty() {
                return Ok(Vec::new());
            }
            let mut conn = self.acquire().await?;
            let mut records = Vec::new();
            for chunk in unique.chunks(LOOKUP_BATCH) {
                let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                    "SELECT hash, track_id, anchor_time FROM fingerprints WHERE hash IN (",
                );
                let mut separated = builder.separated(", ");
                for key in chunk {
                    separated.push_bind(*key);
                }
                separated.push_unseparated(")");
                let rows: Vec<(i64, i64, i64)> =
                    builder.build_query_as().fetch_all(&mut *conn).await?;
                records.extend(rows.into_iter().map(|(hash, track_id, anchor_time)| {
                    FingerprintRecord {
                        hash: FingerprintHash::from_key(hash as u64),
                        track_id,
                        anchor_time: anchor_time as u32,
                    }
                }));
            }
            Ok(records)
        }
    }

    fn get_track(
        self,
        id: TrackId,
    ) -> impl std::future::Future<Output = Result<Option<Track>, Error>> + Send {
        async move {
            let mut conn = self.acquire().await?;
            sqlx::query_as(
                "SELECT id, name, file_hash, fingerprint_count, created_at FROM tracks WHERE id = ?;",
            )
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
        }
    }

    fn get_track_by_file_hash(
        self,
        file_hash: &str,
    ) -> impl std::future::Future<Output = Result<Option<Track>, Error>> + Send {
        async move {
            let mut conn = self.acquire().await?;
            sqlx::query_as(
                "SELECT id, name, file_hash, fingerprint_count, created_at FROM tracks WHERE file_hash = ?;",
            )
            .bind(file_hash)
            .fetch_optional(&mut *conn)
            .await
        }
    }

    fn all_tracks(self) -> impl std::future::Future<Output = Result<Vec<Track>, Error>> + Send {
        async move {
            let mut conn = self.acquire().await?;
            sqlx::query_as(
                "SELECT id, name, file_hash, fingerprint_count, created_at FROM tracks ORDER BY id;",
            )
            .fetch_all(&mut *conn)
            .await
        }
    }

    /// Fingerprints go away with the track through the foreign key cascade
    fn remove_track(
        self,
        id: TrackId,
    ) -> impl std::future::Future<Output = Result<bool, Error>> + Send {
        async move {
            let mut conn = self.acquire().await?;
            tracing::debug!("Removing track {id}");
            let result = sqlx::query("DELETE FROM tracks WHERE id = ?;")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }
}

impl<'a> DbActions<'a> for &'a mut Transaction<'static, Sqlite> {}
impl<'a> DbActions<'a> for &'a Pool<Sqlite> {}
impl<'a> DbActions<'a> for &'a mut SqliteConnection {}

#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Deref for Db {
    type Target = SqlitePool;
    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

static MIGRATOR: Migrator = sqlx::migrate!();

impl Db {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let url = path_to_url(path);
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(30)
            .connect_with(options.clone())
            .await?;
        match MIGRATOR.run(&pool).await {
            Ok(_) => (),
            Err(MigrateError::VersionMismatch(version)) => {
                tracing::error!(
                    "Migration {version} does not match the applied one, doing database reset!"
                );
                pool.close().await;
                tokio::fs::remove_file(path).await?;
                let pool = SqlitePoolOptions::new()
                    .max_connections(30)
                    .connect_with(options)
                    .await?;
                MIGRATOR.run(&pool).await?;
                return Ok(Self { pool });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { pool })
    }

    /// Private database that lives as long as the pool
    pub async fn connect_in_memory() -> Result<Self, anyhow::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl FingerprintIndex for Db {
    async fn register_track(
        &self,
        name: &str,
        file_hash: Option<&str>,
    ) -> Result<TrackInsert, anyhow::Error> {
        match self.pool.insert_track(name, file_hash).await {
            Ok(id) => Ok(TrackInsert::Created(id)),
            Err(Error::Database(e)) if e.is_unique_violation() => {
                let file_hash = file_hash.unwrap_or_default();
                tracing::debug!("Track with file hash {file_hash} already exists");
                self.pool
                    .get_track_by_file_hash(file_hash)
                    .await?
                    .map(TrackInsert::Duplicate)
                    .ok_or_else(|| anyhow::anyhow!("file hash {file_hash} is taken by a removed track"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store_fingerprints(
        &self,
        track_id: TrackId,
        fingerprints: &[Fingerprint],
    ) -> Result<(), anyhow::Error> {
        let mut tx = self.pool.begin().await?;
        let inserted = (&mut tx).insert_fingerprints(track_id, fingerprints).await?;
        (&mut tx).add_fingerprint_count(track_id, inserted as i64)
            .await
            .map_err(|e| match e {
                Error::RowNotFound => anyhow::anyhow!("track {track_id} is not registered"),
                e => e.into(),
            })?;
        tx.commit().await?;
        tracing::trace!("Committed {inserted} fingerprints of track {track_id}");
        Ok(())
    }

    async fn lookup(
        &self,
        hashes: &[FingerprintHash],
    ) -> Result<Vec<FingerprintRecord>, anyhow::Error> {
        Ok(self.pool.get_fingerprints_by_hashes(hashes).await?)
    }

    async fn remove_track(&self, track_id: TrackId) -> Result<bool, anyhow::Error> {
        Ok(DbActions::remove_track(&self.pool, track_id).await?)
    }

    async fn track(&self, track_id: TrackId) -> Result<Option<Track>, anyhow::Error> {
        Ok(self.pool.get_track(track_id).await?)
    }

    async fn tracks(&self) -> Result<Vec<Track>, anyhow::Error> {
        Ok(self.pool.all_tracks().await?)
    }

    async fn track_by_file_hash(&self, file_hash: &str) -> Result<Option<Track>, anyhow::Error> {
        Ok(self.pool.get_track_by_file_hash(file_hash).await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::index::{
        tests::{create, index_contract},
        FingerprintIndex, TrackInsert,
    };

    use super::{Db, DbActions};

    #[tokio::test]
    async fn sqlite_index_contract() {
        let db = Db::connect_in_memory().await.unwrap();
        index_contract(&db).await;
    }

    #[tokio::test]
    async fn lookup_spans_several_batches() {
        use fingerprint::{Fingerprint, FingerprintHash};

        let db = Db::connect_in_memory().await.unwrap();
        let track = create(&db, "long", None).await;
        let fingerprints: Vec<_> = (0..5000u32)
            .map(|i| Fingerprint {
                hash: FingerprintHash::new(i % 2049, i / 2049, 1 + i % 199),
                anchor_time: i,
            })
            .collect();
        db.store_fingerprints(track, &fingerprints).await.unwrap();
        let hashes: Vec<_> = fingerprints.iter().map(|f| f.hash).collect();
        let records = db.lookup(&hashes).await.unwrap();
        assert_eq!(records.len(), 5000);
        assert_eq!(db.track(track).await.unwrap().unwrap().fingerprint_count, 5000);
    }

    #[tokio::test]
    async fn failed_store_leaves_no_rows() {
        use fingerprint::{Fingerprint, FingerprintHash};

        let db = Db::connect_in_memory().await.unwrap();
        let fingerprints = [Fingerprint {
            hash: FingerprintHash::new(1, 2, 3),
            anchor_time: 0,
        }];
        assert!(db.store_fingerprints(42, &fingerprints).await.is_err());
        assert!(db
            .lookup(&[fingerprints[0].hash])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unique_violation_returns_existing_track() {
        let db = Db::connect_in_memory().await.unwrap();
        let first = create(&db, "first", Some("abc")).await;
        let err = (&db.pool).insert_track("second", Some("abc")).await.unwrap_err();
        assert!(err.as_database_error().unwrap().is_unique_violation());
        let TrackInsert::Duplicate(existing) =
            db.register_track("second", Some("abc")).await.unwrap()
        else {
            panic!("expected duplicate");
        };
        assert_eq!(existing.id, first);
        assert_eq!(db.tracks().await.unwrap().len(), 1);
    }
}
