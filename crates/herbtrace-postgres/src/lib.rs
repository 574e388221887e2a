//! PostgreSQL implementation of the herbtrace ledger store.
//!
//! This crate provides a PostgreSQL implementation of the `LedgerStore`
//! trait from herbtrace.
//!
//! # Features
//!
//! - Append order kept with a `BIGSERIAL` sequence column
//! - Idempotent event writes (`ON CONFLICT (event_id) DO UPDATE`)
//! - Batch summary upserts for partial-write repair
//! - Parent index for the legacy tracking-code fallback
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE batches (
//!     batch_id TEXT PRIMARY KEY,
//!     herb_species TEXT NOT NULL,
//!     creator TEXT NOT NULL,
//!     current_status TEXT NOT NULL,
//!     data JSONB NOT NULL DEFAULT '{}',
//!     is_completed BOOLEAN NOT NULL DEFAULT FALSE,
//!     seq BIGSERIAL,
//!
//!     -- Timestamps
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE events (
//!     event_id TEXT PRIMARY KEY,
//!     event_type TEXT NOT NULL,
//!     batch_id TEXT NOT NULL,
//!     parent_event_id TEXT,
//!     participant TEXT NOT NULL,
//!     organization TEXT NOT NULL,
//!     data JSONB NOT NULL,
//!     integrity_tag TEXT NOT NULL,
//!     external_ref TEXT,
//!     seq BIGSERIAL,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE INDEX idx_events_batch ON events (batch_id, seq);
//! CREATE INDEX idx_events_parent ON events (parent_event_id)
//!     WHERE parent_event_id IS NOT NULL;
//! ```
//!
//! `events.batch_id` deliberately has no foreign key: the event row is
//! written before its batch row.
//!
//! # Usage
//!
//! ```rust,ignore
//! use herbtrace_core::LedgerBuilder;
//! use herbtrace_postgres::PgLedgerStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/herbtrace").await?;
//! let store = PgLedgerStore::new(pool);
//! store.migrate().await?;
//!
//! let ledger = LedgerBuilder::new(store).build();
//! ```

use async_trait::async_trait;
use herbtrace_core::{
    BatchPatch, BatchRecord, EventRecord, EventType, LedgerStore, Stage, StorageError,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS batches (
        batch_id TEXT PRIMARY KEY,
        herb_species TEXT NOT NULL,
        creator TEXT NOT NULL,
        current_status TEXT NOT NULL,
        data JSONB NOT NULL DEFAULT '{}',
        is_completed BOOLEAN NOT NULL DEFAULT FALSE,
        seq BIGSERIAL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        event_id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        batch_id TEXT NOT NULL,
        parent_event_id TEXT,
        participant TEXT NOT NULL,
        organization TEXT NOT NULL,
        data JSONB NOT NULL,
        integrity_tag TEXT NOT NULL,
        external_ref TEXT,
        seq BIGSERIAL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_batch ON events (batch_id, seq)",
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_parent ON events (parent_event_id)
        WHERE parent_event_id IS NOT NULL
    "#,
];

const EVENT_COLUMNS: &str = "event_id, event_type, batch_id, parent_event_id, participant, \
     organization, data, integrity_tag, external_ref, created_at";

const BATCH_COLUMNS: &str =
    "batch_id, herb_species, creator, current_status, data, is_completed, created_at, updated_at";

/// PostgreSQL ledger store implementation.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a new PostgreSQL ledger store.
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    ///
    /// The schema is not created automatically; call [`PgLedgerStore::migrate`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they don't exist.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::info!("ledger schema ready");
        Ok(())
    }

    async fn fetch_events(
        &self,
        filter: &str,
        value: Option<&str>,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events {filter} ORDER BY seq ASC");
        let mut query = sqlx::query(&sql);
        if let Some(value) = value {
            query = query.bind(value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::backend)?;

        rows.iter().map(event_from_row).collect()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    /// Insert a batch row, or overwrite every mutable column if it exists.
    async fn save_batch(&self, record: &BatchRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO batches
                (batch_id, herb_species, creator, current_status, data, is_completed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (batch_id) DO UPDATE
            SET herb_species = EXCLUDED.herb_species,
                creator = EXCLUDED.creator,
                current_status = EXCLUDED.current_status,
                data = EXCLUDED.data,
                is_completed = EXCLUDED.is_completed,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.batch_id)
        .bind(&record.herb_species)
        .bind(&record.creator)
        .bind(record.current_status.as_str())
        .bind(&record.data)
        .bind(record.is_completed)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::backend)?;

        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, StorageError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_id = $1");
        let row = sqlx::query(&sql)
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::backend)?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn get_all_batches(&self) -> Result<Vec<BatchRecord>, StorageError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches ORDER BY seq ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::backend)?;

        rows.iter().map(batch_from_row).collect()
    }

    async fn update_batch(&self, batch_id: &str, patch: &BatchPatch) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET current_status = $1,
                is_completed = $2,
                data = $3,
                updated_at = $4
            WHERE batch_id = $5
            "#,
        )
        .bind(patch.current_status.as_str())
        .bind(patch.is_completed)
        .bind(&patch.data)
        .bind(patch.updated_at)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::message(format!("no batch row for {batch_id}")));
        }
        Ok(())
    }

    /// Insert an event row. Re-saving an existing id replaces it in place
    /// and keeps its sequence position.
    async fn save_event(&self, record: &EventRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO events
                (event_id, event_type, batch_id, parent_event_id, participant,
                 organization, data, integrity_tag, external_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (event_id) DO UPDATE
            SET event_type = EXCLUDED.event_type,
                batch_id = EXCLUDED.batch_id,
                parent_event_id = EXCLUDED.parent_event_id,
                participant = EXCLUDED.participant,
                organization = EXCLUDED.organization,
                data = EXCLUDED.data,
                integrity_tag = EXCLUDED.integrity_tag,
                external_ref = EXCLUDED.external_ref,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&record.event_id)
        .bind(record.event_type.as_str())
        .bind(&record.batch_id)
        .bind(&record.parent_event_id)
        .bind(&record.participant)
        .bind(&record.organization)
        .bind(&record.data)
        .bind(&record.integrity_tag)
        .bind(&record.external_ref)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::backend)?;

        Ok(())
    }

    async fn get_events_by_batch(&self, batch_id: &str) -> Result<Vec<EventRecord>, StorageError> {
        self.fetch_events("WHERE batch_id = $1", Some(batch_id))
            .await
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<EventRecord>, StorageError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::backend)?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn get_events_by_parent(
        &self,
        parent_event_id: &str,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.fetch_events("WHERE parent_event_id = $1", Some(parent_event_id))
            .await
    }

    async fn scan_events(&self) -> Result<Vec<EventRecord>, StorageError> {
        self.fetch_events("", None).await
    }
}

/// Utility functions for ledger maintenance.
impl PgLedgerStore {
    /// Get row counts for the ledger tables.
    pub async fn stats(&self) -> anyhow::Result<LedgerStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM batches) as batches,
                (SELECT COUNT(*) FROM batches WHERE is_completed) as completed,
                (SELECT COUNT(*) FROM events) as events,
                (SELECT COUNT(DISTINCT e.batch_id) FROM events e
                    LEFT JOIN batches b ON b.batch_id = e.batch_id
                    WHERE b.batch_id IS NULL) as orphaned
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            batches: row.get("batches"),
            completed: row.get("completed"),
            events: row.get("events"),
            orphaned: row.get("orphaned"),
        })
    }

    /// Batch ids that have events but no summary row, left behind by a
    /// failed summary write. Feed these to `LedgerService::rebuild_summary`.
    pub async fn orphaned_batches(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT e.batch_id, MIN(e.seq) as first_seq
            FROM events e
            LEFT JOIN batches b ON b.batch_id = e.batch_id
            WHERE b.batch_id IS NULL
            GROUP BY e.batch_id
            ORDER BY first_seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("batch_id")).collect())
    }
}

/// Ledger table statistics.
#[derive(Debug, Clone, Copy)]
pub struct LedgerStats {
    pub batches: i64,
    pub completed: i64,
    pub events: i64,
    /// Batches with events but no summary row.
    pub orphaned: i64,
}

fn batch_from_row(row: &PgRow) -> Result<BatchRecord, StorageError> {
    let batch_id: String = row.try_get("batch_id").map_err(StorageError::backend)?;
    let status: String = row
        .try_get("current_status")
        .map_err(StorageError::backend)?;
    let current_status = Stage::parse(&status).ok_or_else(|| {
        StorageError::Corrupt(format!("batch {batch_id} has unknown status {status:?}"))
    })?;

    Ok(BatchRecord {
        herb_species: row.try_get("herb_species").map_err(StorageError::backend)?,
        creator: row.try_get("creator").map_err(StorageError::backend)?,
        current_status,
        data: row.try_get("data").map_err(StorageError::backend)?,
        is_completed: row.try_get("is_completed").map_err(StorageError::backend)?,
        created_at: row.try_get("created_at").map_err(StorageError::backend)?,
        updated_at: row.try_get("updated_at").map_err(StorageError::backend)?,
        batch_id,
    })
}

fn event_from_row(row: &PgRow) -> Result<EventRecord, StorageError> {
    let event_id: String = row.try_get("event_id").map_err(StorageError::backend)?;
    let tag: String = row.try_get("event_type").map_err(StorageError::backend)?;
    let event_type = EventType::parse(&tag).ok_or_else(|| {
        StorageError::Corrupt(format!("event {event_id} has unknown type {tag:?}"))
    })?;

    Ok(EventRecord {
        event_type,
        batch_id: row.try_get("batch_id").map_err(StorageError::backend)?,
        parent_event_id: row
            .try_get("parent_event_id")
            .map_err(StorageError::backend)?,
        participant: row.try_get("participant").map_err(StorageError::backend)?,
        organization: row.try_get("organization").map_err(StorageError::backend)?,
        data: row.try_get("data").map_err(StorageError::backend)?,
        integrity_tag: row.try_get("integrity_tag").map_err(StorageError::backend)?,
        external_ref: row.try_get("external_ref").map_err(StorageError::backend)?,
        created_at: row.try_get("created_at").map_err(StorageError::backend)?,
        event_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herbtrace_core::{ErrorKind, LedgerBuilder, MemoryStore};
    use herbtrace_testing::fixtures;

    async fn store() -> PgLedgerStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgLedgerStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[test]
    fn test_status_labels_round_trip() {
        for stage in [
            Stage::Collected,
            Stage::QualityTested,
            Stage::Processed,
            Stage::Manufactured,
        ] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        for ty in EventType::ALL {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_full_chain_against_postgres() {
        let ledger = LedgerBuilder::new(store().await).build();

        let founding = ledger.append(fixtures::collection()).await.unwrap();
        let id = founding.batch_id.clone();
        ledger.append(fixtures::passing_test(&id)).await.unwrap();
        ledger.append(fixtures::processing(&id)).await.unwrap();
        let last = ledger.append(fixtures::manufacturing(&id)).await.unwrap();

        let batch = ledger.get_batch(&id).await.unwrap().unwrap();
        assert_eq!(batch.current_stage, Stage::Manufactured);
        assert_eq!(batch.events.len(), 4);
        assert_eq!(batch.latest_event().unwrap().event_id, last.event_id);

        let err = ledger
            .append(fixtures::processing(&id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TerminalBatch);

        let row = ledger.store().get_batch(&id).await.unwrap().unwrap();
        assert!(row.is_completed);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_resave_event_is_idempotent() {
        let store = store().await;
        let ledger = LedgerBuilder::new(MemoryStore::new()).build();
        let event = ledger.append(fixtures::collection()).await.unwrap();
        let record = EventRecord::from_event(&event).unwrap();

        store.save_event(&record).await.unwrap();
        store.save_event(&record).await.unwrap();

        let rows = store.get_events_by_batch(&event.batch_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id, record.event_id);
        assert_eq!(rows[0].data, record.data);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_update_missing_batch_fails() {
        let store = store().await;
        let ledger = LedgerBuilder::new(MemoryStore::new()).build();
        let event = ledger.append(fixtures::collection()).await.unwrap();
        let batch = ledger.get_batch(&event.batch_id).await.unwrap().unwrap();

        let err = store
            .update_batch(&batch.batch_id, &BatchPatch::from_batch(&batch))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend { .. }));
    }
}
