//! SQLite Storage for runtime data
//!
//! 런타임 데이터 저장:
//! - Subscribers: 구독자 (외부 채팅 ID 기준)
//! - Subscriptions: 테마/데이터셋/키워드 구독
//! - Tracked Entities: 엔티티별 마지막 관찰 상태 (fingerprint)
//! - Delivery Records: 알림 전달 증빙 (중복 방지)
//!
//! 설정 데이터는 JSON (storage/json/)에서 관리
//!
//! ## Migration System
//!
//! Database schema is versioned. Migrations run automatically on startup.
//! - Version 1: Initial schema (subscribers, subscriptions, tracked_entities, delivery_records)
//! - Version 2: Daily summary tables (known_datasets, daily_summaries)

use crate::core::types::{
    DeliveryRecord, EntityKind, EntityRef, Fingerprint, Subscriber, Subscription,
    SubscriptionKind, TrackedEntity,
};
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Storage service for persisting runtime data
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Create a new storage instance
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join("vigia.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        Ok(storage)
    }

    /// Create an in-memory storage (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        Ok(storage)
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Subscribers (end users, keyed by external chat id)
            CREATE TABLE IF NOT EXISTS subscribers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id INTEGER NOT NULL UNIQUE,
                username TEXT,
                language TEXT NOT NULL DEFAULT 'es',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Subscriptions (soft-deactivated, never deleted)
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscriber_id INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK(kind IN ('theme', 'dataset', 'keyword')),
                target_id TEXT NOT NULL,
                label TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                FOREIGN KEY (subscriber_id) REFERENCES subscribers(id) ON DELETE CASCADE,
                UNIQUE(subscriber_id, kind, target_id)
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_target
                ON subscriptions(kind, target_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_subscriber
                ON subscriptions(subscriber_id, is_active);

            -- Last-seen state per tracked entity
            CREATE TABLE IF NOT EXISTS tracked_entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL CHECK(kind IN ('theme', 'dataset')),
                external_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                modified TEXT,
                data_processed TEXT,
                metadata_processed TEXT,
                records_count INTEGER NOT NULL DEFAULT 0,
                member_ids TEXT NOT NULL DEFAULT '[]',
                last_checked_at TEXT NOT NULL,
                UNIQUE(kind, external_id)
            );

            -- Proof of delivery per (subscriber, entity, fingerprint)
            CREATE TABLE IF NOT EXISTS delivery_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscriber_id INTEGER NOT NULL,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                FOREIGN KEY (subscriber_id) REFERENCES subscribers(id) ON DELETE CASCADE,
                UNIQUE(subscriber_id, entity_kind, entity_id, fingerprint)
            );

            CREATE INDEX IF NOT EXISTS idx_delivery_entity
                ON delivery_records(entity_kind, entity_id, fingerprint);

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run all pending migrations
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        // Run migrations sequentially
        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => self.migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            // Record migration
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// Migration to version 2: Daily summary tables
    fn migrate_v2(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Every dataset id ever observed, for new-dataset discovery
            CREATE TABLE IF NOT EXISTS known_datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id TEXT NOT NULL UNIQUE,
                title TEXT,
                publisher TEXT,
                first_seen TEXT NOT NULL
            );

            -- One digest per calendar day
            CREATE TABLE IF NOT EXISTS daily_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL UNIQUE,
                new_count INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to apply migration v2: {}", e)))?;

        Ok(())
    }

    // ========================================================================
    // Subscriber Operations
    // ========================================================================

    /// Get or create a subscriber by external chat id
    pub fn get_or_create_subscriber(
        &self,
        external_id: i64,
        username: Option<&str>,
        language: Option<&str>,
    ) -> Result<Subscriber> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO subscribers (external_id, username, language, created_at, updated_at)
            VALUES (?1, ?2, COALESCE(?3, 'es'), ?4, ?4)
            ON CONFLICT(external_id) DO UPDATE SET
                username = COALESCE(?2, username),
                language = COALESCE(?3, language),
                updated_at = ?4
            "#,
            params![external_id, username, language, now],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert subscriber: {}", e)))?;

        conn.query_row(
            r#"
            SELECT id, external_id, username, language, is_active, created_at, updated_at
            FROM subscribers WHERE external_id = ?1
            "#,
            params![external_id],
            map_subscriber_row,
        )
        .map_err(|e| Error::Storage(format!("Failed to load subscriber: {}", e)))
    }

    /// Get a subscriber by internal id
    pub fn get_subscriber(&self, id: i64) -> Result<Option<Subscriber>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        conn.query_row(
            r#"
            SELECT id, external_id, username, language, is_active, created_at, updated_at
            FROM subscribers WHERE id = ?1
            "#,
            params![id],
            map_subscriber_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get subscriber: {}", e)))
    }

    /// Deactivate a subscriber that the channel permanently rejects.
    /// Returns true if a row was deactivated.
    pub fn deactivate_subscriber(&self, id: i64) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        let changed = conn
            .execute(
                "UPDATE subscribers SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )
            .map_err(|e| Error::Storage(format!("Failed to deactivate subscriber: {}", e)))?;

        Ok(changed > 0)
    }

    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Add a subscription. Returns false if it already existed (reactivating
    /// a soft-deactivated row counts as already existing).
    pub fn add_subscription(
        &self,
        subscriber_id: i64,
        kind: SubscriptionKind,
        target_id: &str,
        label: Option<&str>,
    ) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        let existing: Option<(i64, bool)> = conn
            .query_row(
                r#"
                SELECT id, is_active FROM subscriptions
                WHERE subscriber_id = ?1 AND kind = ?2 AND target_id = ?3
                "#,
                params![subscriber_id, kind.as_str(), target_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to check subscription: {}", e)))?;

        if let Some((id, is_active)) = existing {
            if !is_active {
                conn.execute(
                    "UPDATE subscriptions SET is_active = 1 WHERE id = ?1",
                    params![id],
                )
                .map_err(|e| Error::Storage(format!("Failed to reactivate subscription: {}", e)))?;
            }
            return Ok(false);
        }

        conn.execute(
            r#"
            INSERT INTO subscriptions (subscriber_id, kind, target_id, label, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![subscriber_id, kind.as_str(), target_id, label, now],
        )
        .map_err(|e| Error::Storage(format!("Failed to add subscription: {}", e)))?;

        Ok(true)
    }

    /// Soft-deactivate a subscription. Returns true if a row was deactivated.
    pub fn deactivate_subscription(&self, subscriber_id: i64, subscription_id: i64) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        let changed = conn
            .execute(
                "UPDATE subscriptions SET is_active = 0 WHERE id = ?1 AND subscriber_id = ?2",
                params![subscription_id, subscriber_id],
            )
            .map_err(|e| Error::Storage(format!("Failed to deactivate subscription: {}", e)))?;

        Ok(changed > 0)
    }

    /// Get all active subscriptions for one subscriber
    pub fn list_subscriber_subscriptions(&self, subscriber_id: i64) -> Result<Vec<Subscription>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, subscriber_id, kind, target_id, label, is_active, created_at
                FROM subscriptions
                WHERE subscriber_id = ?1 AND is_active = 1
                ORDER BY created_at ASC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let subscriptions = stmt
            .query_map(params![subscriber_id], map_subscription_row)
            .map_err(|e| Error::Storage(format!("Failed to query subscriptions: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(subscriptions)
    }

    /// List active subscriptions, optionally filtered by kind and target
    pub fn list_active_subscriptions(
        &self,
        kind: Option<SubscriptionKind>,
        target_id: Option<&str>,
    ) -> Result<Vec<Subscription>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, subscriber_id, kind, target_id, label, is_active, created_at
                FROM subscriptions
                WHERE is_active = 1
                  AND (?1 IS NULL OR kind = ?1)
                  AND (?2 IS NULL OR target_id = ?2)
                ORDER BY id ASC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let subscriptions = stmt
            .query_map(
                params![kind.map(|k| k.as_str()), target_id],
                map_subscription_row,
            )
            .map_err(|e| Error::Storage(format!("Failed to query subscriptions: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(subscriptions)
    }

    // ========================================================================
    // Tracked Entity Operations
    // ========================================================================

    /// Load the last-seen state for an entity
    pub fn load_tracked_entity(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<TrackedEntity>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        conn.query_row(
            r#"
            SELECT id, kind, external_id, fingerprint, modified, data_processed,
                   metadata_processed, records_count, member_ids, last_checked_at
            FROM tracked_entities WHERE kind = ?1 AND external_id = ?2
            "#,
            params![kind.as_str(), external_id],
            map_tracked_entity_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to load tracked entity: {}", e)))
    }

    /// Commit one entity's observation atomically.
    ///
    /// The fingerprint advance and the cycle's delivery records for this
    /// entity land in a single transaction: either both are durable or
    /// neither is, so the next cycle re-detects an uncommitted change.
    pub fn commit_entity_observation(&self, observation: &EntityObservation) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        let member_ids = serde_json::to_string(&observation.member_ids)
            .map_err(|e| Error::Storage(format!("Failed to serialize member ids: {}", e)))?;

        tx.execute(
            r#"
            INSERT INTO tracked_entities
                (kind, external_id, fingerprint, modified, data_processed,
                 metadata_processed, records_count, member_ids, last_checked_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(kind, external_id) DO UPDATE SET
                fingerprint = ?3,
                modified = ?4,
                data_processed = ?5,
                metadata_processed = ?6,
                records_count = ?7,
                member_ids = ?8,
                last_checked_at = ?9
            "#,
            params![
                observation.entity.kind.as_str(),
                observation.entity.id,
                observation.fingerprint.as_str(),
                observation.modified,
                observation.data_processed,
                observation.metadata_processed,
                observation.records_count,
                member_ids,
                now,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert tracked entity: {}", e)))?;

        for subscriber_id in &observation.delivered_to {
            // UNIQUE constraint makes the write idempotent under retries
            tx.execute(
                r#"
                INSERT OR IGNORE INTO delivery_records
                    (subscriber_id, entity_kind, entity_id, fingerprint, sent_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    subscriber_id,
                    observation.entity.kind.as_str(),
                    observation.entity.id,
                    observation.fingerprint.as_str(),
                    now,
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to record delivery: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit observation: {}", e)))?;

        Ok(())
    }

    // ========================================================================
    // Delivery Record Operations
    // ========================================================================

    /// Check whether a delivery was already recorded for this exact change
    pub fn delivery_exists(
        &self,
        subscriber_id: i64,
        entity: &EntityRef,
        fingerprint: &Fingerprint,
    ) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        let count: i64 = conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM delivery_records
                WHERE subscriber_id = ?1 AND entity_kind = ?2
                  AND entity_id = ?3 AND fingerprint = ?4
                "#,
                params![
                    subscriber_id,
                    entity.kind.as_str(),
                    entity.id,
                    fingerprint.as_str()
                ],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to check delivery: {}", e)))?;

        Ok(count > 0)
    }

    /// Record a single delivery outside a cycle commit (bot-layer resends)
    pub fn record_delivery(
        &self,
        subscriber_id: i64,
        entity: &EntityRef,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT OR IGNORE INTO delivery_records
                (subscriber_id, entity_kind, entity_id, fingerprint, sent_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                subscriber_id,
                entity.kind.as_str(),
                entity.id,
                fingerprint.as_str(),
                now
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to record delivery: {}", e)))?;

        Ok(())
    }

    /// Get delivery records for an entity (diagnostics)
    pub fn get_deliveries_for_entity(&self, entity: &EntityRef) -> Result<Vec<DeliveryRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, subscriber_id, entity_kind, entity_id, fingerprint, sent_at
                FROM delivery_records
                WHERE entity_kind = ?1 AND entity_id = ?2
                ORDER BY sent_at DESC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map(params![entity.kind.as_str(), entity.id], |row| {
                let kind: String = row.get(2)?;
                Ok(DeliveryRecord {
                    id: row.get(0)?,
                    subscriber_id: row.get(1)?,
                    entity: EntityRef {
                        kind: EntityKind::parse(&kind).unwrap_or(EntityKind::Dataset),
                        id: row.get(3)?,
                    },
                    fingerprint: Fingerprint::new(row.get::<_, String>(4)?),
                    sent_at: row.get(5)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Failed to query deliveries: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    // ========================================================================
    // Daily Summary Operations
    // ========================================================================

    /// All dataset ids ever observed
    pub fn list_known_dataset_ids(&self) -> Result<std::collections::HashSet<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        let mut stmt = conn
            .prepare("SELECT dataset_id FROM known_datasets")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Storage(format!("Failed to query known datasets: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(ids)
    }

    /// Persist one day's discovery result atomically
    pub fn save_daily_summary(&self, summary: &DailySummaryRecord) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            r#"
            INSERT INTO daily_summaries (date, new_count, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![summary.date, summary.new_count, summary.payload, now],
        )
        .map_err(|e| Error::Storage(format!("Failed to save daily summary: {}", e)))?;

        for dataset in &summary.new_datasets {
            tx.execute(
                r#"
                INSERT OR IGNORE INTO known_datasets (dataset_id, title, publisher, first_seen)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![dataset.dataset_id, dataset.title, dataset.publisher, now],
            )
            .map_err(|e| Error::Storage(format!("Failed to record known dataset: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit daily summary: {}", e)))?;

        Ok(())
    }

    /// Get the summary for a specific day, if one was created
    pub fn get_daily_summary(&self, date: &str) -> Result<Option<DailySummaryRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        conn.query_row(
            "SELECT date, new_count, payload FROM daily_summaries WHERE date = ?1",
            params![date],
            |row| {
                Ok(DailySummaryRecord {
                    date: row.get(0)?,
                    new_count: row.get(1)?,
                    payload: row.get(2)?,
                    new_datasets: Vec::new(),
                })
            },
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get daily summary: {}", e)))
    }
}

// ============================================================================
// Row Mappers
// ============================================================================

fn map_subscriber_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscriber> {
    Ok(Subscriber {
        id: row.get(0)?,
        external_id: row.get(1)?,
        username: row.get(2)?,
        language: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_subscription_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    let kind: String = row.get(2)?;
    Ok(Subscription {
        id: row.get(0)?,
        subscriber_id: row.get(1)?,
        kind: SubscriptionKind::parse(&kind).unwrap_or(SubscriptionKind::Dataset),
        target_id: row.get(3)?,
        label: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_tracked_entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedEntity> {
    let kind: String = row.get(1)?;
    let member_ids: String = row.get(8)?;
    Ok(TrackedEntity {
        id: row.get(0)?,
        kind: EntityKind::parse(&kind).unwrap_or(EntityKind::Dataset),
        external_id: row.get(2)?,
        fingerprint: Fingerprint::new(row.get::<_, String>(3)?),
        modified: row.get(4)?,
        data_processed: row.get(5)?,
        metadata_processed: row.get(6)?,
        records_count: row.get(7)?,
        member_ids: serde_json::from_str(&member_ids).unwrap_or_default(),
        last_checked_at: row.get(9)?,
    })
}

// ============================================================================
// Record Types
// ============================================================================

/// One entity's end-of-cycle observation, committed atomically
#[derive(Debug, Clone)]
pub struct EntityObservation {
    pub entity: EntityRef,
    pub fingerprint: Fingerprint,
    pub modified: Option<String>,
    pub data_processed: Option<String>,
    pub metadata_processed: Option<String>,
    pub records_count: i64,
    pub member_ids: Vec<String>,
    /// Subscribers whose sends were confirmed this cycle
    pub delivered_to: Vec<i64>,
}

/// A newly discovered dataset (daily summary)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownDatasetRecord {
    pub dataset_id: String,
    pub title: Option<String>,
    pub publisher: Option<String>,
}

/// Daily summary record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummaryRecord {
    /// Calendar day (YYYY-MM-DD)
    pub date: String,
    pub new_count: i64,
    /// JSON list of the new datasets, for rendering
    pub payload: String,
    #[serde(default)]
    pub new_datasets: Vec<KnownDatasetRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Storage {
        Storage::in_memory().expect("Failed to create storage")
    }

    #[test]
    fn test_schema_version() {
        let storage = storage();
        assert_eq!(storage.get_schema_version().expect("version"), 2);
    }

    #[test]
    fn test_subscriber_upsert() {
        let storage = storage();

        let first = storage
            .get_or_create_subscriber(42, Some("maria"), None)
            .expect("create");
        let second = storage
            .get_or_create_subscriber(42, None, Some("es"))
            .expect("get");

        assert_eq!(first.id, second.id);
        assert_eq!(second.username.as_deref(), Some("maria"));
    }

    #[test]
    fn test_deactivate_subscriber() {
        let storage = storage();
        let user = storage.get_or_create_subscriber(5, None, None).expect("u");
        assert!(user.is_active);

        assert!(storage.deactivate_subscriber(user.id).expect("deactivate"));
        let reloaded = storage
            .get_subscriber(user.id)
            .expect("get")
            .expect("exists");
        assert!(!reloaded.is_active);

        assert!(!storage.deactivate_subscriber(9999).expect("missing"));
    }

    #[test]
    fn test_subscription_lifecycle() {
        let storage = storage();
        let user = storage
            .get_or_create_subscriber(1, None, None)
            .expect("subscriber");

        assert!(storage
            .add_subscription(user.id, SubscriptionKind::Theme, "salud", Some("Salud"))
            .expect("add"));
        // Duplicate add is a no-op
        assert!(!storage
            .add_subscription(user.id, SubscriptionKind::Theme, "salud", None)
            .expect("re-add"));

        let subs = storage
            .list_subscriber_subscriptions(user.id)
            .expect("list");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].kind, SubscriptionKind::Theme);

        assert!(storage
            .deactivate_subscription(user.id, subs[0].id)
            .expect("deactivate"));
        assert!(storage
            .list_subscriber_subscriptions(user.id)
            .expect("list")
            .is_empty());

        // Re-adding reactivates the soft-deactivated row
        assert!(!storage
            .add_subscription(user.id, SubscriptionKind::Theme, "salud", None)
            .expect("reactivate"));
        assert_eq!(
            storage
                .list_subscriber_subscriptions(user.id)
                .expect("list")
                .len(),
            1
        );
    }

    #[test]
    fn test_list_active_subscriptions_filters() {
        let storage = storage();
        let a = storage.get_or_create_subscriber(1, None, None).expect("a");
        let b = storage.get_or_create_subscriber(2, None, None).expect("b");

        storage
            .add_subscription(a.id, SubscriptionKind::Theme, "salud", None)
            .expect("add");
        storage
            .add_subscription(b.id, SubscriptionKind::Dataset, "calidad-aire", None)
            .expect("add");

        let themes = storage
            .list_active_subscriptions(Some(SubscriptionKind::Theme), None)
            .expect("themes");
        assert_eq!(themes.len(), 1);
        assert_eq!(themes[0].subscriber_id, a.id);

        let direct = storage
            .list_active_subscriptions(Some(SubscriptionKind::Dataset), Some("calidad-aire"))
            .expect("direct");
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].subscriber_id, b.id);

        let all = storage.list_active_subscriptions(None, None).expect("all");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_commit_entity_observation_atomic() {
        let storage = storage();
        let user = storage.get_or_create_subscriber(7, None, None).expect("u");

        let entity = EntityRef::dataset("padron-municipal");
        let fp = Fingerprint::new("f2");

        let observation = EntityObservation {
            entity: entity.clone(),
            fingerprint: fp.clone(),
            modified: Some("2025-08-01".to_string()),
            data_processed: None,
            metadata_processed: None,
            records_count: 120,
            member_ids: vec![],
            delivered_to: vec![user.id],
        };
        storage
            .commit_entity_observation(&observation)
            .expect("commit");

        let tracked = storage
            .load_tracked_entity(EntityKind::Dataset, "padron-municipal")
            .expect("load")
            .expect("exists");
        assert_eq!(tracked.fingerprint, fp);
        assert_eq!(tracked.records_count, 120);

        assert!(storage
            .delivery_exists(user.id, &entity, &fp)
            .expect("exists"));
        assert!(!storage
            .delivery_exists(user.id, &entity, &Fingerprint::new("f3"))
            .expect("other"));

        // Committing the same observation again is idempotent
        storage
            .commit_entity_observation(&observation)
            .expect("recommit");
        assert_eq!(
            storage
                .get_deliveries_for_entity(&entity)
                .expect("deliveries")
                .len(),
            1
        );
    }

    #[test]
    fn test_failed_commit_leaves_fingerprint_in_place() {
        let storage = storage();
        let user = storage.get_or_create_subscriber(8, None, None).expect("u");

        let entity = EntityRef::dataset("calidad-aire");
        let baseline = EntityObservation {
            entity: entity.clone(),
            fingerprint: Fingerprint::new("f1"),
            modified: Some("2025-08-01".to_string()),
            data_processed: None,
            metadata_processed: None,
            records_count: 10,
            member_ids: vec![],
            delivered_to: vec![],
        };
        storage.commit_entity_observation(&baseline).expect("baseline");

        // Break the delivery table so the next commit fails mid-transaction
        storage
            .conn
            .lock()
            .expect("lock")
            .execute_batch("ALTER TABLE delivery_records RENAME TO delivery_records_broken")
            .expect("break");

        let advanced = EntityObservation {
            fingerprint: Fingerprint::new("f2"),
            modified: Some("2025-08-20".to_string()),
            delivered_to: vec![user.id],
            ..baseline.clone()
        };
        assert!(storage.commit_entity_observation(&advanced).is_err());

        // The whole transaction rolled back: the tracked row still holds f1
        let tracked = storage
            .load_tracked_entity(EntityKind::Dataset, "calidad-aire")
            .expect("load")
            .expect("exists");
        assert_eq!(tracked.fingerprint, Fingerprint::new("f1"));
        assert_eq!(tracked.modified.as_deref(), Some("2025-08-01"));

        // Storage recovers: the retry commit advances and dedupes normally
        storage
            .conn
            .lock()
            .expect("lock")
            .execute_batch("ALTER TABLE delivery_records_broken RENAME TO delivery_records")
            .expect("restore");
        storage.commit_entity_observation(&advanced).expect("retry");

        let tracked = storage
            .load_tracked_entity(EntityKind::Dataset, "calidad-aire")
            .expect("load")
            .expect("exists");
        assert_eq!(tracked.fingerprint, Fingerprint::new("f2"));
        assert!(storage
            .delivery_exists(user.id, &entity, &Fingerprint::new("f2"))
            .expect("exists"));
    }

    #[test]
    fn test_theme_member_ids_roundtrip() {
        let storage = storage();

        let observation = EntityObservation {
            entity: EntityRef::theme("salud"),
            fingerprint: Fingerprint::new("t1"),
            modified: None,
            data_processed: None,
            metadata_processed: None,
            records_count: 0,
            member_ids: vec!["a".to_string(), "b".to_string()],
            delivered_to: vec![],
        };
        storage
            .commit_entity_observation(&observation)
            .expect("commit");

        let tracked = storage
            .load_tracked_entity(EntityKind::Theme, "salud")
            .expect("load")
            .expect("exists");
        assert_eq!(tracked.member_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_daily_summary_roundtrip() {
        let storage = storage();

        let summary = DailySummaryRecord {
            date: "2025-08-27".to_string(),
            new_count: 1,
            payload: "[]".to_string(),
            new_datasets: vec![KnownDatasetRecord {
                dataset_id: "nuevo-dataset".to_string(),
                title: Some("Nuevo".to_string()),
                publisher: None,
            }],
        };
        storage.save_daily_summary(&summary).expect("save");

        assert!(storage
            .get_daily_summary("2025-08-27")
            .expect("get")
            .is_some());
        assert!(storage
            .list_known_dataset_ids()
            .expect("known")
            .contains("nuevo-dataset"));
    }
}
