//! SQLite store for outages, subscribers and sent notifications.
//!
//! Outages are an append-only log keyed by fingerprint. Notification rows are
//! unique per (user, outage) and are the at-most-once delivery guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kouran_core::{KouranError, Outage, OutageStore, Recipient, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Language given to users whose client language is neither English nor French.
pub const DEFAULT_USER_LANGUAGE: &str = "fr";

/// An outage row with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOutage {
    pub outage: Outage,
    pub first_seen: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn storage_err(e: impl std::fmt::Display) -> KouranError {
    KouranError::Storage(e.to_string())
}

/// Read an RFC 3339 column; a corrupt value fails the whole row.
fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::info!("🗄️ Outage store opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| storage_err(format!("connection lock poisoned: {e}")))
    }

    /// Create tables if they don't exist.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id INTEGER NOT NULL UNIQUE,
                username TEXT,
                language TEXT NOT NULL DEFAULT 'fr',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS districts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS localities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                district_id INTEGER NOT NULL REFERENCES districts(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                UNIQUE (name, district_id)
            );
            CREATE INDEX IF NOT EXISTS idx_localities_name ON localities(name);

            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
                locality_id INTEGER NOT NULL REFERENCES localities(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, locality_id)
            );

            -- Append-only log of observed outages, keyed by fingerprint
            CREATE TABLE IF NOT EXISTS outages (
                id TEXT PRIMARY KEY,
                locality TEXT NOT NULL,
                district TEXT NOT NULL,
                streets TEXT NOT NULL DEFAULT '',
                date_description TEXT NOT NULL DEFAULT '',
                from_time TEXT NOT NULL,
                to_time TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_checked TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outages_locality ON outages(locality);

            CREATE TABLE IF NOT EXISTS notifications_sent (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
                outage_id TEXT NOT NULL REFERENCES outages(id) ON DELETE CASCADE,
                sent_at TEXT NOT NULL,
                UNIQUE (user_id, outage_id)
            );
         ",
            )
            .map_err(|e| storage_err(format!("Migration: {e}")))
    }

    // ─── Localities ───────────────────────────────────────────

    /// Load `{district: [locality, ...]}` once. Returns the number of localities
    /// inserted, or 0 when districts were already present.
    pub fn seed_localities(&self, data: &BTreeMap<String, Vec<String>>) -> Result<usize> {
        let mut conn = self.conn()?;
        let existing: i64 = conn
            .query_row("SELECT COUNT(*) FROM districts", [], |r| r.get(0))
            .map_err(storage_err)?;
        if existing > 0 {
            tracing::info!("Districts and localities already initialized");
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction().map_err(storage_err)?;
        let mut inserted = 0;
        for (district, localities) in data {
            tx.execute(
                "INSERT INTO districts (name, created_at) VALUES (?1, ?2)",
                rusqlite::params![district, now],
            )
            .map_err(storage_err)?;
            let district_id = tx.last_insert_rowid();
            for locality in localities {
                inserted += tx
                    .execute(
                        "INSERT OR IGNORE INTO localities (name, district_id, created_at) VALUES (?1, ?2, ?3)",
                        rusqlite::params![locality, district_id, now],
                    )
                    .map_err(storage_err)?;
            }
        }
        tx.commit().map_err(storage_err)?;
        tracing::info!("📍 Initialized {} districts and {inserted} localities", data.len());
        Ok(inserted)
    }

    pub fn locality_id(&self, district: &str, locality: &str) -> Result<Option<i64>> {
        self.conn()?
            .query_row(
                "SELECT l.id FROM localities l JOIN districts d ON d.id = l.district_id
                 WHERE d.name = ?1 AND l.name = ?2",
                rusqlite::params![district, locality],
                |r| r.get(0),
            )
            .optional()
            .map_err(storage_err)
    }

    // ─── Subscribers ──────────────────────────────────────────

    /// Create the user if unknown, otherwise refresh the username.
    /// New users get English or French from their client language, French otherwise.
    pub fn upsert_user(&self, chat_id: i64, username: Option<&str>, language_code: Option<&str>) -> Result<()> {
        let language = language_code
            .map(|c| c.to_lowercase())
            .filter(|c| c.starts_with("en") || c.starts_with("fr"))
            .map(|c| c[..2].to_string())
            .unwrap_or_else(|| DEFAULT_USER_LANGUAGE.to_string());
        let now = Utc::now().to_rfc3339();
        self.conn()?
            .execute(
                "INSERT INTO users (telegram_id, username, language, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 ON CONFLICT(telegram_id) DO UPDATE SET username = excluded.username, updated_at = excluded.updated_at",
                rusqlite::params![chat_id, username, language, now],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn set_language(&self, chat_id: i64, language: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE users SET language = ?2, updated_at = ?3 WHERE telegram_id = ?1",
                rusqlite::params![chat_id, language, Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Reactivate (or deactivate) a subscriber, e.g. when they talk to the bot again.
    pub fn set_active(&self, chat_id: i64, active: bool) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE users SET is_active = ?2, updated_at = ?3 WHERE telegram_id = ?1",
                rusqlite::params![chat_id, active as i32, Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    pub fn is_active(&self, chat_id: i64) -> Result<Option<bool>> {
        self.conn()?
            .query_row(
                "SELECT is_active FROM users WHERE telegram_id = ?1",
                [chat_id],
                |r| r.get::<_, i32>(0).map(|v| v != 0),
            )
            .optional()
            .map_err(storage_err)
    }

    /// Returns false if the subscription already existed.
    pub fn add_subscription(&self, chat_id: i64, locality_id: i64) -> Result<bool> {
        let added = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO subscriptions (user_id, locality_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![chat_id, locality_id, Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;
        Ok(added > 0)
    }

    // ─── Outages ──────────────────────────────────────────────

    pub fn get_outage(&self, id: &str) -> Result<Option<StoredOutage>> {
        self.conn()?
            .query_row(
                "SELECT id, locality, district, streets, date_description, from_time, to_time, first_seen, last_checked
                 FROM outages WHERE id = ?1",
                [id],
                |row| {
                    Ok(StoredOutage {
                        outage: Outage {
                            id: row.get(0)?,
                            locality: row.get(1)?,
                            district: row.get(2)?,
                            streets: row.get(3)?,
                            date: row.get(4)?,
                            from: ts_column(row, 5)?,
                            to: ts_column(row, 6)?,
                        },
                        first_seen: ts_column(row, 7)?,
                        last_checked: ts_column(row, 8)?,
                    })
                },
            )
            .optional()
            .map_err(storage_err)
    }

    pub fn count_outages(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM outages", [], |r| r.get(0))
            .map_err(storage_err)?;
        Ok(n as usize)
    }

    pub fn count_notifications(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM notifications_sent", [], |r| r.get(0))
            .map_err(storage_err)?;
        Ok(n as usize)
    }
}

#[async_trait]
impl OutageStore for SqliteStore {
    async fn outage_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row("SELECT 1 FROM outages WHERE id = ?1", [id], |r| r.get(0))
            .optional()
            .map_err(storage_err)?;
        Ok(found.is_some())
    }

    async fn create_outage(&self, outage: &Outage) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        // INSERT OR IGNORE: the first observation of an outage is authoritative.
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO outages
                 (id, locality, district, streets, date_description, from_time, to_time, first_seen, last_checked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    outage.id,
                    outage.locality,
                    outage.district,
                    outage.streets,
                    outage.date,
                    outage.from.to_rfc3339(),
                    outage.to.to_rfc3339(),
                    now,
                ],
            )
            .map_err(|e| storage_err(format!("Save outage {}: {e}", outage.id)))?;
        Ok(())
    }

    async fn touch_last_checked(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE outages SET last_checked = ?2 WHERE id = ?1",
                rusqlite::params![id, Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    async fn notification_exists(&self, chat_id: i64, outage_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM notifications_sent WHERE user_id = ?1 AND outage_id = ?2",
                rusqlite::params![chat_id, outage_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(found.is_some())
    }

    async fn record_notification(&self, chat_id: i64, outage_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO notifications_sent (user_id, outage_id, sent_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![chat_id, outage_id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| storage_err(format!("Record notification {chat_id}/{outage_id}: {e}")))?;
        Ok(())
    }

    async fn active_subscribers_for_locality(&self, locality: &str) -> Result<Vec<Recipient>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT u.telegram_id, COALESCE(NULLIF(u.language, ''), 'en')
                 FROM users u
                 JOIN subscriptions s ON s.user_id = u.telegram_id
                 JOIN localities l ON l.id = s.locality_id
                 WHERE l.name = ?1 AND u.is_active = 1
                 ORDER BY u.telegram_id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([locality], |row| {
                Ok(Recipient {
                    chat_id: row.get(0)?,
                    language: row.get(1)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    async fn deactivate_subscriber(&self, chat_id: i64) -> Result<()> {
        if self.set_active(chat_id, false)? {
            tracing::info!("🚫 Marked user {chat_id} as inactive");
        } else {
            tracing::warn!("⚠️ No user {chat_id} to deactivate");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outage(id: &str, locality: &str) -> Outage {
        Outage {
            id: id.into(),
            date: "Le dimanche 13 mars 2022 de 09:30:00 à 13:00:00".into(),
            locality: locality.into(),
            streets: "AVE DES MARLINS".into(),
            district: "blackriver".into(),
            from: Utc.with_ymd_and_hms(2022, 3, 13, 5, 30, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2022, 3, 13, 9, 0, 0).unwrap(),
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut data = BTreeMap::new();
        data.insert("blackriver".to_string(), vec!["TAMARIN".to_string(), "LA GAULETTE".to_string()]);
        data.insert("plaineswilhems".to_string(), vec!["CUREPIPE".to_string(), "TAMARIN".to_string()]);
        assert_eq!(store.seed_localities(&data).unwrap(), 4);
        store
    }

    fn subscribe(store: &SqliteStore, chat_id: i64, district: &str, locality: &str, lang: Option<&str>) {
        store.upsert_user(chat_id, Some("user"), lang).unwrap();
        let id = store.locality_id(district, locality).unwrap().unwrap();
        store.add_subscription(chat_id, id).unwrap();
    }

    #[test]
    fn test_seed_only_once() {
        let store = seeded();
        let mut more = BTreeMap::new();
        more.insert("north".to_string(), vec!["GRAND BAIE".to_string()]);
        assert_eq!(store.seed_localities(&more).unwrap(), 0);
        assert!(store.locality_id("north", "GRAND BAIE").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_is_insert_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = outage("o1", "TAMARIN");
        assert!(!store.outage_exists("o1").await.unwrap());
        store.create_outage(&original).await.unwrap();
        assert!(store.outage_exists("o1").await.unwrap());

        let mut edited = original.clone();
        edited.locality = "RESHAPED".into();
        edited.to = edited.to + chrono::Duration::hours(5);
        store.create_outage(&edited).await.unwrap();

        let stored = store.get_outage("o1").unwrap().unwrap();
        assert_eq!(stored.outage, original);
        assert_eq!(store.count_outages().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_touch_last_checked() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_outage(&outage("o1", "TAMARIN")).await.unwrap();
        let before = store.get_outage("o1").unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.touch_last_checked("o1").await.unwrap();
        let after = store.get_outage("o1").unwrap().unwrap();
        assert!(after.last_checked > before.last_checked);
        assert_eq!(after.first_seen, before.first_seen);
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_storage_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_outage(&outage("o1", "TAMARIN")).await.unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE outages SET from_time = 'not a date' WHERE id = 'o1'", [])
            .unwrap();

        let err = store.get_outage("o1").unwrap_err();
        assert_eq!(err.kind(), "storage");
    }

    #[tokio::test]
    async fn test_deactivate_unknown_user_is_noop() {
        let store = seeded();
        subscribe(&store, 100, "blackriver", "TAMARIN", None);

        store.deactivate_subscriber(999).await.unwrap();
        assert_eq!(store.is_active(999).unwrap(), None);
        assert_eq!(store.is_active(100).unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_active_subscribers_by_locality() {
        let store = seeded();
        subscribe(&store, 100, "blackriver", "TAMARIN", Some("en-GB"));
        subscribe(&store, 200, "blackriver", "TAMARIN", None);
        // same user, same name in another district: listed once
        subscribe(&store, 100, "plaineswilhems", "TAMARIN", Some("en"));
        subscribe(&store, 300, "plaineswilhems", "CUREPIPE", Some("fr"));

        let recipients = store.active_subscribers_for_locality("TAMARIN").await.unwrap();
        assert_eq!(
            recipients,
            vec![
                Recipient { chat_id: 100, language: "en".into() },
                Recipient { chat_id: 200, language: "fr".into() },
            ]
        );

        store.deactivate_subscriber(200).await.unwrap();
        let recipients = store.active_subscribers_for_locality("TAMARIN").await.unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(store.is_active(200).unwrap(), Some(false));

        store.set_active(200, true).unwrap();
        assert_eq!(store.active_subscribers_for_locality("TAMARIN").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_language_preference() {
        let store = seeded();
        subscribe(&store, 100, "blackriver", "TAMARIN", Some("de"));
        assert!(store.set_language(100, "en").unwrap());
        assert!(!store.set_language(999, "en").unwrap());

        // a later upsert keeps the chosen language
        store.upsert_user(100, Some("renamed"), Some("fr")).unwrap();
        let recipients = store.active_subscribers_for_locality("TAMARIN").await.unwrap();
        assert_eq!(recipients[0].language, "en");
    }

    #[tokio::test]
    async fn test_notification_guard() {
        let store = seeded();
        subscribe(&store, 100, "blackriver", "TAMARIN", None);
        store.create_outage(&outage("o1", "TAMARIN")).await.unwrap();

        assert!(!store.notification_exists(100, "o1").await.unwrap());
        store.record_notification(100, "o1").await.unwrap();
        store.record_notification(100, "o1").await.unwrap();
        assert!(store.notification_exists(100, "o1").await.unwrap());
        assert_eq!(store.count_notifications().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_notification_requires_known_outage() {
        let store = seeded();
        subscribe(&store, 100, "blackriver", "TAMARIN", None);
        let err = store.record_notification(100, "missing").await.unwrap_err();
        assert_eq!(err.kind(), "storage");
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("kouran-test-store-{}", std::process::id()));
        let path = dir.join("nested").join("kouran.db");
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count_outages().unwrap(), 0);
        drop(store);
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
