//! Embedded transactional key-value store.
//!
//! SQLite-backed buckets, one table per entity kind, each a plain
//! `key TEXT PRIMARY KEY, value BLOB` mapping. Repositories serialize their
//! records as JSON values. All read-then-write sequences go through
//! [`Db::with_txn`] so status checks and status transitions on the same
//! entity are a single atomic operation.

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::error::{Error, Result};

pub const BUCKET_CERTIFICATES: &str = "certificates";
pub const BUCKET_CHALLENGE_CONFIGS: &str = "challenge_configs";
pub const BUCKET_APP_CONFIG: &str = "app_config";

const BUCKETS: &[&str] = &[
    BUCKET_CERTIFICATES,
    BUCKET_CHALLENGE_CONFIGS,
    BUCKET_APP_CONFIG,
];

/// Handle to the shared store. Cheap to clone; all clones serialize access
/// through one connection.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Opens (creating if necessary) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(Error::storage)?;
            }
        }

        let created = !path.exists();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(|err| Error::Storage(format!("failed to open {}: {err}", path.display())))?;

        Self::configure_connection(&conn)?;
        Self::create_buckets(&conn)?;
        Self::enforce_permissions(path, created)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_buckets(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }

    fn create_buckets(conn: &Connection) -> Result<()> {
        for bucket in BUCKETS {
            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{bucket}" (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL
                );
                "#,
            ))?;
        }
        Ok(())
    }

    /// Runs `f` inside one SQLite transaction; committed on `Ok`, rolled
    /// back on `Err`.
    pub fn with_txn<T>(&self, f: impl FnOnce(&Txn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let result = f(&Txn { tx: &tx })?;
        tx.commit()?;
        Ok(result)
    }

    pub fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_txn(|txn| txn.get(bucket, key))
    }

    pub fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        self.with_txn(|txn| txn.put(bucket, key, value))
    }

    pub fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        self.with_txn(|txn| txn.delete(bucket, key))
    }

    /// Full-bucket scan in key order.
    pub fn scan(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.with_txn(|txn| txn.scan(bucket))
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|err| Error::Storage(format!("connection mutex poisoned: {err}")))
    }

    #[cfg(unix)]
    fn enforce_permissions(path: &Path, created: bool) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let desired = fs::Permissions::from_mode(0o600);
        if created {
            fs::set_permissions(path, desired).map_err(Error::storage)?;
        } else {
            let metadata = fs::metadata(path).map_err(Error::storage)?;
            if metadata.permissions().mode() & 0o177 != 0 {
                fs::set_permissions(path, desired).map_err(Error::storage)?;
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn enforce_permissions(_path: &Path, _created: bool) -> Result<()> {
        Ok(())
    }
}

/// A live transaction. Bucket names must be one of the fixed set; anything
/// else is a programming error surfaced as a storage error.
pub struct Txn<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl Txn<'_> {
    pub fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let bucket = known_bucket(bucket)?;
        let mut stmt = self
            .tx
            .prepare_cached(&format!(r#"SELECT value FROM "{bucket}" WHERE key = ?1"#))?;
        let value = stmt
            .query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(value)
    }

    pub fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        let bucket = known_bucket(bucket)?;
        self.tx.execute(
            &format!(
                r#"
                INSERT INTO "{bucket}" (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            ),
            params![key, value],
        )?;
        Ok(())
    }

    /// Returns whether a record was actually removed.
    pub fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        let bucket = known_bucket(bucket)?;
        let removed = self
            .tx
            .execute(&format!(r#"DELETE FROM "{bucket}" WHERE key = ?1"#), params![key])?;
        Ok(removed > 0)
    }

    pub fn scan(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let bucket = known_bucket(bucket)?;
        let mut stmt = self
            .tx
            .prepare_cached(&format!(r#"SELECT key, value FROM "{bucket}" ORDER BY key"#))?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push((row.get(0)?, row.get(1)?));
        }
        Ok(entries)
    }
}

fn known_bucket(bucket: &str) -> Result<&'static str> {
    BUCKETS
        .iter()
        .find(|known| **known == bucket)
        .copied()
        .ok_or_else(|| Error::Storage(format!("unknown bucket: {bucket}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() -> Result<()> {
        let db = Db::open_in_memory()?;
        assert!(db.get(BUCKET_APP_CONFIG, "missing")?.is_none());

        db.put(BUCKET_APP_CONFIG, "alpha", b"one")?;
        assert_eq!(db.get(BUCKET_APP_CONFIG, "alpha")?.as_deref(), Some(&b"one"[..]));

        db.put(BUCKET_APP_CONFIG, "alpha", b"two")?;
        assert_eq!(db.get(BUCKET_APP_CONFIG, "alpha")?.as_deref(), Some(&b"two"[..]));

        assert!(db.delete(BUCKET_APP_CONFIG, "alpha")?);
        assert!(!db.delete(BUCKET_APP_CONFIG, "alpha")?);
        assert!(db.get(BUCKET_APP_CONFIG, "alpha")?.is_none());
        Ok(())
    }

    #[test]
    fn scan_returns_entries_in_key_order() -> Result<()> {
        let db = Db::open_in_memory()?;
        db.put(BUCKET_CERTIFICATES, "b.example", b"2")?;
        db.put(BUCKET_CERTIFICATES, "a.example", b"1")?;
        db.put(BUCKET_CERTIFICATES, "c.example", b"3")?;

        let keys: Vec<String> = db
            .scan(BUCKET_CERTIFICATES)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["a.example", "b.example", "c.example"]);
        Ok(())
    }

    #[test]
    fn failed_transaction_rolls_back() -> Result<()> {
        let db = Db::open_in_memory()?;
        let result: Result<()> = db.with_txn(|txn| {
            txn.put(BUCKET_APP_CONFIG, "key", b"value")?;
            Err(Error::Storage("boom".into()))
        });
        assert!(result.is_err());
        assert!(db.get(BUCKET_APP_CONFIG, "key")?.is_none());
        Ok(())
    }

    #[test]
    fn rejects_unknown_bucket() {
        let db = Db::open_in_memory().unwrap();
        assert!(matches!(
            db.get("nope", "key"),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn buckets_are_isolated() -> Result<()> {
        let db = Db::open_in_memory()?;
        db.put(BUCKET_CERTIFICATES, "example.test", b"cert")?;
        assert!(db.get(BUCKET_CHALLENGE_CONFIGS, "example.test")?.is_none());
        Ok(())
    }
}
