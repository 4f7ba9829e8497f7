//! Durable activity and erasure log, backed by SQLite in WAL mode.
//!
//! Ledger insertion order is authoritative for the turnstile fold (§4.3, §9):
//! all day-scoped queries order by `id ASC`.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreResult;

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub day: String,
    pub user_key: Vec<u8>,
    pub user_root: Vec<u8>,
    pub op: char,
    pub metadata_json: String,
}

#[derive(Debug, Clone)]
pub struct ErasureEntry {
    pub id: Option<i64>,
    pub user_root: Vec<u8>,
    pub days: Vec<String>,
    pub pending: bool,
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::CoreError::InvalidConfig(format!(
                    "failed to create ledger directory {}: {e}",
                    parent.display()
                )))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::ensure_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn ensure_tables(conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                day TEXT NOT NULL,
                user_key BLOB NOT NULL,
                user_root BLOB NOT NULL,
                op TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_activity_day ON activity_log(day);
            CREATE INDEX IF NOT EXISTS idx_activity_root ON activity_log(user_root);

            CREATE TABLE IF NOT EXISTS erasure_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_root BLOB NOT NULL,
                days TEXT NOT NULL,
                pending INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                processed_at TEXT
            );",
        )?;
        Ok(())
    }

    pub fn record_activity(&self, entry: &ActivityEntry) -> CoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO activity_log (day, user_key, user_root, op, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.day, entry.user_key, entry.user_root, entry.op.to_string(), entry.metadata_json],
        )?;
        Ok(())
    }

    pub fn record_activity_batch(&self, entries: &[ActivityEntry]) -> CoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO activity_log (day, user_key, user_root, op, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.day,
                    entry.user_key,
                    entry.user_root,
                    entry.op.to_string(),
                    entry.metadata_json
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn record_erasure(&self, entry: &ErasureEntry) -> CoreResult<i64> {
        let conn = self.conn.lock();
        let days_json = serde_json::to_string(&entry.days).expect("Vec<String> always serializes");
        conn.execute(
            "INSERT INTO erasure_log (user_root, days, pending) VALUES (?1, ?2, ?3)",
            params![entry.user_root, days_json, entry.pending as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn mark_erasure_processed(&self, erasure_id: i64) -> CoreResult<()> {
        self.conn.lock().execute(
            "UPDATE erasure_log SET pending = 0, processed_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![erasure_id],
        )?;
        Ok(())
    }

    /// Ordered `(op, user_key)` pairs for one day, in insertion order.
    pub fn fetch_day_events(&self, day: &str) -> CoreResult<Vec<(char, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT op, user_key FROM activity_log WHERE day = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![day], |row| {
                let op: String = row.get(0)?;
                let key: Vec<u8> = row.get(1)?;
                Ok((op.chars().next().unwrap_or('+'), key))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn days_for_user(&self, user_root: &[u8]) -> CoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT day FROM activity_log WHERE user_root = ?1 ORDER BY day ASC",
        )?;
        let rows = stmt
            .query_map(params![user_root], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn pending_erasures(&self) -> CoreResult<Vec<ErasureEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_root, days, pending FROM erasure_log WHERE pending = 1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let user_root: Vec<u8> = row.get(1)?;
                let days_json: String = row.get(2)?;
                let pending: i64 = row.get(3)?;
                Ok((id, user_root, days_json, pending))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, user_root, days_json, pending)| ErasureEntry {
                id: Some(id),
                user_root,
                days: serde_json::from_str(&days_json).unwrap_or_default(),
                pending: pending != 0,
            })
            .collect())
    }

    /// Deletes every activity row for `user_root` on any of `days`. Used by erasure
    /// replay so a purged user stops contributing to the turnstile fold entirely,
    /// rather than merely triggering a snapshot rebuild that still sees their rows.
    pub fn purge_user_activity(&self, user_root: &[u8], days: &[String]) -> CoreResult<()> {
        if days.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "DELETE FROM activity_log WHERE user_root = ?1 AND day = ?2",
        )?;
        for day in days {
            stmt.execute(params![user_root, day])?;
        }
        Ok(())
    }

    /// Testing/inspection helper: does this erasure id still exist and is it pending?
    pub fn erasure_pending(&self, erasure_id: i64) -> CoreResult<Option<bool>> {
        let conn = self.conn.lock();
        let pending: Option<i64> = conn
            .query_row(
                "SELECT pending FROM erasure_log WHERE id = ?1",
                params![erasure_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pending.map(|p| p != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(day: &str, op: char, key: u8) -> ActivityEntry {
        ActivityEntry {
            day: day.to_string(),
            user_key: vec![key; 32],
            user_root: vec![key; 32],
            op,
            metadata_json: "{}".to_string(),
        }
    }

    #[test]
    fn fetch_day_events_preserves_insertion_order() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.record_activity(&entry("2025-10-01", '+', 1)).unwrap();
        ledger.record_activity(&entry("2025-10-01", '-', 1)).unwrap();
        ledger.record_activity(&entry("2025-10-01", '+', 1)).unwrap();

        let events = ledger.fetch_day_events("2025-10-01").unwrap();
        assert_eq!(events.iter().map(|(op, _)| *op).collect::<Vec<_>>(), vec!['+', '-', '+']);
    }

    #[test]
    fn erasure_lifecycle_marks_processed() {
        let ledger = Ledger::open_in_memory().unwrap();
        let id = ledger
            .record_erasure(&ErasureEntry {
                id: None,
                user_root: vec![1; 32],
                days: vec!["2025-10-01".to_string()],
                pending: true,
            })
            .unwrap();
        assert_eq!(ledger.erasure_pending(id).unwrap(), Some(true));
        ledger.mark_erasure_processed(id).unwrap();
        assert_eq!(ledger.erasure_pending(id).unwrap(), Some(false));
    }

    #[test]
    fn days_for_user_returns_distinct_sorted_days() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.record_activity(&entry("2025-10-02", '+', 7)).unwrap();
        ledger.record_activity(&entry("2025-10-01", '+', 7)).unwrap();
        ledger.record_activity(&entry("2025-10-01", '-', 7)).unwrap();
        let days = ledger.days_for_user(&[7; 32]).unwrap();
        assert_eq!(days, vec!["2025-10-01".to_string(), "2025-10-02".to_string()]);
    }

    #[test]
    fn purge_user_activity_removes_only_named_days() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.record_activity(&entry("2025-10-01", '+', 9)).unwrap();
        ledger.record_activity(&entry("2025-10-02", '+', 9)).unwrap();
        ledger.purge_user_activity(&[9; 32], &["2025-10-01".to_string()]).unwrap();
        assert!(ledger.fetch_day_events("2025-10-01").unwrap().is_empty());
        assert_eq!(ledger.fetch_day_events("2025-10-02").unwrap().len(), 1);
    }
}
