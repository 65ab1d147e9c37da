use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, TransactionBehavior};

use crate::queue::{QueueError, QueueResult};
use crate::sqlite::configure_connection;

/// Last successful run per scheduled task. Shares the recordings
/// database; the `task_runs` table is created by the store schema.
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    path: PathBuf,
}

impl ExecutionTracker {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> QueueResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|source| QueueError::Open {
                source,
                path: self.path.clone(),
            })?;
        configure_connection(&conn).map_err(|source| QueueError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    /// Upsert the task's last-run timestamp. The immediate transaction
    /// takes the write lock up front so two tasks reporting at once
    /// serialize instead of losing one update.
    pub fn record_run(&self, task_id: &str, at: DateTime<Utc>) -> QueueResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO task_runs (task_id, last_run_at) VALUES (?1, ?2)
             ON CONFLICT(task_id) DO UPDATE SET last_run_at = excluded.last_run_at",
            params![task_id, at.naive_utc()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn last_run(&self, task_id: &str) -> QueueResult<Option<DateTime<Utc>>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT last_run_at FROM task_runs WHERE task_id = ?1")?;
        let mut rows = stmt.query([task_id])?;
        match rows.next()? {
            Some(row) => {
                let at: NaiveDateTime = row.get(0)?;
                Ok(Some(DateTime::<Utc>::from_naive_utc_and_offset(at, Utc)))
            }
            None => Ok(None),
        }
    }

    pub fn all(&self) -> QueueResult<HashMap<String, DateTime<Utc>>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT task_id, last_run_at FROM task_runs")?;
        let mut map = HashMap::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let task_id: String = row.get(0)?;
            let at: NaiveDateTime = row.get(1)?;
            map.insert(task_id, DateTime::<Utc>::from_naive_utc_and_offset(at, Utc));
        }
        Ok(map)
    }
}
