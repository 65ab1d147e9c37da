use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use rusqlite::backup::Backup;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, Row, TransactionBehavior};
use thiserror::Error;

use crate::config::StorageMode;
use crate::sqlite::configure_connection;
use crate::storage::object_key;

const RECORDINGS_SCHEMA: &str = include_str!("../../sql/recordings.sql");

/// Entries older than this are only expired, never processed.
pub const SOFT_EXPIRY_HOURS: i64 = 48;
/// Entries older than this are deleted outright, regardless of state.
pub const HARD_EXPIRY_HOURS: i64 = 72;
/// An entry sitting in encoding/merging longer than this is reclaimed.
pub const STALL_MINUTES: i64 = 10;
/// Retry cap per stage; at this count the entry is permanently parked.
pub const MAX_ATTEMPTS: i64 = 3;

pub const EXPIRED_REASON: &str = "Expired";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open recordings database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on recordings database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("recordings database path not configured")]
    MissingStore,
    #[error("invalid recording status: {0}")]
    InvalidStatus(String),
    #[error("invalid visibility: {0}")]
    InvalidVisibility(String),
    #[error("recording entry not found: {0}")]
    NotFound(i64),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingState {
    Recording,
    Pending,
    Uploading,
    Encoding,
    Encoded,
    Merging,
    Merged,
    Completed,
    Failed,
    Expired,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Recording => "recording",
            RecordingState::Pending => "pending",
            RecordingState::Uploading => "uploading",
            RecordingState::Encoding => "encoding",
            RecordingState::Encoded => "encoded",
            RecordingState::Merging => "merging",
            RecordingState::Merged => "merged",
            RecordingState::Completed => "completed",
            RecordingState::Failed => "failed",
            RecordingState::Expired => "expired",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, RecordingState::Completed | RecordingState::Expired)
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordingState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recording" => Ok(Self::Recording),
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "encoding" => Ok(Self::Encoding),
            "encoded" => Ok(Self::Encoded),
            "merging" => Ok(Self::Merging),
            "merged" => Ok(Self::Merged),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(QueueError::InvalidStatus(other.to_string())),
        }
    }
}

/// The two retryable processing stages a failure can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Encoding,
    Merging,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Encoding => "encoding",
            Stage::Merging => "merging",
        }
    }

    pub fn state(&self) -> RecordingState {
        match self {
            Stage::Encoding => RecordingState::Encoding,
            Stage::Merging => RecordingState::Merging,
        }
    }

    pub fn from_reason(reason: &str) -> Option<Self> {
        match reason {
            "encoding" => Some(Stage::Encoding),
            "merging" => Some(Stage::Merging),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            other => Err(QueueError::InvalidVisibility(other.to_string())),
        }
    }
}

/// Segment announced by the ingest process. Timestamps come from the
/// segment itself, not from the wall clock at notification time.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub channel_id: String,
    pub file_name: String,
    pub recorded_at: DateTime<Utc>,
    pub visibility: Visibility,
    pub storage: StorageMode,
}

#[derive(Debug, Clone)]
pub struct RecordingEntry {
    pub id: i64,
    pub channel_id: String,
    pub file_name: String,
    pub status: RecordingState,
    pub error: Option<String>,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub first_segment_id: Option<i64>,
    pub segment_ids: Vec<i64>,
    pub visibility: Visibility,
}

impl RecordingEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let segment_ids: String = row.get("segment_ids")?;
        Ok(Self {
            id: row.get("id")?,
            channel_id: row.get("channel_id")?,
            file_name: row.get("file_name")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(RecordingState::Pending),
            error: row.get("error")?,
            attempts: row.get("attempts")?,
            created_at: required_timestamp(row.get("created_at")?),
            started_at: parse_timestamp(row.get("started_at")?)?,
            finished_at: parse_timestamp(row.get("finished_at")?)?,
            first_segment_id: row.get("first_segment_id")?,
            segment_ids: serde_json::from_str(&segment_ids).unwrap_or_default(),
            visibility: row
                .get::<_, String>("visibility")?
                .parse()
                .unwrap_or_default(),
        })
    }

    /// Stage this entry may retry, if any attempts remain.
    pub fn retryable_stage(&self) -> Option<Stage> {
        if self.status != RecordingState::Failed || self.attempts >= MAX_ATTEMPTS {
            return None;
        }
        self.error.as_deref().and_then(Stage::from_reason)
    }

    pub fn object_key(&self) -> String {
        object_key(&self.channel_id, &self.file_name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<RecordingState>,
    pub channel: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueSummary {
    pub counts: HashMap<RecordingState, i64>,
}

#[derive(Debug, Clone)]
pub struct RecordingQueueStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for RecordingQueueStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl RecordingQueueStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> QueueResult<RecordingQueueStore> {
        let path = self.path.ok_or(QueueError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(RecordingQueueStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct RecordingQueueStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl RecordingQueueStore {
    pub fn builder() -> RecordingQueueStoreBuilder {
        RecordingQueueStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> QueueResult<Self> {
        RecordingQueueStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> QueueResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            QueueError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| QueueError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute_batch(RECORDINGS_SCHEMA)?;
        Ok(())
    }

    pub fn register_segment(&self, segment: &NewSegment) -> QueueResult<i64> {
        let status = match segment.storage {
            StorageMode::Local => RecordingState::Pending,
            StorageMode::Remote => RecordingState::Recording,
        };
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO recordings (channel_id, file_name, status, created_at, visibility)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &segment.channel_id,
                &segment.file_name,
                status.as_str(),
                segment.recorded_at.naive_utc(),
                segment.visibility.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn fetch(&self, id: i64) -> QueueResult<Option<RecordingEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM recordings WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(RecordingEntry::from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list(&self, filter: &QueueFilter) -> QueueResult<Vec<RecordingEntry>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM recordings WHERE 1=1");
        let mut params: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(channel) = &filter.channel {
            query.push_str(" AND channel_id = ?");
            params.push(Value::Text(channel.clone()));
        }
        query.push_str(" ORDER BY created_at ASC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(RecordingEntry::from_row(row)?);
        }
        Ok(entries)
    }

    pub fn summary(&self) -> QueueResult<QueueSummary> {
        let conn = self.open()?;
        let mut counts = HashMap::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM recordings GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let status = status.parse().unwrap_or(RecordingState::Pending);
            counts.insert(status, count);
        }
        Ok(QueueSummary { counts })
    }

    /// Oldest entry the drain loop may act on, skipping `excluded` ids.
    ///
    /// Mirrors `machine::is_eligible`: non-terminal, not currently in a
    /// stage, retryable if failed, and younger than the soft expiry.
    pub fn next_eligible(
        &self,
        now: DateTime<Utc>,
        excluded: &[i64],
    ) -> QueueResult<Option<RecordingEntry>> {
        let conn = self.open()?;
        let cutoff = now - chrono::Duration::hours(SOFT_EXPIRY_HOURS);
        let mut query = String::from(
            "SELECT * FROM recordings
             WHERE status NOT IN ('completed', 'merging', 'encoding', 'expired')
               AND (status <> 'failed' OR (error IN ('encoding', 'merging') AND attempts < ?1))
               AND created_at >= ?2",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(MAX_ATTEMPTS), Box::new(cutoff.naive_utc())];
        if !excluded.is_empty() {
            query.push_str(" AND id NOT IN (");
            for (index, id) in excluded.iter().enumerate() {
                if index > 0 {
                    query.push(',');
                }
                query.push('?');
                params.push(Box::new(*id));
            }
            query.push(')');
        }
        query.push_str(" ORDER BY created_at ASC LIMIT 1");
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value.as_ref()),
        ))?;
        match rows.next()? {
            Some(row) => Ok(Some(RecordingEntry::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Atomically move an entry into a stage state and stamp `started_at`.
    ///
    /// The status guard makes concurrent claimants lose cleanly: whoever
    /// executes first wins, the other sees zero affected rows. A sweeper
    /// pass reading `started_at` never observes a half-written claim.
    pub fn claim_stage(
        &self,
        id: i64,
        expected: &[RecordingState],
        stage: Stage,
        reset_attempts: bool,
    ) -> QueueResult<bool> {
        let conn = self.open()?;
        let mut query = format!(
            "UPDATE recordings SET status = ?, started_at = ?, finished_at = NULL{}",
            if reset_attempts {
                ", attempts = 0, error = NULL"
            } else {
                ""
            }
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(stage.state().as_str()),
            Box::new(Utc::now().naive_utc()),
        ];
        query.push_str(" WHERE id = ? AND status IN (");
        params.push(Box::new(id));
        for (index, state) in expected.iter().enumerate() {
            if index > 0 {
                query.push(',');
            }
            query.push('?');
            params.push(Box::new(state.as_str()));
        }
        query.push(')');
        let affected = conn.execute(
            &query,
            rusqlite::params_from_iter(params.iter().map(|value| value.as_ref())),
        )?;
        Ok(affected > 0)
    }

    pub fn mark_encoded(&self, id: i64) -> QueueResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'encoded' WHERE id = ?1 AND status = 'encoding'",
            [id],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_merged(&self, id: i64, first_segment_id: Option<i64>) -> QueueResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'merged', first_segment_id = ?1
             WHERE id = ?2 AND status = 'merging'",
            params![first_segment_id, id],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_completed(&self, id: i64) -> QueueResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'completed', finished_at = ?1
             WHERE id = ?2 AND status = 'merged'",
            params![Utc::now().naive_utc(), id],
        )?;
        Ok(affected > 0)
    }

    /// Record a stage failure. The attempts bump happens in SQL so the
    /// counter stays correct under a concurrently sweeping task.
    pub fn mark_failed(&self, id: i64, stage: Stage) -> QueueResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'failed', error = ?1,
                    attempts = attempts + 1, finished_at = ?2
             WHERE id = ?3",
            params![stage.as_str(), Utc::now().naive_utc(), id],
        )?;
        if affected == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    pub fn mark_uploading(&self, id: i64) -> QueueResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'uploading' WHERE id = ?1 AND status = 'recording'",
            [id],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_uploaded(&self, id: i64) -> QueueResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'pending'
             WHERE id = ?1 AND status IN ('recording', 'uploading')",
            [id],
        )?;
        Ok(affected > 0)
    }

    /// Latest finished entry on the channel older than `before`; the
    /// candidate tail of the recording run a new segment may extend.
    pub fn predecessor(
        &self,
        channel_id: &str,
        before: DateTime<Utc>,
    ) -> QueueResult<Option<RecordingEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM recordings
             WHERE channel_id = ?1 AND created_at < ?2 AND status = 'completed'
             ORDER BY created_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![channel_id, before.naive_utc()])?;
        match rows.next()? {
            Some(row) => Ok(Some(RecordingEntry::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Append a merged segment id to the run head's segment list.
    /// Read-modify-write, so it runs under an immediate transaction.
    pub fn append_segment(&self, head_id: i64, segment_id: i64) -> QueueResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw: Option<String> = {
            let mut stmt = tx.prepare("SELECT segment_ids FROM recordings WHERE id = ?1")?;
            let mut rows = stmt.query([head_id])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        let raw = raw.ok_or(QueueError::NotFound(head_id))?;
        let mut ids: Vec<i64> = serde_json::from_str(&raw).unwrap_or_default();
        if !ids.contains(&segment_id) {
            ids.push(segment_id);
        }
        tx.execute(
            "UPDATE recordings SET segment_ids = ?1 WHERE id = ?2",
            params![serde_json::to_string(&ids)?, head_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn remove(&self, id: i64) -> QueueResult<()> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM recordings WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    /// Sweeper step 1: hard-delete everything older than the cutoff.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "DELETE FROM recordings WHERE created_at < ?1",
            [cutoff.naive_utc()],
        )?;
        Ok(affected)
    }

    /// Sweeper step 2: expire non-terminal entries past the soft cutoff.
    pub fn expire_stale(&self, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'expired', error = ?1, finished_at = ?2
             WHERE created_at < ?3 AND status NOT IN ('failed', 'expired', 'completed')",
            params![EXPIRED_REASON, Utc::now().naive_utc(), cutoff.naive_utc()],
        )?;
        Ok(affected)
    }

    /// Sweeper steps 3 and 4: fail entries stuck mid-stage.
    pub fn reclaim_stalled(&self, stage: Stage, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET status = 'failed', error = ?1,
                    attempts = attempts + 1, finished_at = ?2
             WHERE status = ?3 AND started_at IS NOT NULL AND started_at < ?4",
            params![
                stage.as_str(),
                Utc::now().naive_utc(),
                stage.state().as_str(),
                cutoff.naive_utc()
            ],
        )?;
        Ok(affected)
    }

    pub fn jobs_disabled(&self) -> QueueResult<bool> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = 'jobs_disabled'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let value: String = row.get(0)?;
                Ok(value == "1" || value.eq_ignore_ascii_case("true"))
            }
            None => Ok(false),
        }
    }

    pub fn set_jobs_disabled(&self, disabled: bool) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES ('jobs_disabled', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [if disabled { "1" } else { "0" }],
        )?;
        Ok(())
    }

    /// Write a gzip-compressed SQL dump of the recordings table.
    pub fn export_backup(&self, output: impl AsRef<Path>) -> QueueResult<()> {
        let output = output.as_ref();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.open()?;
        let mut dump = String::new();
        dump.push_str(RECORDINGS_SCHEMA);
        dump.push('\n');
        dump.push_str("BEGIN;\n");

        let mut stmt = conn.prepare(
            "SELECT id, channel_id, file_name, status, error, attempts, created_at,
                    started_at, finished_at, first_segment_id, segment_ids, visibility
             FROM recordings ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;

        for row in rows {
            let (
                id,
                channel_id,
                file_name,
                status,
                error,
                attempts,
                created_at,
                started_at,
                finished_at,
                first_segment_id,
                segment_ids,
                visibility,
            ) = row?;
            dump.push_str(&format!(
                "INSERT INTO recordings (id, channel_id, file_name, status, error, attempts, created_at, started_at, finished_at, first_segment_id, segment_ids, visibility) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {});\n",
                id,
                sql_quote(&channel_id),
                sql_quote(&file_name),
                sql_quote(&status),
                format_optional_text(error),
                attempts,
                format_optional_text(created_at),
                format_optional_text(started_at),
                format_optional_text(finished_at),
                format_optional_integer(first_segment_id),
                sql_quote(&segment_ids),
                sql_quote(&visibility),
            ));
        }

        dump.push_str("COMMIT;\n");

        let file = File::create(output)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(dump.as_bytes())?;
        encoder.finish()?;
        Ok(())
    }

    pub fn backup_to(&self, destination: impl AsRef<Path>) -> QueueResult<()> {
        let destination_path = destination.as_ref();
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        configure_connection(&dest).map_err(|source| QueueError::Open {
            source,
            path: destination_path.to_path_buf(),
        })?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }
}

fn sql_quote(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    format!("'{}'", escaped)
}

fn format_optional_integer(value: Option<i64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "NULL".to_string())
}

fn format_optional_text(value: Option<String>) -> String {
    value
        .map(|v| sql_quote(&v))
        .unwrap_or_else(|| "NULL".to_string())
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}

fn required_timestamp(value: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc)
}
