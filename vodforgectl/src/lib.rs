use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use vodforge_core::{load_vodforge_config, QueueFilter, RecordingQueueStore, VodforgeConfig};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vodforge_core::ConfigError),
    #[error("queue error: {0}")]
    Queue(#[from] vodforge_core::QueueError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("control endpoint unreachable at {addr}: {source}")]
    ControlUnreachable {
        addr: String,
        source: std::io::Error,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "vodforge command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to the main vodforge.toml
    #[arg(long, default_value = "configs/vodforge.toml")]
    pub config: PathBuf,
    /// Override for the recordings database path
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Override for the daemon control address
    #[arg(long)]
    pub control_addr: Option<String>,
    /// Token for local authentication (when VODFORGECTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a summary of the recording queue
    Status,
    /// Operations on the recording queue
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Operations on the daemon's scheduled jobs
    #[command(subcommand)]
    Jobs(JobsCommands),
    /// Run integrity checks
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List queue entries
    Show(QueueShowArgs),
    /// Write a gzip SQL dump of the queue
    Backup(QueueBackupArgs),
}

#[derive(Args, Debug)]
pub struct QueueShowArgs {
    /// Filter by status
    #[arg(long)]
    pub status: Option<String>,
    /// Filter by channel
    #[arg(long)]
    pub channel: Option<String>,
    /// Maximum number of rows
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct QueueBackupArgs {
    /// Destination file for the dump
    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommands {
    /// List scheduled jobs and their last execution
    List,
    /// Start a single job
    Start { id: String },
    /// Stop a single job
    Stop { id: String },
    /// Start every job
    StartAll,
    /// Stop every job
    StopAll,
    /// Set the persisted jobs-disabled flag
    Pause,
    /// Clear the persisted jobs-disabled flag
    Resume,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Run basic checks against config, database and daemon
    Check,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Queue(QueueCommands::Show(args)) => {
            let queue = context.queue_show(args)?;
            render(&queue, cli.format)?;
        }
        Commands::Queue(QueueCommands::Backup(args)) => {
            let result = context.queue_backup(args)?;
            render(&result, cli.format)?;
        }
        Commands::Jobs(command) => {
            let reply = context.jobs(command)?;
            render(&reply, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("VODFORGECTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: VodforgeConfig,
    config_path: PathBuf,
    database: PathBuf,
    control_addr: String,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_vodforge_config(&config_path)?;
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        let control_addr = cli
            .control_addr
            .clone()
            .unwrap_or_else(|| config.control.bind_addr.clone());
        Ok(Self {
            config,
            config_path,
            database,
            control_addr,
        })
    }

    fn open_store(&self, read_only: bool) -> Result<RecordingQueueStore> {
        if !self.database.exists() {
            return Err(AppError::MissingResource(format!(
                "recordings database missing: {}",
                self.database.display()
            )));
        }
        let store = RecordingQueueStore::builder()
            .path(&self.database)
            .read_only(read_only)
            .create_if_missing(false)
            .build()?;
        Ok(store)
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let queue_counts = self.queue_counts().unwrap_or_default();
        let jobs_disabled = self
            .open_store(true)
            .and_then(|store| store.jobs_disabled().map_err(AppError::from))
            .unwrap_or(false);
        Ok(StatusReport {
            node_name: self.config.system.node_name.clone(),
            environment: self.config.system.environment.clone(),
            queue_counts,
            jobs_disabled,
        })
    }

    fn queue_counts(&self) -> Option<HashMap<String, i64>> {
        let store = self.open_store(true).ok()?;
        let summary = store.summary().ok()?;
        Some(
            summary
                .counts
                .into_iter()
                .map(|(status, count)| (status.as_str().to_string(), count))
                .collect(),
        )
    }

    fn queue_show(&self, args: &QueueShowArgs) -> Result<QueueList> {
        let store = self.open_store(true)?;
        let status: Option<vodforge_core::RecordingState> = match &args.status {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        let entries = store.list(&QueueFilter {
            status,
            channel: args.channel.clone(),
            limit: Some(args.limit),
        })?;
        let rows = entries
            .into_iter()
            .map(|entry| QueueRow {
                id: entry.id,
                channel_id: entry.channel_id,
                file_name: entry.file_name,
                status: entry.status.as_str().to_string(),
                attempts: entry.attempts,
                error: entry.error,
                created_at: entry.created_at.to_rfc3339(),
            })
            .collect();
        Ok(QueueList { rows })
    }

    fn queue_backup(&self, args: &QueueBackupArgs) -> Result<BackupResult> {
        let store = self.open_store(true)?;
        store.export_backup(&args.output)?;
        Ok(BackupResult {
            status: "ok".to_string(),
            output: args.output.display().to_string(),
        })
    }

    fn jobs(&self, command: &JobsCommands) -> Result<JobsReply> {
        let client = ControlClient::new(&self.control_addr);
        match command {
            JobsCommands::List => {
                let reply = client.send("LIST", None)?;
                let rows: Vec<JobRow> = serde_json::from_value(reply)?;
                Ok(JobsReply::List(rows))
            }
            JobsCommands::Start { id } => {
                let reply = client.send("START", Some(id))?;
                Ok(JobsReply::Message(reply_text(reply)))
            }
            JobsCommands::Stop { id } => {
                let reply = client.send("STOP", Some(id))?;
                Ok(JobsReply::Message(reply_text(reply)))
            }
            JobsCommands::StartAll => {
                let reply = client.send("START_ALL", None)?;
                Ok(JobsReply::Message(reply_text(reply)))
            }
            JobsCommands::StopAll => {
                let reply = client.send("STOP_ALL", None)?;
                Ok(JobsReply::Message(reply_text(reply)))
            }
            JobsCommands::Pause => {
                self.open_store(false)?.set_jobs_disabled(true)?;
                Ok(JobsReply::Message("jobs disabled".to_string()))
            }
            JobsCommands::Resume => {
                self.open_store(false)?.set_jobs_disabled(false)?;
                Ok(JobsReply::Message("jobs enabled".to_string()))
            }
        }
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(self.check_path("vodforge.toml", &self.config_path));
        results.push(self.check_database("recordings.sqlite", &self.database));
        results.push(self.check_directory("objects", Path::new(&self.config.storage.root)));
        results.push(self.check_control());
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} missing", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::warn(
                name,
                format!("{path} is not a directory", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(name, format!("{path} not found", path = path.display())),
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::warn(name, format!("{path} not found", path = path.display()));
        }
        match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
            Ok(conn) => {
                let pragma: rusqlite::Result<String> =
                    conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
                match pragma {
                    Ok(result) if result.to_lowercase() == "ok" => {
                        HealthEntry::ok(name, "integrity ok".to_string())
                    }
                    Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                    Err(err) => HealthEntry::warn(name, format!("error: {err}")),
                }
            }
            Err(err) => HealthEntry::error(name, format!("failed to open: {err}")),
        }
    }

    fn check_control(&self) -> HealthEntry {
        let client = ControlClient::new(&self.control_addr);
        match client.send("LIST", None) {
            Ok(_) => HealthEntry::ok("control", self.control_addr.clone()),
            Err(err) => HealthEntry::warn("control", format!("{err}")),
        }
    }
}

fn reply_text(reply: serde_json::Value) -> String {
    match reply {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Blocking client for the daemon's request/reply control socket.
pub struct ControlClient {
    addr: String,
}

impl ControlClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn send(&self, command: &str, argument: Option<&str>) -> Result<serde_json::Value> {
        let mut stream =
            TcpStream::connect(&self.addr).map_err(|source| AppError::ControlUnreachable {
                addr: self.addr.clone(),
                source,
            })?;
        let mut payload = json!({ "c": command });
        if let Some(argument) = argument {
            payload["a"] = json!(argument);
        }
        let mut request = serde_json::to_vec(&payload)?;
        request.push(b'\n');
        stream.write_all(&request)?;
        stream.flush()?;

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub node_name: String,
    pub environment: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub queue_counts: HashMap<String, i64>,
    pub jobs_disabled: bool,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Node: {} (env: {})",
            self.node_name, self.environment
        )];
        if self.jobs_disabled {
            lines.push("Jobs: disabled".to_string());
        }
        if self.queue_counts.is_empty() {
            lines.push("Queue: empty".to_string());
        } else {
            lines.push("Queue:".to_string());
            for (status, count) in self.queue_counts.iter() {
                lines.push(format!("  - {status}: {count}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct QueueList {
    pub rows: Vec<QueueRow>,
}

#[derive(Debug, Serialize)]
pub struct QueueRow {
    pub id: i64,
    pub channel_id: String,
    pub file_name: String,
    pub status: String,
    pub attempts: i64,
    pub error: Option<String>,
    pub created_at: String,
}

impl DisplayFallback for QueueList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Queue empty".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let error = entry.error.as_deref().unwrap_or("-");
            lines.push(format!(
                "#{id} {channel}/{file} status={status} attempts={attempts} error={error}",
                id = entry.id,
                channel = entry.channel_id,
                file = entry.file_name,
                status = entry.status,
                attempts = entry.attempts,
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct BackupResult {
    pub status: String,
    pub output: String,
}

impl DisplayFallback for BackupResult {
    fn display(&self) -> String {
        format!("backup written to {}", self.output)
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobsReply {
    List(Vec<JobRow>),
    Message(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    #[serde(rename = "lastExecution", skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<String>,
}

impl DisplayFallback for JobsReply {
    fn display(&self) -> String {
        match self {
            JobsReply::Message(message) => message.clone(),
            JobsReply::List(rows) => {
                if rows.is_empty() {
                    return "no jobs registered".to_string();
                }
                let mut lines = Vec::new();
                for row in rows {
                    let last = row.last_execution.as_deref().unwrap_or("never");
                    let executing = if row.is_running { " (executing)" } else { "" };
                    lines.push(format!(
                        "{id}: {status}{executing}, last execution {last}",
                        id = row.id,
                        status = row.status,
                    ));
                }
                lines.join("\n")
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}
