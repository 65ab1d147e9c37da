use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::scheduler::Scheduler;

pub const NO_ID_REPLY: &str = "no id supplied";
pub const CANNOT_RESUME_REPLY: &str = "cannot resume, jobs are disabled";

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to bind control socket {addr}: {source}")]
    Bind {
        source: std::io::Error,
        addr: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandCode {
    List,
    Start,
    StartAll,
    Stop,
    StopAll,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub c: CommandCode,
    #[serde(default)]
    pub a: Option<String>,
}

#[derive(Debug, Serialize)]
struct TaskReply {
    id: String,
    status: &'static str,
    #[serde(rename = "isRunning")]
    is_running: bool,
    #[serde(rename = "lastExecution", skip_serializing_if = "Option::is_none")]
    last_execution: Option<String>,
}

/// Reply socket for the external web process. One connection, one
/// request, one reply at a time; commands are never dispatched
/// concurrently.
pub struct ControlEndpoint {
    scheduler: Arc<Scheduler>,
    listener: TcpListener,
}

impl ControlEndpoint {
    pub async fn bind(scheduler: Arc<Scheduler>, addr: &str) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ControlError::Bind {
                source,
                addr: addr.to_string(),
            })?;
        Ok(Self {
            scheduler,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<(), ControlError> {
        info!(addr = %self.listener.local_addr()?, "control endpoint listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "control accept failed");
                    continue;
                }
            };
            if let Err(error) = self.handle(stream).await {
                warn!(%peer, %error, "control session failed");
            }
        }
    }

    async fn handle(&self, stream: TcpStream) -> Result<(), ControlError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let reply = match serde_json::from_str::<ControlRequest>(line.trim()) {
            Ok(request) => self.dispatch(&request),
            Err(error) => json!(format!("invalid request: {error}")),
        };

        let mut payload = serde_json::to_vec(&reply)?;
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
        write_half.flush().await?;
        Ok(())
    }

    fn dispatch(&self, request: &ControlRequest) -> serde_json::Value {
        match request.c {
            CommandCode::List => {
                let tasks: Vec<TaskReply> = self
                    .scheduler
                    .list()
                    .into_iter()
                    .map(|task| TaskReply {
                        id: task.id,
                        status: if task.running { "running" } else { "stopped" },
                        is_running: task.executing,
                        last_execution: task.last_execution.map(|at| at.to_rfc3339()),
                    })
                    .collect();
                json!(tasks)
            }
            CommandCode::Start => match request.a.as_deref() {
                Some(id) if self.scheduler.start(id) => json!(id),
                Some(id) => json!(format!("unknown job: {id}")),
                None => json!(NO_ID_REPLY),
            },
            CommandCode::Stop => match request.a.as_deref() {
                Some(id) if self.scheduler.stop(id) => json!(id),
                Some(id) => json!(format!("unknown job: {id}")),
                None => json!(NO_ID_REPLY),
            },
            CommandCode::StartAll => {
                if self.scheduler.jobs_disabled() {
                    json!(CANNOT_RESUME_REPLY)
                } else {
                    self.scheduler.start_all();
                    json!("all jobs running")
                }
            }
            CommandCode::StopAll => {
                self.scheduler.stop_all();
                json!("all jobs stopped")
            }
        }
    }
}
