use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use vodforge_core::{
    ControlEndpoint, ExecutionTracker, JobError, RecordingQueueStore, ScheduledJob, Scheduler,
};

struct NoopJob {
    id: &'static str,
}

#[async_trait::async_trait]
impl ScheduledJob for NoopJob {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn execute(&self) -> Result<(), JobError> {
        Ok(())
    }
}

async fn setup(jobs_disabled: bool) -> (TempDir, RecordingQueueStore, Arc<Scheduler>, SocketAddr) {
    let dir = TempDir::new().unwrap();
    let store = RecordingQueueStore::builder()
        .path(dir.path().join("recordings.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    store.set_jobs_disabled(jobs_disabled).unwrap();

    let tracker = ExecutionTracker::new(store.path());
    let mut scheduler = Scheduler::new(store.clone(), tracker);
    scheduler.register(
        Arc::new(NoopJob { id: "process-queue" }),
        Duration::from_secs(3600),
    );
    scheduler.register(Arc::new(NoopJob { id: "cleanup" }), Duration::from_secs(3600));
    let scheduler = Arc::new(scheduler);

    let endpoint = ControlEndpoint::bind(Arc::clone(&scheduler), "127.0.0.1:0")
        .await
        .unwrap();
    let addr = endpoint.local_addr().unwrap();
    tokio::spawn(endpoint.serve());
    (dir, store, scheduler, addr)
}

async fn send(addr: SocketAddr, payload: &str) -> serde_json::Value {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(payload.as_bytes()).await.unwrap();
    write_half.write_all(b"\n").await.unwrap();
    write_half.flush().await.unwrap();

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    serde_json::from_str(line.trim()).unwrap()
}

#[tokio::test]
async fn list_before_any_execution_omits_timestamps() {
    let (_dir, _store, _scheduler, addr) = setup(true).await;

    let reply = send(addr, r#"{"c":"LIST"}"#).await;
    let tasks = reply.as_array().expect("array reply");
    assert_eq!(tasks.len(), 2);
    for task in tasks {
        assert_eq!(task.get("status").unwrap(), "running");
        assert_eq!(task.get("isRunning").unwrap(), false);
        assert!(task.get("lastExecution").is_none());
    }
    let ids: Vec<&str> = tasks
        .iter()
        .map(|task| task.get("id").unwrap().as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["process-queue", "cleanup"]);
}

#[tokio::test]
async fn start_and_stop_target_single_jobs() {
    let (_dir, _store, _scheduler, addr) = setup(true).await;

    let reply = send(addr, r#"{"c":"STOP","a":"process-queue"}"#).await;
    assert_eq!(reply, "process-queue");

    let list = send(addr, r#"{"c":"LIST"}"#).await;
    let stopped = list
        .as_array()
        .unwrap()
        .iter()
        .find(|task| task.get("id").unwrap() == "process-queue")
        .unwrap();
    assert_eq!(stopped.get("status").unwrap(), "stopped");

    let reply = send(addr, r#"{"c":"START","a":"process-queue"}"#).await;
    assert_eq!(reply, "process-queue");

    let reply = send(addr, r#"{"c":"START","a":"bogus"}"#).await;
    assert_eq!(reply, "unknown job: bogus");

    let reply = send(addr, r#"{"c":"START"}"#).await;
    assert_eq!(reply, "no id supplied");
    let reply = send(addr, r#"{"c":"STOP"}"#).await;
    assert_eq!(reply, "no id supplied");
}

#[tokio::test]
async fn start_all_respects_the_kill_switch() {
    let (_dir, store, _scheduler, addr) = setup(true).await;

    let reply = send(addr, r#"{"c":"START_ALL"}"#).await;
    assert_eq!(reply, "cannot resume, jobs are disabled");

    store.set_jobs_disabled(false).unwrap();
    let reply = send(addr, r#"{"c":"START_ALL"}"#).await;
    assert_eq!(reply, "all jobs running");

    let reply = send(addr, r#"{"c":"STOP_ALL"}"#).await;
    assert_eq!(reply, "all jobs stopped");
    let list = send(addr, r#"{"c":"LIST"}"#).await;
    for task in list.as_array().unwrap() {
        assert_eq!(task.get("status").unwrap(), "stopped");
    }
}

#[tokio::test]
async fn malformed_requests_get_an_error_reply() {
    let (_dir, _store, _scheduler, addr) = setup(true).await;
    let reply = send(addr, "{not json").await;
    let text = reply.as_str().unwrap();
    assert!(text.starts_with("invalid request:"));
}
