use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;
use tokio::process::Command;
use vodforge_core::{
    object_key, CommandExecutor, FsObjectStorage, MediaPipeline, MediaSection, NewSegment,
    ObjectStorage, QueueDrain, RecordingQueueStore, RecordingState, StorageMode, Visibility,
};

/// Fakes ffmpeg/ffprobe: probes report a fixed rendition and duration,
/// ffmpeg invocations fabricate their output file. Encode calls can be
/// forced to fail to exercise the retry path.
struct StubExecutor {
    fail_encode: bool,
    probe_duration: f64,
}

impl StubExecutor {
    fn ok(duration: f64) -> Self {
        Self {
            fail_encode: false,
            probe_duration: duration,
        }
    }

    fn failing_encode() -> Self {
        Self {
            fail_encode: true,
            probe_duration: 4.0,
        }
    }
}

fn output(code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Output {
    Output {
        status: ExitStatus::from_raw(code << 8),
        stdout,
        stderr,
    }
}

#[async_trait::async_trait]
impl CommandExecutor for StubExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        let std_command = command.as_std();
        let program = std_command.get_program().to_string_lossy().to_string();
        let args: Vec<String> = std_command
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        if program.ends_with("ffprobe") {
            let payload = format!(
                r#"{{"streams":[{{"width":1280,"height":720,"bit_rate":"1500000"}}],"format":{{"duration":"{}","bit_rate":"1500000"}}}}"#,
                self.probe_duration
            );
            return Ok(output(0, payload.into_bytes(), Vec::new()));
        }

        if self.fail_encode && args.iter().any(|arg| arg == "-c:v") {
            return Ok(output(1, Vec::new(), b"encoder exploded".to_vec()));
        }
        if let Some(target) = args.last() {
            if target != "-" {
                std::fs::write(target, b"media")?;
            }
        }
        Ok(output(0, Vec::new(), Vec::new()))
    }
}

struct Harness {
    dir: TempDir,
    store: RecordingQueueStore,
    storage: Arc<FsObjectStorage>,
    drain: QueueDrain,
}

fn harness(executor: StubExecutor) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = RecordingQueueStore::builder()
        .path(dir.path().join("recordings.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();

    let media = MediaSection {
        ffmpeg: "ffmpeg".into(),
        ffprobe: "ffprobe".into(),
        log_level: "error".into(),
        thumbnail_offset_s: 1,
    };
    let pipeline = Arc::new(MediaPipeline::new(&media, Some(Arc::new(executor))));
    let storage = Arc::new(FsObjectStorage::new(dir.path().join("objects")));
    let drain = QueueDrain::new(
        store.clone(),
        pipeline,
        storage.clone() as Arc<dyn ObjectStorage>,
        dir.path().join("work"),
        2000,
    );
    Harness {
        dir,
        store,
        storage,
        drain,
    }
}

async fn ingest(
    harness: &Harness,
    channel: &str,
    file: &str,
    recorded_at: DateTime<Utc>,
) -> i64 {
    let id = harness
        .store
        .register_segment(&NewSegment {
            channel_id: channel.into(),
            file_name: file.into(),
            recorded_at,
            visibility: Visibility::Public,
            storage: StorageMode::Remote,
        })
        .unwrap();
    // The ingest side uploads the raw segment, then flips the entry.
    let raw = harness.dir.path().join(format!("raw_{file}"));
    tokio::fs::write(&raw, b"raw segment").await.unwrap();
    harness
        .storage
        .upload(&object_key(channel, file), Path::new(&raw))
        .await
        .unwrap();
    assert!(harness.store.mark_uploaded(id).unwrap());
    id
}

#[tokio::test]
async fn pending_segment_reaches_completed() {
    let harness = harness(StubExecutor::ok(4.0));
    let id = ingest(&harness, "channel-a", "seg_0001.mp4", Utc::now() - Duration::hours(1)).await;

    let report = harness.drain.run_once().await.unwrap();
    assert_eq!(report.encoded, 1);
    assert_eq!(report.merged, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);

    let entry = harness.store.fetch(id).unwrap().unwrap();
    assert_eq!(entry.status, RecordingState::Completed);
    assert_eq!(entry.attempts, 0);
    assert!(entry.first_segment_id.is_none());
    assert!(harness
        .storage
        .exists(&object_key("channel-a", "seg_0001.mp4"))
        .await
        .unwrap());

    // Nothing actionable remains.
    let idle = harness.drain.run_once().await.unwrap();
    assert_eq!(idle.processed, 0);
}

#[tokio::test]
async fn contiguous_segment_merges_into_the_run_head() {
    let harness = harness(StubExecutor::ok(4.0));
    let start = Utc::now() - Duration::hours(1);
    let head = ingest(&harness, "channel-a", "seg_0001.mp4", start).await;
    // Recorded 5s after the head; the head covers 4s, so the gap is 1s.
    let tail = ingest(
        &harness,
        "channel-a",
        "seg_0002.mp4",
        start + Duration::seconds(5),
    )
    .await;

    harness.drain.run_once().await.unwrap();

    let head_entry = harness.store.fetch(head).unwrap().unwrap();
    assert_eq!(head_entry.status, RecordingState::Completed);
    assert_eq!(head_entry.segment_ids, vec![tail]);

    let tail_entry = harness.store.fetch(tail).unwrap().unwrap();
    assert_eq!(tail_entry.status, RecordingState::Completed);
    assert_eq!(tail_entry.first_segment_id, Some(head));

    // The consumed segment's raw object is gone; the run head object
    // and its thumbnail hold the merged recording.
    assert!(!harness
        .storage
        .exists(&object_key("channel-a", "seg_0002.mp4"))
        .await
        .unwrap());
    assert!(harness
        .storage
        .exists(&object_key("channel-a", "seg_0001.mp4"))
        .await
        .unwrap());
    assert!(harness
        .storage
        .exists("recordings/channel-a/seg_0001.jpg")
        .await
        .unwrap());
}

#[tokio::test]
async fn distant_segment_starts_its_own_run() {
    let harness = harness(StubExecutor::ok(4.0));
    let start = Utc::now() - Duration::hours(1);
    let head = ingest(&harness, "channel-a", "seg_0001.mp4", start).await;
    // 10s after a 4s head: 6s gap, beyond the 2s proximity window.
    let solo = ingest(
        &harness,
        "channel-a",
        "seg_0002.mp4",
        start + Duration::seconds(10),
    )
    .await;

    harness.drain.run_once().await.unwrap();

    let solo_entry = harness.store.fetch(solo).unwrap().unwrap();
    assert_eq!(solo_entry.status, RecordingState::Completed);
    assert!(solo_entry.first_segment_id.is_none());
    assert!(harness
        .store
        .fetch(head)
        .unwrap()
        .unwrap()
        .segment_ids
        .is_empty());
    assert!(harness
        .storage
        .exists(&object_key("channel-a", "seg_0002.mp4"))
        .await
        .unwrap());
}

#[tokio::test]
async fn failing_encode_exhausts_attempts_and_parks_the_entry() {
    let harness = harness(StubExecutor::failing_encode());
    let id = ingest(&harness, "channel-a", "seg_0001.mp4", Utc::now() - Duration::hours(1)).await;

    let report = harness.drain.run_once().await.unwrap();
    assert_eq!(report.failed, 3);
    assert_eq!(report.encoded, 0);

    let entry = harness.store.fetch(id).unwrap().unwrap();
    assert_eq!(entry.status, RecordingState::Failed);
    assert_eq!(entry.error.as_deref(), Some("encoding"));
    assert_eq!(entry.attempts, 3);

    // Exhausted entries are never selected again.
    let idle = harness.drain.run_once().await.unwrap();
    assert_eq!(idle.processed, 0);
}
