use std::path::Path;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use vodforge_core::{
    NewSegment, QueueFilter, RecordingQueueStore, RecordingState, Stage, StorageMode, Visibility,
    MAX_ATTEMPTS, SOFT_EXPIRY_HOURS,
};

fn temp_store(dir: &Path) -> RecordingQueueStore {
    let store = RecordingQueueStore::builder()
        .path(dir.join("recordings.sqlite"))
        .create_if_missing(true)
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

fn segment(channel: &str, file: &str, recorded_at: chrono::DateTime<Utc>) -> NewSegment {
    NewSegment {
        channel_id: channel.into(),
        file_name: file.into(),
        recorded_at,
        visibility: Visibility::Public,
        storage: StorageMode::Local,
    }
}

#[test]
fn register_and_list_entries() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let id = store
        .register_segment(&segment("channel-a", "seg_0001.mp4", Utc::now()))
        .unwrap();

    let list = store
        .list(&QueueFilter {
            status: Some(RecordingState::Pending),
            channel: Some("channel-a".into()),
            limit: Some(10),
        })
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, id);
    assert_eq!(list[0].attempts, 0);
    assert_eq!(list[0].visibility, Visibility::Public);
    assert_eq!(
        list[0].object_key(),
        "recordings/channel-a/seg_0001.mp4"
    );
}

#[test]
fn remote_segments_start_in_recording_state() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let mut remote = segment("channel-a", "seg_0001.mp4", Utc::now());
    remote.storage = StorageMode::Remote;
    let id = store.register_segment(&remote).unwrap();
    assert_eq!(
        store.fetch(id).unwrap().unwrap().status,
        RecordingState::Recording
    );

    assert!(store.mark_uploading(id).unwrap());
    assert!(store.mark_uploaded(id).unwrap());
    assert_eq!(
        store.fetch(id).unwrap().unwrap().status,
        RecordingState::Pending
    );
}

#[test]
fn channel_and_file_name_are_unique() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let first = segment("channel-a", "seg_0001.mp4", Utc::now());
    store.register_segment(&first).unwrap();
    assert!(store.register_segment(&first).is_err());

    // Same file name on a different channel is fine.
    let other = segment("channel-b", "seg_0001.mp4", Utc::now());
    store.register_segment(&other).unwrap();
}

#[test]
fn oldest_entry_is_selected_first() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let now = Utc::now();
    let newer = store
        .register_segment(&segment("channel-a", "seg_0002.mp4", now))
        .unwrap();
    let older = store
        .register_segment(&segment(
            "channel-a",
            "seg_0001.mp4",
            now - Duration::seconds(10),
        ))
        .unwrap();

    let picked = store.next_eligible(now, &[]).unwrap().unwrap();
    assert_eq!(picked.id, older);

    let picked = store.next_eligible(now, &[older]).unwrap().unwrap();
    assert_eq!(picked.id, newer);
}

#[test]
fn eligibility_window_boundary() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let now = Utc::now();
    store
        .register_segment(&segment(
            "channel-a",
            "inside.mp4",
            now - Duration::hours(SOFT_EXPIRY_HOURS) + Duration::seconds(1),
        ))
        .unwrap();
    store
        .register_segment(&segment(
            "channel-a",
            "outside.mp4",
            now - Duration::hours(SOFT_EXPIRY_HOURS) - Duration::seconds(1),
        ))
        .unwrap();

    let picked = store.next_eligible(now, &[]).unwrap().unwrap();
    assert_eq!(picked.file_name, "inside.mp4");
    let rest = store.next_eligible(now, &[picked.id]).unwrap();
    assert!(rest.is_none());
}

#[test]
fn claim_is_atomic_and_exclusive() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let id = store
        .register_segment(&segment("channel-a", "seg_0001.mp4", Utc::now()))
        .unwrap();

    assert!(store
        .claim_stage(
            id,
            &[RecordingState::Pending, RecordingState::Failed],
            Stage::Encoding,
            false,
        )
        .unwrap());
    let entry = store.fetch(id).unwrap().unwrap();
    assert_eq!(entry.status, RecordingState::Encoding);
    assert!(entry.started_at.is_some());

    // A second claimant loses: the status guard no longer matches.
    assert!(!store
        .claim_stage(
            id,
            &[RecordingState::Pending, RecordingState::Failed],
            Stage::Encoding,
            false,
        )
        .unwrap());
}

#[test]
fn failed_entries_retry_until_attempts_cap() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let now = Utc::now();
    let id = store
        .register_segment(&segment("channel-a", "seg_0001.mp4", now))
        .unwrap();

    for expected_attempts in 1..=MAX_ATTEMPTS {
        assert!(store
            .claim_stage(
                id,
                &[RecordingState::Pending, RecordingState::Failed],
                Stage::Encoding,
                false,
            )
            .unwrap());
        store.mark_failed(id, Stage::Encoding).unwrap();
        let entry = store.fetch(id).unwrap().unwrap();
        assert_eq!(entry.attempts, expected_attempts);
        assert_eq!(entry.error.as_deref(), Some("encoding"));
    }

    // Attempts exhausted: the entry is parked for good.
    assert!(store.next_eligible(now, &[]).unwrap().is_none());
}

#[test]
fn entering_merging_from_encoded_resets_residual_attempts() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let id = store
        .register_segment(&segment("channel-a", "seg_0001.mp4", Utc::now()))
        .unwrap();

    store
        .claim_stage(
            id,
            &[RecordingState::Pending, RecordingState::Failed],
            Stage::Encoding,
            false,
        )
        .unwrap();
    store.mark_failed(id, Stage::Encoding).unwrap();
    store
        .claim_stage(
            id,
            &[RecordingState::Pending, RecordingState::Failed],
            Stage::Encoding,
            false,
        )
        .unwrap();
    assert!(store.mark_encoded(id).unwrap());
    let entry = store.fetch(id).unwrap().unwrap();
    assert_eq!(entry.attempts, 1);

    assert!(store
        .claim_stage(
            id,
            &[RecordingState::Encoded, RecordingState::Failed],
            Stage::Merging,
            true,
        )
        .unwrap());
    let entry = store.fetch(id).unwrap().unwrap();
    assert_eq!(entry.status, RecordingState::Merging);
    assert_eq!(entry.attempts, 0);
    assert!(entry.error.is_none());
}

#[test]
fn merge_chain_records_run_membership() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let now = Utc::now();
    let head = store
        .register_segment(&segment("channel-a", "seg_0001.mp4", now - Duration::seconds(20)))
        .unwrap();
    let tail = store
        .register_segment(&segment("channel-a", "seg_0002.mp4", now))
        .unwrap();

    store
        .claim_stage(
            tail,
            &[RecordingState::Pending, RecordingState::Failed],
            Stage::Merging,
            false,
        )
        .unwrap();
    assert!(store.mark_merged(tail, Some(head)).unwrap());
    store.append_segment(head, tail).unwrap();

    let tail_entry = store.fetch(tail).unwrap().unwrap();
    assert_eq!(tail_entry.first_segment_id, Some(head));
    let head_entry = store.fetch(head).unwrap().unwrap();
    assert_eq!(head_entry.segment_ids, vec![tail]);
}

#[test]
fn jobs_disabled_flag_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    assert!(!store.jobs_disabled().unwrap());
    store.set_jobs_disabled(true).unwrap();
    assert!(store.jobs_disabled().unwrap());
    store.set_jobs_disabled(false).unwrap();
    assert!(!store.jobs_disabled().unwrap());
}

#[test]
fn summary_and_backup() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store
        .register_segment(&segment("channel-a", "seg_0001.mp4", Utc::now()))
        .unwrap();

    let summary = store.summary().unwrap();
    assert_eq!(summary.counts.get(&RecordingState::Pending), Some(&1));

    let backup_path = dir.path().join("recordings_backup.sql.gz");
    store.export_backup(&backup_path).unwrap();
    assert!(backup_path.exists());
}
