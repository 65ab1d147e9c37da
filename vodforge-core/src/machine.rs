use chrono::{DateTime, Duration, Utc};

use crate::queue::{RecordingEntry, RecordingState, Stage, MAX_ATTEMPTS, SOFT_EXPIRY_HOURS};

/// What the drain loop should do with an entry it pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Probe, re-encode at original bitrate/resolution, validate.
    Encode,
    /// Merge with the previous contiguous segment of the same run.
    Merge,
    /// Commit the final merged -> completed transition.
    Finalize,
    /// Entry is still owned by the ingest side; nothing to do this pass.
    Wait,
}

/// Decide the next transition for an entry. Pure; the drain loop owns
/// claiming, execution and persistence of the outcome.
pub fn decide(entry: &RecordingEntry) -> NextAction {
    match entry.status {
        RecordingState::Pending => NextAction::Encode,
        RecordingState::Encoded => NextAction::Merge,
        RecordingState::Merged => NextAction::Finalize,
        RecordingState::Failed => match entry.retryable_stage() {
            Some(Stage::Encoding) => NextAction::Encode,
            Some(Stage::Merging) => NextAction::Merge,
            None => NextAction::Wait,
        },
        _ => NextAction::Wait,
    }
}

/// Selection predicate for the drain loop, mirrored by the store's
/// `next_eligible` query. Kept in sync with the SQL by the tests below.
pub fn is_eligible(entry: &RecordingEntry, now: DateTime<Utc>) -> bool {
    if matches!(
        entry.status,
        RecordingState::Completed
            | RecordingState::Merging
            | RecordingState::Encoding
            | RecordingState::Expired
    ) {
        return false;
    }
    if entry.status == RecordingState::Failed {
        let retryable = entry
            .error
            .as_deref()
            .and_then(Stage::from_reason)
            .is_some();
        if !retryable || entry.attempts >= MAX_ATTEMPTS {
            return false;
        }
    }
    entry.created_at >= now - Duration::hours(SOFT_EXPIRY_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Visibility;

    fn entry(status: RecordingState) -> RecordingEntry {
        RecordingEntry {
            id: 1,
            channel_id: "channel-a".into(),
            file_name: "seg_0001.mp4".into(),
            status,
            error: None,
            attempts: 0,
            created_at: Utc::now() - Duration::hours(1),
            started_at: None,
            finished_at: None,
            first_segment_id: None,
            segment_ids: Vec::new(),
            visibility: Visibility::Public,
        }
    }

    fn failed(stage: &str, attempts: i64) -> RecordingEntry {
        let mut e = entry(RecordingState::Failed);
        e.error = Some(stage.to_string());
        e.attempts = attempts;
        e
    }

    #[test]
    fn pending_entries_encode() {
        assert_eq!(decide(&entry(RecordingState::Pending)), NextAction::Encode);
    }

    #[test]
    fn encoded_entries_merge_and_merged_finalize() {
        assert_eq!(decide(&entry(RecordingState::Encoded)), NextAction::Merge);
        assert_eq!(decide(&entry(RecordingState::Merged)), NextAction::Finalize);
    }

    #[test]
    fn ingest_owned_states_wait() {
        assert_eq!(decide(&entry(RecordingState::Recording)), NextAction::Wait);
        assert_eq!(decide(&entry(RecordingState::Uploading)), NextAction::Wait);
    }

    #[test]
    fn failed_stages_retry_until_the_cap() {
        assert_eq!(decide(&failed("encoding", 2)), NextAction::Encode);
        assert_eq!(decide(&failed("merging", 2)), NextAction::Merge);
        assert_eq!(decide(&failed("encoding", 3)), NextAction::Wait);
        assert_eq!(decide(&failed("merging", 3)), NextAction::Wait);
    }

    #[test]
    fn failed_with_free_text_reason_is_not_retried() {
        assert_eq!(decide(&failed("disk full", 0)), NextAction::Wait);
    }

    #[test]
    fn eligibility_excludes_in_stage_and_terminal_states() {
        let now = Utc::now();
        for status in [
            RecordingState::Completed,
            RecordingState::Merging,
            RecordingState::Encoding,
            RecordingState::Expired,
        ] {
            assert!(!is_eligible(&entry(status), now), "{status} must be excluded");
        }
        for status in [
            RecordingState::Recording,
            RecordingState::Pending,
            RecordingState::Uploading,
            RecordingState::Encoded,
            RecordingState::Merged,
        ] {
            assert!(is_eligible(&entry(status), now), "{status} must be eligible");
        }
    }

    #[test]
    fn failed_eligibility_tracks_attempts() {
        let now = Utc::now();
        assert!(is_eligible(&failed("encoding", 0), now));
        assert!(is_eligible(&failed("encoding", 2), now));
        assert!(!is_eligible(&failed("encoding", 3), now));
        assert!(!is_eligible(&failed("oom", 0), now));
    }

    #[test]
    fn eligibility_window_boundary() {
        let now = Utc::now();
        let mut inside = entry(RecordingState::Pending);
        inside.created_at = now - Duration::hours(SOFT_EXPIRY_HOURS) + Duration::seconds(1);
        assert!(is_eligible(&inside, now));

        let mut outside = entry(RecordingState::Pending);
        outside.created_at = now - Duration::hours(SOFT_EXPIRY_HOURS) - Duration::seconds(1);
        assert!(!is_eligible(&outside, now));
    }
}
