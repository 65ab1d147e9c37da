use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::fs as async_fs;
use tracing::{debug, info, warn};

use crate::machine::{self, NextAction};
use crate::media::MediaPipeline;
use crate::queue::{
    QueueResult, RecordingEntry, RecordingQueueStore, RecordingState, Stage,
};
use crate::scheduler::{JobError, ScheduledJob};
use crate::storage::{thumbnail_key, ObjectStorage, StorageError};

/// Result of executing one transition on one entry.
///
/// `Failed` is a media-tool failure and becomes a FAILED transition with
/// an attempts bump; `Aborted` is an infrastructure failure and leaves
/// the persisted state alone for the next pass (or the sweeper).
#[derive(Debug)]
pub enum StageOutcome {
    Advanced,
    Failed { stage: Stage, detail: String },
    Aborted { reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub encoded: usize,
    pub merged: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
}

pub struct QueueDrain {
    store: RecordingQueueStore,
    pipeline: Arc<MediaPipeline>,
    storage: Arc<dyn ObjectStorage>,
    work_dir: PathBuf,
    proximity: Duration,
}

impl QueueDrain {
    pub fn new(
        store: RecordingQueueStore,
        pipeline: Arc<MediaPipeline>,
        storage: Arc<dyn ObjectStorage>,
        work_dir: impl Into<PathBuf>,
        proximity_threshold_ms: u64,
    ) -> Self {
        Self {
            store,
            pipeline,
            storage,
            work_dir: work_dir.into(),
            proximity: Duration::milliseconds(proximity_threshold_ms as i64),
        }
    }

    /// One drain pass: pull the oldest eligible entry, execute one
    /// transition, repeat until nothing actionable remains.
    pub async fn run_once(&self) -> QueueResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut excluded: Vec<i64> = Vec::new();
        while let Some(entry) = self.store.next_eligible(Utc::now(), &excluded)? {
            let action = machine::decide(&entry);
            let outcome = match action {
                NextAction::Wait => {
                    debug!(entry_id = entry.id, status = %entry.status, "entry not actionable yet");
                    excluded.push(entry.id);
                    report.skipped += 1;
                    continue;
                }
                NextAction::Encode => self.encode(&entry).await,
                NextAction::Merge => self.merge(&entry).await,
                NextAction::Finalize => self.finalize(&entry),
            };
            report.processed += 1;
            match outcome {
                StageOutcome::Advanced => match action {
                    NextAction::Encode => report.encoded += 1,
                    NextAction::Merge => report.merged += 1,
                    NextAction::Finalize => report.completed += 1,
                    NextAction::Wait => {}
                },
                StageOutcome::Failed { stage, detail } => {
                    warn!(entry_id = entry.id, stage = %stage, detail = %detail, "stage failed");
                    if let Err(error) = self.store.mark_failed(entry.id, stage) {
                        warn!(entry_id = entry.id, %error, "could not record stage failure");
                        excluded.push(entry.id);
                    }
                    report.failed += 1;
                }
                StageOutcome::Aborted { reason } => {
                    warn!(entry_id = entry.id, reason = %reason, "pass aborted for entry");
                    excluded.push(entry.id);
                    report.aborted += 1;
                }
            }
        }
        if report.processed > 0 {
            info!(
                processed = report.processed,
                encoded = report.encoded,
                merged = report.merged,
                completed = report.completed,
                failed = report.failed,
                "drain pass finished"
            );
        }
        Ok(report)
    }

    async fn encode(&self, entry: &RecordingEntry) -> StageOutcome {
        match self.store.claim_stage(
            entry.id,
            &[RecordingState::Pending, RecordingState::Failed],
            Stage::Encoding,
            false,
        ) {
            Ok(true) => {}
            Ok(false) => {
                return StageOutcome::Aborted {
                    reason: "lost claim to a concurrent transition".into(),
                }
            }
            Err(error) => {
                return StageOutcome::Aborted {
                    reason: error.to_string(),
                }
            }
        }

        let scratch = self.work_dir.join(format!("entry_{}", entry.id));
        if let Err(error) = async_fs::create_dir_all(&scratch).await {
            return StageOutcome::Aborted {
                reason: format!("cannot create work dir: {error}"),
            };
        }

        let key = entry.object_key();
        let raw = scratch.join(&entry.file_name);
        if let Err(error) = self.storage.download(&key, &raw).await {
            return StageOutcome::Aborted {
                reason: format!("download of {key} failed: {error}"),
            };
        }

        let probe = match self.pipeline.probe(&raw).await {
            Ok(probe) => probe,
            Err(error) => {
                self.cleanup(&scratch).await;
                return StageOutcome::Failed {
                    stage: Stage::Encoding,
                    detail: error.to_string(),
                };
            }
        };

        let encoded = scratch.join(format!("encoded_{}", entry.file_name));
        if let Err(error) = self.pipeline.reencode(&raw, &encoded, &probe).await {
            self.cleanup(&scratch).await;
            return StageOutcome::Failed {
                stage: Stage::Encoding,
                detail: error.to_string(),
            };
        }
        if let Err(error) = self.pipeline.validate(&encoded).await {
            self.cleanup(&scratch).await;
            return StageOutcome::Failed {
                stage: Stage::Encoding,
                detail: error.to_string(),
            };
        }

        // Upload trouble is not the media tool's fault: leave the local
        // files for inspection and let the next pass start over.
        if let Err(error) = self.storage.upload(&key, &encoded).await {
            return StageOutcome::Aborted {
                reason: format!("upload of {key} failed: {error}"),
            };
        }

        let outcome = match self.store.mark_encoded(entry.id) {
            Ok(true) => {
                debug!(entry_id = entry.id, width = probe.width, height = probe.height, "segment re-encoded");
                StageOutcome::Advanced
            }
            Ok(false) => StageOutcome::Aborted {
                reason: "entry left encoding state mid-stage".into(),
            },
            Err(error) => StageOutcome::Aborted {
                reason: error.to_string(),
            },
        };
        self.cleanup(&scratch).await;
        outcome
    }

    async fn merge(&self, entry: &RecordingEntry) -> StageOutcome {
        // A retried encode that finally succeeded arrives here as
        // ENCODED with residual attempts; entering MERGING wipes them.
        let reset_attempts = entry.status == RecordingState::Encoded && entry.attempts > 0;
        match self.store.claim_stage(
            entry.id,
            &[RecordingState::Encoded, RecordingState::Failed],
            Stage::Merging,
            reset_attempts,
        ) {
            Ok(true) => {}
            Ok(false) => {
                return StageOutcome::Aborted {
                    reason: "lost claim to a concurrent transition".into(),
                }
            }
            Err(error) => {
                return StageOutcome::Aborted {
                    reason: error.to_string(),
                }
            }
        }

        let predecessor = match self.store.predecessor(&entry.channel_id, entry.created_at) {
            Ok(predecessor) => predecessor,
            Err(error) => {
                return StageOutcome::Aborted {
                    reason: error.to_string(),
                }
            }
        };
        let Some(predecessor) = predecessor else {
            return self.begin_run(entry);
        };

        let head_id = predecessor.first_segment_id.unwrap_or(predecessor.id);
        let head = match self.store.fetch(head_id) {
            Ok(Some(head)) => head,
            // Run head already swept away; this segment starts over.
            Ok(None) => return self.begin_run(entry),
            Err(error) => {
                return StageOutcome::Aborted {
                    reason: error.to_string(),
                }
            }
        };

        let scratch = self.work_dir.join(format!("entry_{}", entry.id));
        if let Err(error) = async_fs::create_dir_all(&scratch).await {
            return StageOutcome::Aborted {
                reason: format!("cannot create work dir: {error}"),
            };
        }

        let head_key = head.object_key();
        let run_local = scratch.join(format!("run_{}", head.file_name));
        match self.storage.download(&head_key, &run_local).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                self.cleanup(&scratch).await;
                return self.begin_run(entry);
            }
            Err(error) => {
                return StageOutcome::Aborted {
                    reason: format!("download of {head_key} failed: {error}"),
                }
            }
        }

        let entry_key = entry.object_key();
        let current_local = scratch.join(&entry.file_name);
        if let Err(error) = self.storage.download(&entry_key, &current_local).await {
            return StageOutcome::Aborted {
                reason: format!("download of {entry_key} failed: {error}"),
            };
        }

        let run_probe = match self.pipeline.probe(&run_local).await {
            Ok(probe) => probe,
            Err(error) => {
                self.cleanup(&scratch).await;
                return StageOutcome::Failed {
                    stage: Stage::Merging,
                    detail: error.to_string(),
                };
            }
        };

        let run_end =
            head.created_at + Duration::milliseconds((run_probe.duration * 1000.0) as i64);
        if entry.created_at - run_end > self.proximity {
            info!(
                entry_id = entry.id,
                head_id = head.id,
                gap_ms = (entry.created_at - run_end).num_milliseconds(),
                "segment outside proximity window, starting a new run"
            );
            self.cleanup(&scratch).await;
            return self.begin_run(entry);
        }

        let merged_local = scratch.join(format!("merged_{}", head.file_name));
        if let Err(error) = self
            .pipeline
            .merge(&run_local, &current_local, &merged_local)
            .await
        {
            self.cleanup(&scratch).await;
            return StageOutcome::Failed {
                stage: Stage::Merging,
                detail: error.to_string(),
            };
        }

        let thumb_local = scratch.join("thumbnail.jpg");
        if let Err(error) = self.pipeline.thumbnail(&merged_local, &thumb_local).await {
            self.cleanup(&scratch).await;
            return StageOutcome::Failed {
                stage: Stage::Merging,
                detail: error.to_string(),
            };
        }

        // Thumbnail goes first: once the merged object overwrites the
        // run head, a retry of this stage would concatenate the current
        // segment twice.
        if let Err(error) = self
            .storage
            .upload(&thumbnail_key(&head_key), &thumb_local)
            .await
        {
            return StageOutcome::Aborted {
                reason: format!("thumbnail upload failed: {error}"),
            };
        }
        if let Err(error) = self.storage.upload(&head_key, &merged_local).await {
            return StageOutcome::Aborted {
                reason: format!("upload of {head_key} failed: {error}"),
            };
        }

        // The consumed segment's remote objects are superseded now.
        // Local temp copies stay on disk unless the delete goes through.
        let mut superseded_deleted = true;
        match self.storage.delete(&entry_key).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {}
            Err(error) => {
                warn!(key = %entry_key, %error, "failed to delete superseded object");
                superseded_deleted = false;
            }
        }
        if let Err(error) = self.storage.delete(&thumbnail_key(&entry_key)).await {
            if !matches!(error, StorageError::NotFound(_)) {
                warn!(key = %thumbnail_key(&entry_key), %error, "failed to delete superseded thumbnail");
                superseded_deleted = false;
            }
        }
        if superseded_deleted {
            self.cleanup(&scratch).await;
        }

        match self.store.mark_merged(entry.id, Some(head.id)) {
            Ok(true) => {}
            Ok(false) => {
                return StageOutcome::Aborted {
                    reason: "entry left merging state mid-stage".into(),
                }
            }
            Err(error) => {
                return StageOutcome::Aborted {
                    reason: error.to_string(),
                }
            }
        }
        if let Err(error) = self.store.append_segment(head.id, entry.id) {
            warn!(head_id = head.id, entry_id = entry.id, %error, "could not extend run segment list");
        }
        info!(entry_id = entry.id, head_id = head.id, "segment merged into run");
        StageOutcome::Advanced
    }

    /// No mergeable predecessor: the segment's own upload already is the
    /// recording, so it simply becomes a run head.
    fn begin_run(&self, entry: &RecordingEntry) -> StageOutcome {
        match self.store.mark_merged(entry.id, None) {
            Ok(true) => {
                debug!(entry_id = entry.id, "segment starts a new recording run");
                StageOutcome::Advanced
            }
            Ok(false) => StageOutcome::Aborted {
                reason: "entry left merging state mid-stage".into(),
            },
            Err(error) => StageOutcome::Aborted {
                reason: error.to_string(),
            },
        }
    }

    /// Best-effort: a failure here is retried on the next pass.
    fn finalize(&self, entry: &RecordingEntry) -> StageOutcome {
        match self.store.mark_completed(entry.id) {
            Ok(true) => StageOutcome::Advanced,
            Ok(false) => StageOutcome::Aborted {
                reason: "entry left merged state before completion".into(),
            },
            Err(error) => {
                warn!(entry_id = entry.id, %error, "completion commit failed, retrying next pass");
                StageOutcome::Aborted {
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn cleanup(&self, scratch: &std::path::Path) {
        if let Err(error) = async_fs::remove_dir_all(scratch).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %scratch.display(), %error, "failed to remove work dir");
            }
        }
    }
}

#[async_trait::async_trait]
impl ScheduledJob for QueueDrain {
    fn id(&self) -> &'static str {
        "process-queue"
    }

    async fn execute(&self) -> Result<(), JobError> {
        self.run_once().await?;
        Ok(())
    }
}
