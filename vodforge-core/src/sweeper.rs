use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::queue::{
    RecordingQueueStore, Stage, HARD_EXPIRY_HOURS, SOFT_EXPIRY_HOURS, STALL_MINUTES,
};
use crate::scheduler::{JobError, ScheduledJob};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub purged: usize,
    pub expired: usize,
    pub reclaimed_encoding: usize,
    pub reclaimed_merging: usize,
}

/// Expires ancient entries and reclaims entries stuck mid-stage. Every
/// predicate is time-windowed, so repeated passes are idempotent.
pub struct Sweeper {
    store: RecordingQueueStore,
}

impl Sweeper {
    pub fn new(store: RecordingQueueStore) -> Self {
        Self { store }
    }

    /// One sweep. The four steps are independent: a failing step is
    /// logged and the rest still run.
    pub fn run_once(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();

        match self
            .store
            .purge_older_than(now - Duration::hours(HARD_EXPIRY_HOURS))
        {
            Ok(count) => report.purged = count,
            Err(error) => warn!(%error, "hard-expiry purge failed"),
        }

        match self
            .store
            .expire_stale(now - Duration::hours(SOFT_EXPIRY_HOURS))
        {
            Ok(count) => report.expired = count,
            Err(error) => warn!(%error, "soft-expiry pass failed"),
        }

        let stall_cutoff = now - Duration::minutes(STALL_MINUTES);
        match self.store.reclaim_stalled(Stage::Encoding, stall_cutoff) {
            Ok(count) => report.reclaimed_encoding = count,
            Err(error) => warn!(%error, "stalled-encoding reclaim failed"),
        }
        match self.store.reclaim_stalled(Stage::Merging, stall_cutoff) {
            Ok(count) => report.reclaimed_merging = count,
            Err(error) => warn!(%error, "stalled-merging reclaim failed"),
        }

        if report != SweepReport::default() {
            info!(
                purged = report.purged,
                expired = report.expired,
                reclaimed_encoding = report.reclaimed_encoding,
                reclaimed_merging = report.reclaimed_merging,
                "sweep finished"
            );
        }
        report
    }
}

#[async_trait::async_trait]
impl ScheduledJob for Sweeper {
    fn id(&self) -> &'static str {
        "cleanup"
    }

    async fn execute(&self) -> Result<(), JobError> {
        self.run_once();
        Ok(())
    }
}
