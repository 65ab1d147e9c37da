pub mod config;
pub mod control;
pub mod drain;
pub mod error;
pub mod machine;
pub mod media;
pub mod queue;
pub mod scheduler;
pub mod sqlite;
pub mod storage;
pub mod sweeper;
pub mod tracker;

pub use config::{
    load_vodforge_config, ControlSection, JobsSection, MediaSection, PathsSection,
    RecordingSection, StorageMode, StorageSection, SystemSection, VodforgeConfig,
};
pub use control::{CommandCode, ControlEndpoint, ControlError, ControlRequest};
pub use drain::{DrainReport, QueueDrain, StageOutcome};
pub use error::{ConfigError, Result};
pub use machine::{decide, is_eligible, NextAction};
pub use media::{CommandExecutor, MediaPipeline, MediaProbe, PipelineError, SystemCommandExecutor};
pub use queue::{
    NewSegment, QueueError, QueueFilter, QueueResult, QueueSummary, RecordingEntry,
    RecordingQueueStore, RecordingQueueStoreBuilder, RecordingState, Stage, Visibility,
    HARD_EXPIRY_HOURS, MAX_ATTEMPTS, SOFT_EXPIRY_HOURS, STALL_MINUTES,
};
pub use scheduler::{JobError, ScheduledJob, Scheduler, TaskStatus};
pub use storage::{object_key, thumbnail_key, FsObjectStorage, ObjectStorage, StorageError};
pub use sweeper::{SweepReport, Sweeper};
pub use tracker::ExecutionTracker;
