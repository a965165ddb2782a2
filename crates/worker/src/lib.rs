//! hevc-swarm core
//!
//! Distributed batch H.265 transcoding: filesystem-atomic job claiming
//! across independent worker processes, bounded local concurrency with
//! graceful shutdown, and the per-job analysis → crop → zones → transcode
//! pipeline with loudness feedback between passes.

pub mod claim;
pub mod command;
pub mod crop;
pub mod encoder;
pub mod jobs;
pub mod probe;
pub mod process;
pub mod scheduler;
pub mod startup;
pub mod zones;

pub use claim::{ClaimError, ClaimOutcome, ClaimRegistry};
pub use command::{
    build_one_pass, build_pass1, build_pass2, merge_x265_params, CommandError, EncodeSettings,
    LoudnessMeasurements,
};
pub use crop::{CropDetector, CropError};
pub use encoder::{parse_loudness_log, EncodeError, EncoderDriver};
pub use jobs::{BatchSummary, EncodingJob, JobStatus};
pub use probe::{Chapter, CropRect, MediaProbe, ProbeError, VideoInfo};
pub use process::{CommandOutput, ProcessError};
pub use scheduler::{
    effective_workers, install_signal_handlers, BatchScheduler, SchedulerConfig, SchedulerError,
    ShutdownFlag,
};
pub use startup::{check_toolchain, StartupError};
pub use zones::plan_zones;
