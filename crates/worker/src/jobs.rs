//! Job lifecycle records and the per-batch summary.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Status of an encoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
    /// Job is built but not yet claimed.
    #[default]
    Pending,
    /// This worker won the claim and is encoding.
    InProgress,
    /// Encode finished and the output exists.
    Completed,
    /// A pipeline stage failed.
    Failed,
    /// Output already existed, another worker holds the token, or shutdown
    /// was requested before the claim.
    Skipped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Lifecycle record for one input→output pair.
///
/// Token and scratch paths are set only after a successful claim; the
/// error message is present iff the job failed.
#[derive(Debug, Clone)]
pub struct EncodingJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub token_path: Option<PathBuf>,
    pub scratch_prefix: Option<PathBuf>,
    pub status: JobStatus,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub error_message: Option<String>,
}

impl EncodingJob {
    pub fn new(input_path: &Path, output_path: &Path) -> Self {
        Self {
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            token_path: None,
            scratch_prefix: None,
            status: JobStatus::Pending,
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }

    /// Transition to in-progress after winning the claim.
    pub fn begin(&mut self, token_path: PathBuf, scratch_prefix: PathBuf) {
        self.token_path = Some(token_path);
        self.scratch_prefix = Some(scratch_prefix);
        self.status = JobStatus::InProgress;
        self.start_time = Some(Instant::now());
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.end_time = Some(Instant::now());
    }

    pub fn fail(&mut self, message: String) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message);
        self.end_time = Some(Instant::now());
    }

    pub fn skip(&mut self) {
        self.status = JobStatus::Skipped;
    }

    /// Wall time between claim and terminal transition, when both exist.
    pub fn elapsed(&self) -> Option<Duration> {
        Some(self.end_time?.duration_since(self.start_time?))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

/// Aggregate outcome of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Pending | JobStatus::InProgress => {}
        }
    }

    /// The batch succeeds iff no job failed.
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "completed={} failed={} skipped={}",
            self.completed, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> EncodingJob {
        EncodingJob::new(Path::new("/media/in.mkv"), Path::new("/out/in.mkv"))
    }

    #[test]
    fn test_new_job_is_pending_without_claim_state() {
        let j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.token_path.is_none());
        assert!(j.scratch_prefix.is_none());
        assert!(j.error_message.is_none());
        assert!(!j.is_terminal());
    }

    #[test]
    fn test_begin_then_complete() {
        let mut j = job();
        j.begin(PathBuf::from("/t/in.mkv.token"), PathBuf::from("/s/in.x"));
        assert_eq!(j.status, JobStatus::InProgress);
        assert!(j.start_time.is_some());

        j.complete();
        assert_eq!(j.status, JobStatus::Completed);
        assert!(j.is_terminal());
        assert!(j.elapsed().is_some());
        assert!(j.error_message.is_none());
    }

    #[test]
    fn test_fail_records_message() {
        let mut j = job();
        j.begin(PathBuf::from("/t/in.mkv.token"), PathBuf::from("/s/in.x"));
        j.fail("pass 1 exited with status 1".to_string());

        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(
            j.error_message.as_deref(),
            Some("pass 1 exited with status 1")
        );
        assert!(j.is_terminal());
    }

    #[test]
    fn test_skip_has_no_timing() {
        let mut j = job();
        j.skip();
        assert_eq!(j.status, JobStatus::Skipped);
        assert!(j.elapsed().is_none());
        assert!(j.is_terminal());
    }

    #[test]
    fn test_summary_counts_and_success() {
        let mut s = BatchSummary::default();
        s.record(JobStatus::Completed);
        s.record(JobStatus::Skipped);
        s.record(JobStatus::Skipped);
        assert_eq!(s, BatchSummary { completed: 1, failed: 0, skipped: 2 });
        assert!(s.success());

        s.record(JobStatus::Failed);
        assert!(!s.success());
        assert_eq!(s.to_string(), "completed=1 failed=1 skipped=2");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::InProgress.to_string(), "in_progress");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
        assert_eq!(JobStatus::Skipped.to_string(), "skipped");
    }
}
