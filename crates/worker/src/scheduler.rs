//! Batch scheduler: enumerates inputs into jobs, bounds concurrency with a
//! semaphore, and aggregates the outcome.
//!
//! Jobs are launched in input-list order; completion order is unspecified.
//! A shutdown request is observed at the top of each job's critical
//! section, before the claim, so interrupted workers leave no half-claimed
//! state behind.

use crate::claim::{ClaimOutcome, ClaimRegistry};
use crate::encoder::EncoderDriver;
use crate::jobs::{BatchSummary, EncodingJob};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

/// Error type for batch scheduling.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Failed to create one of the working directories.
    #[error("Failed to create working directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Directories and limits for one batch run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub output_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub token_dir: PathBuf,
    /// Maximum concurrently running jobs in this process.
    pub max_workers: usize,
}

/// Cooperative shutdown flag shared between the signal handler and the
/// job tasks.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install SIGINT/SIGTERM handling: the first signal requests a graceful
/// shutdown, a second terminates the process.
#[cfg(unix)]
pub fn install_signal_handlers(shutdown: ShutdownFlag) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!("could not install SIGINT handler: {e}");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("could not install SIGTERM handler: {e}");
                return;
            }
        };

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        warn!("shutdown requested; in-flight jobs run to completion, queued jobs are skipped");
        shutdown.request();

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        warn!("second interrupt; terminating");
        std::process::exit(1);
    });
}

#[cfg(not(unix))]
pub fn install_signal_handlers(shutdown: ShutdownFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested; in-flight jobs run to completion, queued jobs are skipped");
            shutdown.request();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt; terminating");
            std::process::exit(1);
        }
    });
}

/// Resolve the requested job count; `0` derives from the logical core
/// count.
pub fn effective_workers(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

/// Scheduler for one batch of inputs.
pub struct BatchScheduler {
    driver: Arc<EncoderDriver>,
    registry: Arc<ClaimRegistry>,
    config: SchedulerConfig,
    shutdown: ShutdownFlag,
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl BatchScheduler {
    pub fn new(driver: EncoderDriver, config: SchedulerConfig, shutdown: ShutdownFlag) -> Self {
        let registry = ClaimRegistry::new(&config.token_dir, &config.scratch_dir);
        Self {
            driver: Arc::new(driver),
            registry: Arc::new(registry),
            config,
            shutdown,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create the output, scratch, and token directories.
    pub fn create_directories(&self) -> Result<(), SchedulerError> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        std::fs::create_dir_all(&self.config.scratch_dir)?;
        std::fs::create_dir_all(&self.config.token_dir)?;
        Ok(())
    }

    /// Output path for an input: same stem, `.mkv` container, in the
    /// output directory.
    pub fn output_path_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        self.config.output_dir.join(format!("{stem}.mkv"))
    }

    /// Build one job per input, dropping non-files with a warning.
    pub fn build_jobs(&self, inputs: &[PathBuf]) -> Vec<EncodingJob> {
        inputs
            .iter()
            .filter(|path| {
                if path.is_file() {
                    true
                } else {
                    warn!(input = %path.display(), "not a file, dropping");
                    false
                }
            })
            .map(|path| EncodingJob::new(path, &self.output_path_for(path)))
            .collect()
    }

    /// Number of jobs currently inside the encoder.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Run the batch to completion and return the aggregate summary.
    pub async fn run(&self, inputs: &[PathBuf]) -> Result<BatchSummary, SchedulerError> {
        self.create_directories()?;

        let jobs = self.build_jobs(inputs);
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let semaphore = semaphore.clone();
            let driver = self.driver.clone();
            let registry = self.registry.clone();
            let shutdown = self.shutdown.clone();
            let active = self.active.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore should not be closed");
                run_one(driver, registry, shutdown, active, job).await
            }));
        }

        let mut summary = BatchSummary::default();
        for handle in handles {
            match handle.await {
                Ok(job) => summary.record(job.status),
                Err(e) => {
                    error!("job task panicked: {e}");
                    summary.failed += 1;
                }
            }
        }

        info!(%summary, "batch finished");
        Ok(summary)
    }
}

async fn run_one(
    driver: Arc<EncoderDriver>,
    registry: Arc<ClaimRegistry>,
    shutdown: ShutdownFlag,
    active: Arc<Mutex<HashSet<PathBuf>>>,
    mut job: EncodingJob,
) -> EncodingJob {
    // Observe shutdown before the claim so skipping has no side effects.
    if shutdown.requested() {
        job.skip();
        return job;
    }

    match registry.claim(&job.input_path, &job.output_path) {
        Ok(ClaimOutcome::Claimed {
            token_path,
            scratch_prefix,
        }) => {
            job.begin(token_path.clone(), scratch_prefix.clone());
            active.lock().await.insert(job.input_path.clone());

            let result = driver
                .encode(&job.input_path, &job.output_path, &token_path, &scratch_prefix)
                .await;

            active.lock().await.remove(&job.input_path);

            match result {
                Ok(()) => {
                    job.complete();
                    info!(
                        input = %job.input_path.display(),
                        elapsed_s = job.elapsed().map(|d| d.as_secs()).unwrap_or(0),
                        "job completed"
                    );
                }
                Err(e) => {
                    error!(input = %job.input_path.display(), "job failed: {e}");
                    if let Err(release_err) = registry.release_failed(&token_path) {
                        warn!(
                            token = %token_path.display(),
                            "could not release failed claim: {release_err}"
                        );
                    }
                    job.fail(e.to_string());
                }
            }
        }
        Ok(ClaimOutcome::AlreadyDone) => {
            info!(input = %job.input_path.display(), "output exists, skipping");
            job.skip();
        }
        Ok(ClaimOutcome::Held) => {
            info!(input = %job.input_path.display(), "claimed by another worker, skipping");
            job.skip();
        }
        Err(e) => {
            error!(input = %job.input_path.display(), "claim failed: {e}");
            job.fail(e.to_string());
        }
    }
    job
}
