//! Encoder driver: runs one claimed job through analysis, crop detection,
//! zone planning, and the chosen pass sequence.
//!
//! Pass output is appended to the job's token file, which doubles as the
//! audit log. Between the passes of a two-pass encode the driver re-reads
//! that log to extract the loudness measurements pass 2 substitutes into
//! its audio filter.

use crate::claim::{error_log_path, remove_scratch_files};
use crate::command::{
    build_one_pass, build_pass1, build_pass2, EncodeSettings, LoudnessMeasurements,
};
use crate::crop::{CropDetector, CropError};
use crate::probe::MediaProbe;
use crate::process::{self, ProcessError};
use crate::zones::plan_zones;
use hevc_swarm_config::ZoneConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for the encoding pipeline.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The probe could not determine the input's duration; nothing can be
    /// encoded without it.
    #[error("Probe could not determine duration for {0}")]
    DurationMissing(PathBuf),

    /// Crop detection produced no usable rectangle.
    #[error(transparent)]
    Crop(#[from] CropError),

    /// An encoder or probe child failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The final pass reported success but the output does not exist.
    #[error("Final pass succeeded but output is missing: {0}")]
    OutputMissing(PathBuf),

    /// IO error between stages.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw loudness report as the loudness filter prints it: a JSON object
/// with numeric values carried as strings. Keys this pipeline does not
/// consume (output levels, normalization type) are ignored.
#[derive(Debug, Deserialize)]
struct LoudnormReport {
    input_i: Option<String>,
    input_tp: Option<String>,
    input_lra: Option<String>,
    input_thresh: Option<String>,
    target_offset: Option<String>,
}

impl LoudnormReport {
    fn apply(self, m: &mut LoudnessMeasurements) {
        if let Some(v) = parse_level(self.input_i) {
            m.input_i = v;
        }
        if let Some(v) = parse_level(self.input_tp) {
            m.input_tp = v;
        }
        if let Some(v) = parse_level(self.input_lra) {
            m.input_lra = v;
        }
        if let Some(v) = parse_level(self.input_thresh) {
            m.input_thresh = v;
        }
        if let Some(v) = parse_level(self.target_offset) {
            m.target_offset = v;
        }
    }
}

fn parse_level(raw: Option<String>) -> Option<f64> {
    raw?.trim().parse().ok()
}

/// Extract loudness measurements from a first-pass log.
///
/// The loudness filter appends its report to the diagnostics as a JSON
/// object; the log is scanned for such blocks and each one is
/// deserialized, the last emission of a key winning. Missing keys fall
/// back to the defaults on [`LoudnessMeasurements`].
pub fn parse_loudness_log(log: &str) -> LoudnessMeasurements {
    let mut m = LoudnessMeasurements::default();
    for block in json_blocks(log) {
        match serde_json::from_str::<LoudnormReport>(&block) {
            Ok(report) => report.apply(&mut m),
            Err(_) => continue,
        }
    }
    m
}

/// Collect the brace-delimited JSON objects embedded in the log. The
/// report has no nested objects, so a block runs from a line opening with
/// `{` to the next line closing with `}`.
fn json_blocks(log: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_block = false;

    for line in log.lines() {
        let trimmed = line.trim();
        if !in_block {
            if trimmed.starts_with('{') {
                if trimmed.len() > 1 && trimmed.ends_with('}') {
                    blocks.push(trimmed.to_string());
                } else {
                    current.clear();
                    current.push_str(trimmed);
                    current.push('\n');
                    in_block = true;
                }
            }
        } else {
            current.push_str(trimmed);
            current.push('\n');
            if trimmed.ends_with('}') {
                blocks.push(std::mem::take(&mut current));
                in_block = false;
            }
        }
    }
    blocks
}

/// Driver for one claimed job.
#[derive(Debug, Clone)]
pub struct EncoderDriver {
    settings: EncodeSettings,
    zone_config: ZoneConfig,
    probe: MediaProbe,
    crop: CropDetector,
}

impl EncoderDriver {
    pub fn new(settings: EncodeSettings, zone_config: ZoneConfig) -> Self {
        let probe = MediaProbe::new(&settings.ffprobe_path);
        let crop = CropDetector::new(
            &settings.ffmpeg_path,
            settings.target_width,
            settings.target_height,
            settings.crop_samples,
        );
        Self {
            settings,
            zone_config,
            probe,
            crop,
        }
    }

    /// Run the full pipeline for a claimed input.
    ///
    /// On any stage failure: the partial output is deleted, the token is
    /// renamed to its error-log name, and the error propagates. Scratch
    /// files matching the prefix are removed on every exit path.
    pub async fn encode(
        &self,
        input: &Path,
        output: &Path,
        token_path: &Path,
        scratch_prefix: &Path,
    ) -> Result<(), EncodeError> {
        let result = self
            .run_pipeline(input, output, token_path, scratch_prefix)
            .await;

        if let Err(e) = remove_scratch_files(scratch_prefix) {
            warn!(prefix = %scratch_prefix.display(), "scratch cleanup failed: {e}");
        }

        if let Err(stage_error) = result {
            if output.exists() {
                if let Err(e) = std::fs::remove_file(output) {
                    warn!(output = %output.display(), "could not remove partial output: {e}");
                }
            }
            if let Err(e) = std::fs::rename(token_path, error_log_path(token_path)) {
                warn!(token = %token_path.display(), "could not rename token to error log: {e}");
            }
            return Err(stage_error);
        }
        Ok(())
    }

    async fn run_pipeline(
        &self,
        input: &Path,
        output: &Path,
        token_path: &Path,
        scratch_prefix: &Path,
    ) -> Result<(), EncodeError> {
        // ANALYZE: sub-query failures are already contained to absent
        // fields; only a missing duration is fatal.
        let mut info = self.probe.analyze(input).await;
        let duration = info
            .duration_s
            .ok_or_else(|| EncodeError::DurationMissing(input.to_path_buf()))?;

        // CROP
        let crop = self.crop.detect(input, duration).await?;
        info.crop = Some(crop);
        debug!(input = %input.display(), ?crop, "crop settled");

        // PLAN: an empty zone string is legal.
        let zones = plan_zones(&info, &self.zone_config);
        if !zones.is_empty() {
            debug!(input = %input.display(), zones, "zone plan");
        }

        if self.settings.is_one_pass() {
            info!(input = %input.display(), "single-pass encode");
            let argv = build_one_pass(&self.settings, &info, crop, &zones, output);
            process::run_with_sink(&argv, token_path).await?;
        } else {
            info!(input = %input.display(), "pass 1 of 2");
            let argv = build_pass1(&self.settings, &info, crop, &zones, scratch_prefix);
            process::run_with_sink(&argv, token_path).await?;

            // MEASURE: pull loudness stats back out of the pass-1 log.
            let log = tokio::fs::read_to_string(token_path).await?;
            let measured = parse_loudness_log(&log);
            debug!(input = %input.display(), ?measured, "loudness measured");

            info!(input = %input.display(), "pass 2 of 2");
            let argv = build_pass2(
                &self.settings,
                &info,
                crop,
                &zones,
                scratch_prefix,
                &measured,
                output,
            );
            process::run_with_sink(&argv, token_path).await?;
        }

        // COMMIT: the final pass exited 0; the output must exist.
        if !output.exists() {
            return Err(EncodeError::OutputMissing(output.to_path_buf()));
        }
        Ok(())
    }
}
