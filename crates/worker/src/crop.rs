//! Crop detection: sample the source at several timestamps and combine the
//! detected rectangles into their bounding-box union.
//!
//! The union (not the intersection) is taken so no wanted content is ever
//! cropped away: a single dark sample must not shrink the picture.

use crate::probe::CropRect;
use crate::process::{self, CROP_SAMPLE_TIMEOUT};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Frames inspected per sample point.
const FRAMES_PER_SAMPLE: u32 = 5;

/// Error type for crop detection.
#[derive(Debug, Error)]
pub enum CropError {
    /// No sample produced a usable rectangle.
    #[error("Crop detection failed: no sample produced a rectangle")]
    NoUsableSamples,

    /// The sample count was zero.
    #[error("Crop detection requires at least one sample")]
    NoSamplePoints,
}

fn crop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"crop=(\d+):(\d+):(\d+):(\d+)").expect("crop pattern is valid")
    })
}

/// Crop detector bound to a configured ffmpeg binary and target geometry.
#[derive(Debug, Clone)]
pub struct CropDetector {
    ffmpeg_path: String,
    target_width: i64,
    target_height: i64,
    samples: u32,
}

impl CropDetector {
    pub fn new(ffmpeg_path: &str, target_width: i64, target_height: i64, samples: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            target_width,
            target_height,
            samples,
        }
    }

    fn sample_args(&self, path: &Path, timestamp: f64) -> Vec<String> {
        vec![
            self.ffmpeg_path.clone(),
            "-hide_banner".to_string(),
            "-ss".to_string(),
            format!("{timestamp:.3}"),
            "-i".to_string(),
            path.to_string_lossy().into_owned(),
            "-vf".to_string(),
            format!(
                "scale={}:{},cropdetect",
                self.target_width, self.target_height
            ),
            "-frames:v".to_string(),
            FRAMES_PER_SAMPLE.to_string(),
            "-an".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]
    }

    /// Detect the crop rectangle for an input of known duration.
    ///
    /// Samples are issued concurrently; individual sample errors are
    /// discarded silently. At least one sample must survive.
    pub async fn detect(&self, path: &Path, duration_s: f64) -> Result<CropRect, CropError> {
        if self.samples == 0 {
            return Err(CropError::NoSamplePoints);
        }

        let mut tasks = Vec::with_capacity(self.samples as usize);
        for i in 0..self.samples {
            let timestamp = f64::from(i) * duration_s / f64::from(self.samples);
            let argv = self.sample_args(path, timestamp);
            tasks.push(tokio::spawn(async move {
                let out = process::run(&argv, Some(CROP_SAMPLE_TIMEOUT)).await.ok()?;
                parse_last_crop(&out.stderr_str())
            }));
        }

        let mut combined: Option<CropRect> = None;
        for task in tasks {
            let Ok(Some(rect)) = task.await else {
                continue;
            };
            debug!(input = %path.display(), ?rect, "crop sample");
            combined = Some(match combined {
                Some(acc) => acc.union(rect),
                None => rect,
            });
        }

        combined.ok_or(CropError::NoUsableSamples)
    }
}

/// Extract the last `crop=w:h:x:y` emission from cropdetect diagnostics.
///
/// cropdetect refines its estimate frame by frame; the last line is the
/// settled value for the sampled window.
pub fn parse_last_crop(diagnostics: &str) -> Option<CropRect> {
    let caps = crop_regex().captures_iter(diagnostics).last()?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (w, h, x, y) = (field(1)?, field(2)?, field(3)?, field(4)?);
    if w == 0 || h == 0 {
        return None;
    }
    Some(CropRect { w, h, x, y })
}
