//! Media probe: source analysis through the external probe tool.
//!
//! Each sub-query runs ffprobe with a read-only, quiet configuration. A
//! failed sub-query is contained to an absent field on [`VideoInfo`] and
//! logged at WARN; whether an absent field aborts the job is the encoder
//! driver's decision.

use crate::process::{self, ProcessError, PROBE_TIMEOUT};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Subtitle codecs that survive stream copy into the output container.
pub const TEXT_SUBTITLE_CODECS: &[&str] =
    &["subrip", "ass", "ssa", "webvtt", "srt", "mov_text", "text"];

/// Side-data type ffprobe reports for a Dolby-Vision configuration record.
const DOVI_SIDE_DATA: &str = "DOVI configuration record";

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe invocation failed.
    #[error("ffprobe failed: {0}")]
    Process(#[from] ProcessError),

    /// ffprobe ran but its output did not parse.
    #[error("Failed to parse ffprobe output: {0}")]
    Parse(String),
}

/// A chapter record; end times may be absent in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub start_s: f64,
    pub end_s: Option<f64>,
}

/// A crop rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub w: u32,
    pub h: u32,
    pub x: u32,
    pub y: u32,
}

impl CropRect {
    /// Filter-string form, `w:h:x:y`.
    pub fn to_filter(self) -> String {
        format!("{}:{}:{}:{}", self.w, self.h, self.x, self.y)
    }

    /// Smallest rectangle containing both operands.
    pub fn union(self, other: CropRect) -> CropRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.w).max(other.x + other.w);
        let bottom = (self.y + self.h).max(other.y + other.h);
        CropRect {
            w: right - x,
            h: bottom - y,
            x,
            y,
        }
    }

    /// True when `other` lies entirely within this rectangle.
    pub fn contains(self, other: CropRect) -> bool {
        self.x <= other.x
            && self.y <= other.y
            && self.x + self.w >= other.x + other.w
            && self.y + self.h >= other.y + other.h
    }
}

/// Per-input analysis result.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub duration_s: Option<f64>,
    pub frame_rate_fps: Option<f64>,
    pub has_hdr_dv: bool,
    pub chapters: Vec<Chapter>,
    pub text_subtitle_indices: Vec<u32>,
    /// Filled after crop detection.
    pub crop: Option<CropRect>,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct StreamsOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_name: Option<String>,
        pub side_data_list: Option<Vec<SideData>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SideData {
        pub side_data_type: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChaptersOutput {
        pub chapters: Option<Vec<ChapterRecord>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChapterRecord {
        pub start_time: Option<String>,
        pub end_time: Option<String>,
    }
}

/// Probe-tool front end bound to a configured ffprobe binary.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    ffprobe_path: String,
}

impl MediaProbe {
    pub fn new(ffprobe_path: &str) -> Self {
        Self {
            ffprobe_path: ffprobe_path.to_string(),
        }
    }

    fn query_args(&self, path: &Path, extra: &[&str]) -> Vec<String> {
        let mut argv = vec![self.ffprobe_path.clone()];
        argv.extend(["-v", "error"].iter().map(|s| s.to_string()));
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv.push(path.to_string_lossy().into_owned());
        argv
    }

    /// Container duration in seconds. Must be positive to be usable.
    pub async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let argv = self.query_args(
            path,
            &[
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        );
        let out = process::run(&argv, Some(PROBE_TIMEOUT)).await?;
        parse_duration(&out.stdout_str())
    }

    /// Frame rate of the primary video stream; `N/D` or bare decimal.
    pub async fn frame_rate(&self, path: &Path) -> Result<f64, ProbeError> {
        let argv = self.query_args(
            path,
            &[
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=r_frame_rate",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        );
        let out = process::run(&argv, Some(PROBE_TIMEOUT)).await?;
        parse_frame_rate(&out.stdout_str())
    }

    /// True iff the primary video stream carries a Dolby-Vision
    /// configuration record in its side data.
    pub async fn has_dolby_vision(&self, path: &Path) -> Result<bool, ProbeError> {
        let argv = self.query_args(
            path,
            &["-select_streams", "v:0", "-print_format", "json", "-show_streams"],
        );
        let out = process::run(&argv, Some(PROBE_TIMEOUT)).await?;
        parse_dolby_vision(&out.stdout_str())
    }

    /// Chapter list; tolerates absent end times.
    pub async fn chapters(&self, path: &Path) -> Result<Vec<Chapter>, ProbeError> {
        let argv = self.query_args(path, &["-print_format", "json", "-show_chapters"]);
        let out = process::run(&argv, Some(PROBE_TIMEOUT)).await?;
        parse_chapters(&out.stdout_str())
    }

    /// Stream indices of text-based subtitle streams, in stream order.
    pub async fn text_subtitle_indices(&self, path: &Path) -> Result<Vec<u32>, ProbeError> {
        let argv = self.query_args(
            path,
            &["-select_streams", "s", "-print_format", "json", "-show_streams"],
        );
        let out = process::run(&argv, Some(PROBE_TIMEOUT)).await?;
        parse_text_subtitle_indices(&out.stdout_str())
    }

    /// Run all sub-queries concurrently and assemble a [`VideoInfo`].
    ///
    /// Sub-query failures are contained: the corresponding field stays
    /// absent/empty and the failure is logged at WARN.
    pub async fn analyze(&self, path: &Path) -> VideoInfo {
        let (duration, frame_rate, dovi, chapters, subs) = tokio::join!(
            self.duration(path),
            self.frame_rate(path),
            self.has_dolby_vision(path),
            self.chapters(path),
            self.text_subtitle_indices(path),
        );

        VideoInfo {
            path: path.to_path_buf(),
            duration_s: contain(duration, path, "duration"),
            frame_rate_fps: contain(frame_rate, path, "frame rate"),
            has_hdr_dv: contain(dovi, path, "Dolby-Vision side data").unwrap_or(false),
            chapters: contain(chapters, path, "chapters").unwrap_or_default(),
            text_subtitle_indices: contain(subs, path, "subtitle streams").unwrap_or_default(),
            crop: None,
        }
    }
}

fn contain<T>(result: Result<T, ProbeError>, path: &Path, what: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(input = %path.display(), "probe sub-query for {what} failed: {e}");
            None
        }
    }
}

/// Parse the duration sub-query output.
pub fn parse_duration(raw: &str) -> Result<f64, ProbeError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ProbeError::Parse(format!("bad duration '{}'", raw.trim())))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ProbeError::Parse(format!(
            "non-positive duration '{}'",
            raw.trim()
        )));
    }
    Ok(value)
}

/// Parse a frame rate in `N/D` or bare-decimal form.
pub fn parse_frame_rate(raw: &str) -> Result<f64, ProbeError> {
    let raw = raw.trim();
    let bad = || ProbeError::Parse(format!("bad frame rate '{raw}'"));

    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| bad())?;
            let den: f64 = den.trim().parse().map_err(|_| bad())?;
            if den == 0.0 {
                return Err(bad());
            }
            num / den
        }
        None => raw.parse().map_err(|_| bad())?,
    };
    if !value.is_finite() || value <= 0.0 {
        return Err(bad());
    }
    Ok(value)
}

/// Parse the primary-video-stream JSON for a DOVI side-data record.
pub fn parse_dolby_vision(json: &str) -> Result<bool, ProbeError> {
    let parsed: ffprobe_json::StreamsOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let found = parsed
        .streams
        .unwrap_or_default()
        .iter()
        .flat_map(|s| s.side_data_list.iter().flatten())
        .any(|sd| sd.side_data_type.as_deref() == Some(DOVI_SIDE_DATA));
    Ok(found)
}

/// Parse the chapters JSON, skipping records without a start time.
pub fn parse_chapters(json: &str) -> Result<Vec<Chapter>, ProbeError> {
    let parsed: ffprobe_json::ChaptersOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let chapters = parsed
        .chapters
        .unwrap_or_default()
        .iter()
        .filter_map(|c| {
            let start_s = c.start_time.as_deref()?.trim().parse().ok()?;
            let end_s = c
                .end_time
                .as_deref()
                .and_then(|t| t.trim().parse::<f64>().ok());
            Some(Chapter { start_s, end_s })
        })
        .collect();
    Ok(chapters)
}

/// Parse the subtitle-streams JSON down to text-codec stream indices.
///
/// Indices are positions within the subtitle-stream inventory (the order
/// the probe lists them), which is the numbering the encoder's `0:s:<i>`
/// stream mapping uses.
pub fn parse_text_subtitle_indices(json: &str) -> Result<Vec<u32>, ProbeError> {
    let parsed: ffprobe_json::StreamsOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let indices = parsed
        .streams
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            s.codec_name
                .as_deref()
                .map(|c| TEXT_SUBTITLE_CODECS.contains(&c))
                .unwrap_or(false)
        })
        .map(|(position, _)| position as u32)
        .collect();
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_duration() {
        assert!((parse_duration("1500.023000\n").unwrap() - 1500.023).abs() < 1e-9);
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("-2.5").is_err());
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_frame_rate_fractional() {
        let fps = parse_frame_rate("24000/1001\n").unwrap();
        assert!((fps - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_parse_frame_rate_decimal_and_errors() {
        assert_eq!(parse_frame_rate("25").unwrap(), 25.0);
        assert_eq!(parse_frame_rate("29.97").unwrap(), 29.97);
        assert!(parse_frame_rate("0/0").is_err());
        assert!(parse_frame_rate("24/0").is_err());
        assert!(parse_frame_rate("abc").is_err());
    }

    #[test]
    fn test_parse_dolby_vision_present() {
        let json = r#"{
            "streams": [{
                "index": 0,
                "codec_name": "hevc",
                "side_data_list": [
                    {"side_data_type": "Content light level metadata"},
                    {"side_data_type": "DOVI configuration record"}
                ]
            }]
        }"#;
        assert!(parse_dolby_vision(json).unwrap());
    }

    #[test]
    fn test_parse_dolby_vision_absent() {
        let json = r#"{"streams": [{"index": 0, "codec_name": "hevc"}]}"#;
        assert!(!parse_dolby_vision(json).unwrap());
        assert!(!parse_dolby_vision(r#"{"streams": []}"#).unwrap());
        assert!(!parse_dolby_vision("{}").unwrap());
    }

    #[test]
    fn test_parse_chapters_tolerates_missing_end() {
        let json = r#"{
            "chapters": [
                {"start_time": "0.000000", "end_time": "60.000000"},
                {"start_time": "60.000000"},
                {"end_time": "90.000000"}
            ]
        }"#;
        let chapters = parse_chapters(json).unwrap();
        assert_eq!(
            chapters,
            vec![
                Chapter { start_s: 0.0, end_s: Some(60.0) },
                Chapter { start_s: 60.0, end_s: None },
            ]
        );
    }

    #[test]
    fn test_parse_chapters_empty() {
        assert!(parse_chapters("{}").unwrap().is_empty());
        assert!(parse_chapters(r#"{"chapters": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_text_subtitle_indices_filters_codecs() {
        // Absolute stream indices 2..6; positions within the subtitle
        // inventory are what the stream mapper needs.
        let json = r#"{
            "streams": [
                {"index": 2, "codec_name": "subrip"},
                {"index": 3, "codec_name": "hdmv_pgs_subtitle"},
                {"index": 4, "codec_name": "ass"},
                {"index": 5, "codec_name": "dvd_subtitle"},
                {"index": 6, "codec_name": "mov_text"}
            ]
        }"#;
        assert_eq!(parse_text_subtitle_indices(json).unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn test_crop_rect_union() {
        let a = CropRect { w: 1920, h: 800, x: 0, y: 140 };
        let b = CropRect { w: 1920, h: 808, x: 0, y: 136 };
        let c = CropRect { w: 1916, h: 800, x: 2, y: 140 };
        let union = a.union(b).union(c);
        assert_eq!(union, CropRect { w: 1920, h: 812, x: 0, y: 136 });
    }

    #[tokio::test]
    async fn test_analyze_contains_all_failures() {
        // A missing binary fails every sub-query; analysis still returns,
        // with all fields absent.
        let probe = MediaProbe::new("/nonexistent/ffprobe-xyz");
        let info = probe.analyze(Path::new("/tmp/nothing.mkv")).await;

        assert_eq!(info.duration_s, None);
        assert_eq!(info.frame_rate_fps, None);
        assert!(!info.has_hdr_dv);
        assert!(info.chapters.is_empty());
        assert!(info.text_subtitle_indices.is_empty());
        assert!(info.crop.is_none());
    }

    proptest! {
        // The union of any two rectangles contains both.
        #[test]
        fn prop_union_contains_operands(
            (w1, h1, x1, y1) in (1u32..4000, 1u32..4000, 0u32..500, 0u32..500),
            (w2, h2, x2, y2) in (1u32..4000, 1u32..4000, 0u32..500, 0u32..500),
        ) {
            let a = CropRect { w: w1, h: h1, x: x1, y: y1 };
            let b = CropRect { w: w2, h: h2, x: x2, y: y2 };
            let u = a.union(b);
            prop_assert!(u.contains(a));
            prop_assert!(u.contains(b));
        }
    }
}
