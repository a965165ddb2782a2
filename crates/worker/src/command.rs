//! Encoder command composition.
//!
//! Builds the one-pass or two-pass ffmpeg/x265 invocations from analysis
//! results, preset parameters, and the zone plan. The builder is pure:
//! it returns argv vectors and never touches the filesystem.

use crate::probe::{CropRect, VideoInfo};
use hevc_swarm_config::Preset;
use std::path::Path;
use thiserror::Error;

/// x265 speed preset applied to every invocation.
const X265_SPEED_PRESET: &str = "slow";

/// Output pixel format; 10-bit keeps HDR sources intact.
const PIX_FMT: &str = "yuv420p10le";

/// Loudness-normalization targets shared by every audio pass.
const LOUDNORM_TARGETS: &str = "I=-23:TP=-2.0:LRA=7";

/// Opus frame duration in milliseconds.
const OPUS_FRAME_DURATION_MS: u32 = 60;

/// A CRF/bitrate boundary: preset values at or below this are a CRF,
/// larger values are a bitrate in kbps.
const CRF_MAX: i64 = 50;

/// Error type for building encode settings from a preset.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A required preset key was absent or had the wrong type.
    #[error("Preset '{preset}' is missing required key '{key}'")]
    MissingPresetKey { preset: String, key: &'static str },
}

/// Loudness measurements extracted from a first-pass log, substituted into
/// the second pass's audio filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMeasurements {
    pub input_i: f64,
    pub input_tp: f64,
    pub input_lra: f64,
    pub input_thresh: f64,
    pub target_offset: f64,
}

impl Default for LoudnessMeasurements {
    /// Documented fallbacks used when a key is missing from the log.
    fn default() -> Self {
        Self {
            input_i: -23.0,
            input_tp: -2.0,
            input_lra: 7.0,
            input_thresh: -33.0,
            target_offset: 0.0,
        }
    }
}

/// Typed view of the preset keys the pipeline consumes.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub target_width: i64,
    pub target_height: i64,
    pub crop_samples: u32,
    pub crf_or_rate: i64,
    pub audio_bitrate_kbps: i64,
    pub x265_params: Option<String>,
    pub add_x265_params: Option<String>,
    pub video_filter: Option<String>,
    pub scale_filter: Option<String>,
    pub sharpen_filter: Option<String>,
    pub one_pass: bool,
}

impl EncodeSettings {
    /// Extract settings from a resolved preset, coercion already applied.
    pub fn from_preset(preset: &Preset) -> Result<Self, CommandError> {
        let require = |key: &'static str| {
            preset.int(key).ok_or_else(|| CommandError::MissingPresetKey {
                preset: preset.name.clone(),
                key,
            })
        };

        Ok(Self {
            ffmpeg_path: preset.str("ffmpeg_path").unwrap_or("ffmpeg").to_string(),
            ffprobe_path: preset.str("ffprobe_path").unwrap_or("ffprobe").to_string(),
            target_width: require("target_width")?,
            target_height: require("target_height")?,
            crop_samples: require("crop_samples")?.max(1) as u32,
            crf_or_rate: require("crf_or_rate")?,
            audio_bitrate_kbps: require("audio_bitrate_kbps")?,
            x265_params: preset.str("x265_params").map(String::from),
            add_x265_params: preset.str("add_x265_params").map(String::from),
            video_filter: preset.str("video_filter").map(String::from),
            scale_filter: preset.str("scale_filter").map(String::from),
            sharpen_filter: preset.str("sharpen_filter").map(String::from),
            one_pass: preset.bool("one_pass").unwrap_or(false),
        })
    }

    /// Low values are a CRF; high values are a bitrate in kbps.
    pub fn is_crf(&self) -> bool {
        self.crf_or_rate <= CRF_MAX
    }

    /// One-pass is selected explicitly or implied by CRF mode.
    pub fn is_one_pass(&self) -> bool {
        self.one_pass || self.is_crf()
    }
}

/// Compose the video filter chain: optional leading filter, scale, crop,
/// optional sharpen.
pub fn filter_chain(settings: &EncodeSettings, crop: CropRect) -> String {
    let mut parts = Vec::new();
    if let Some(vf) = &settings.video_filter {
        parts.push(vf.clone());
    }
    if let Some(scale) = &settings.scale_filter {
        parts.push(format!(
            "zscale={}:{}:filter={}",
            settings.target_width, settings.target_height, scale
        ));
    }
    parts.push(format!("crop={}", crop.to_filter()));
    if let Some(sharpen) = &settings.sharpen_filter {
        parts.push(sharpen.clone());
    }
    parts.join(",")
}

/// Merge the two colon-separated x265 parameter lists, letting
/// `add_x265_params` override on key collision, and prepend the zone plan
/// when present.
pub fn merge_x265_params(base: Option<&str>, add: Option<&str>, zones: &str) -> String {
    // (key, value); bare flags carry no value.
    let mut entries: Vec<(String, Option<String>)> = Vec::new();

    let mut absorb = |list: &str| {
        for part in list.split(':').filter(|p| !p.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (part.to_string(), None),
            };
            if let Some(existing) = entries.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = value;
            } else {
                entries.push((key, value));
            }
        }
    };
    absorb(base.unwrap_or(""));
    absorb(add.unwrap_or(""));

    let mut parts = Vec::new();
    if !zones.is_empty() {
        parts.push(format!("zones={zones}"));
    }
    for (key, value) in entries {
        match value {
            Some(v) => parts.push(format!("{key}={v}")),
            None => parts.push(key),
        }
    }
    parts.join(":")
}

fn rate_args(settings: &EncodeSettings) -> Vec<String> {
    if settings.is_crf() {
        vec!["-crf".into(), settings.crf_or_rate.to_string()]
    } else {
        vec!["-b:v".into(), format!("{}k", settings.crf_or_rate)]
    }
}

fn video_args(
    settings: &EncodeSettings,
    info: &VideoInfo,
    crop: CropRect,
    x265_params: String,
) -> Vec<String> {
    let mut args = vec![
        "-map".into(),
        "0:v:0".into(),
        "-vf".into(),
        filter_chain(settings, crop),
        "-c:v".into(),
        "libx265".into(),
        "-pix_fmt".into(),
        PIX_FMT.into(),
        "-preset".into(),
        X265_SPEED_PRESET.into(),
    ];
    args.extend(rate_args(settings));
    if info.has_hdr_dv {
        args.push("-dolbyvision".into());
        args.push("1".into());
    }
    if !x265_params.is_empty() {
        args.push("-x265-params".into());
        args.push(x265_params);
    }
    args
}

fn loudnorm_filter(measured: Option<&LoudnessMeasurements>, print_json: bool) -> String {
    let mut filter = format!("loudnorm={LOUDNORM_TARGETS}");
    if let Some(m) = measured {
        filter.push_str(&format!(
            ":measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true",
            m.input_i, m.input_tp, m.input_lra, m.input_thresh, m.target_offset
        ));
    }
    if print_json {
        filter.push_str(":print_format=json");
    }
    filter
}

fn audio_output_args(settings: &EncodeSettings, measured: Option<&LoudnessMeasurements>) -> Vec<String> {
    vec![
        "-map".into(),
        "0:a:0".into(),
        "-af".into(),
        loudnorm_filter(measured, false),
        "-ac".into(),
        "2".into(),
        "-c:a".into(),
        "libopus".into(),
        "-b:a".into(),
        format!("{}k", settings.audio_bitrate_kbps),
        "-frame_duration".into(),
        OPUS_FRAME_DURATION_MS.to_string(),
    ]
}

fn subtitle_args(info: &VideoInfo) -> Vec<String> {
    let mut args = Vec::new();
    for idx in &info.text_subtitle_indices {
        args.push("-map".into());
        args.push(format!("0:s:{idx}"));
    }
    if !info.text_subtitle_indices.is_empty() {
        args.push("-c:s".into());
        args.push("copy".into());
    }
    args
}

fn preamble(settings: &EncodeSettings, input: &Path) -> Vec<String> {
    vec![
        settings.ffmpeg_path.clone(),
        "-y".into(),
        "-hide_banner".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ]
}

fn stats_path(scratch_prefix: &Path) -> String {
    format!("{}.stats", scratch_prefix.display())
}

/// Single-invocation encode: video, normalized 2-channel Opus audio, and
/// copied text subtitles.
pub fn build_one_pass(
    settings: &EncodeSettings,
    info: &VideoInfo,
    crop: CropRect,
    zones: &str,
    output: &Path,
) -> Vec<String> {
    let params = merge_x265_params(
        settings.x265_params.as_deref(),
        settings.add_x265_params.as_deref(),
        zones,
    );
    let mut argv = preamble(settings, &info.path);
    argv.extend(video_args(settings, info, crop, params));
    argv.extend(audio_output_args(settings, None));
    argv.extend(subtitle_args(info));
    argv.push(output.to_string_lossy().into_owned());
    argv
}

/// First pass: writes the stats file, discards all output through the null
/// muxer, and emits loudness measurements as JSON diagnostics.
pub fn build_pass1(
    settings: &EncodeSettings,
    info: &VideoInfo,
    crop: CropRect,
    zones: &str,
    scratch_prefix: &Path,
) -> Vec<String> {
    let merged = merge_x265_params(
        settings.x265_params.as_deref(),
        settings.add_x265_params.as_deref(),
        zones,
    );
    let params = join_params(format!("pass=1:stats={}", stats_path(scratch_prefix)), &merged);

    let mut argv = preamble(settings, &info.path);
    argv.extend(video_args(settings, info, crop, params));
    argv.extend([
        "-map".into(),
        "0:a:0".into(),
        "-af".into(),
        loudnorm_filter(None, true),
    ]);
    argv.extend(["-f".into(), "null".into(), "-".into()]);
    argv
}

/// Second pass: reads the stats file and substitutes the measured loudness
/// values into the audio filter.
pub fn build_pass2(
    settings: &EncodeSettings,
    info: &VideoInfo,
    crop: CropRect,
    zones: &str,
    scratch_prefix: &Path,
    measured: &LoudnessMeasurements,
    output: &Path,
) -> Vec<String> {
    let merged = merge_x265_params(
        settings.x265_params.as_deref(),
        settings.add_x265_params.as_deref(),
        zones,
    );
    let params = join_params(format!("pass=2:stats={}", stats_path(scratch_prefix)), &merged);

    let mut argv = preamble(settings, &info.path);
    argv.extend(video_args(settings, info, crop, params));
    argv.extend(audio_output_args(settings, Some(measured)));
    argv.extend(subtitle_args(info));
    argv.push(output.to_string_lossy().into_owned());
    argv
}

fn join_params(head: String, tail: &str) -> String {
    if tail.is_empty() {
        head
    } else {
        format!("{head}:{tail}")
    }
}
