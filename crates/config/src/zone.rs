//! Zone configuration: which bitrate-multiplier windows apply to a title.
//!
//! Zones come from the preset (`title_rate`, `closing_rate`,
//! `skip_first_episodes`) and may be overridden per invocation on the
//! command line as `"seconds,multiplier"` pairs.

use crate::preset::Preset;
use thiserror::Error;

/// Error type for zone configuration parsing.
#[derive(Debug, Error)]
pub enum ZoneConfigError {
    /// A rate pair did not parse as `"seconds,multiplier"`.
    #[error("Invalid rate pair '{0}': expected \"seconds,multiplier\"")]
    InvalidRatePair(String),
}

/// Per-title zone configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneConfig {
    /// Seconds before the first chapter's end, and the bitrate multiplier
    /// applied over that window.
    pub title_rate: Option<(f64, f64)>,
    /// Seconds before the end of the file, and the bitrate multiplier
    /// applied over that window.
    pub closing_rate: Option<(f64, f64)>,
    /// When true, titles whose filename contains `E01` receive no zones.
    pub skip_first_episodes: bool,
}

impl ZoneConfig {
    /// Read the zone keys out of a resolved preset. Absent keys stay `None`.
    pub fn from_preset(preset: &Preset) -> Result<Self, ZoneConfigError> {
        Ok(Self {
            title_rate: preset.str("title_rate").map(parse_rate_pair).transpose()?,
            closing_rate: preset
                .str("closing_rate")
                .map(parse_rate_pair)
                .transpose()?,
            skip_first_episodes: preset.bool("skip_first_episodes").unwrap_or(false),
        })
    }
}

/// Parse a `"seconds,multiplier"` pair, e.g. `"30,0.5"`.
pub fn parse_rate_pair(s: &str) -> Result<(f64, f64), ZoneConfigError> {
    let invalid = || ZoneConfigError::InvalidRatePair(s.to_string());

    let (secs, mult) = s.split_once(',').ok_or_else(invalid)?;
    let secs: f64 = secs.trim().parse().map_err(|_| invalid())?;
    let mult: f64 = mult.trim().parse().map_err(|_| invalid())?;
    if !secs.is_finite() || !mult.is_finite() || secs < 0.0 || mult <= 0.0 {
        return Err(invalid());
    }
    Ok((secs, mult))
}
