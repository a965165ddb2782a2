//! Configuration module for hevc-swarm
//!
//! Handles loading layered preset files and exposing the flat parameter map
//! consumed by the encoding pipeline, plus the zone configuration derived
//! from presets and command-line overrides.

pub mod preset;
pub mod zone;

pub use preset::*;
pub use zone::*;
