//! Preset file loading and resolution.
//!
//! A preset file holds one `[baseline]` table with default keys plus one
//! `[preset_<name>]` table per preset whose keys override baseline. A
//! resolved preset is a flat key→value map of heterogeneous values; string
//! values that lex as numbers are coerced to int/float at load time.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Error type for preset loading and resolution.
#[derive(Debug, Error)]
pub enum PresetError {
    /// IO error reading the preset file.
    #[error("Failed to read preset file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse preset file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The top level of the preset file was not a table of sections.
    #[error("Preset file must consist of [baseline] and [preset_<name>] sections")]
    NotSectioned,

    /// A value had a type the parameter map cannot carry.
    #[error("Unsupported value for key '{key}': expected string, number, or boolean")]
    UnsupportedValue { key: String },

    /// The requested preset does not exist in the file.
    #[error("Unknown preset '{name}'; available: {}", .available.join(", "))]
    UnknownPreset {
        name: String,
        available: Vec<String>,
    },
}

/// A single preset parameter.
///
/// The parameter map is heterogeneous; the int/float distinction is
/// preserved because consumers take decisions on integer values.
#[derive(Debug, Clone, PartialEq)]
pub enum PresetValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl PresetValue {
    /// Integer view. Only `Int` values answer; floats do not truncate.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PresetValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PresetValue::Int(v) => Some(*v as f64),
            PresetValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PresetValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PresetValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// A resolved preset: baseline keys overlaid with the named section's keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    /// Preset name (without the `preset_` section prefix).
    pub name: String,
    values: BTreeMap<String, PresetValue>,
}

impl Preset {
    /// Build a preset directly from a parameter map. Used by tests and by
    /// callers that assemble parameters without a file.
    pub fn from_map(name: &str, values: BTreeMap<String, PresetValue>) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    pub fn get(&self, key: &str) -> Option<&PresetValue> {
        self.values.get(key)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(PresetValue::as_int)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(PresetValue::as_float)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(PresetValue::as_bool)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(PresetValue::as_str)
    }

    /// Insert or replace a parameter. Command-line overrides land here.
    pub fn set(&mut self, key: &str, value: PresetValue) {
        self.values.insert(key.to_string(), value);
    }
}

/// A parsed preset file: baseline defaults plus named override sections.
#[derive(Debug, Clone, Default)]
pub struct PresetFile {
    baseline: BTreeMap<String, PresetValue>,
    presets: BTreeMap<String, BTreeMap<String, PresetValue>>,
}

impl PresetFile {
    /// Load a preset file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PresetError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse preset file content.
    ///
    /// Sections other than `[baseline]` and `[preset_<name>]` are ignored;
    /// unknown keys inside known sections are carried verbatim so presets
    /// can feed parameters this tool does not itself interpret.
    pub fn parse(content: &str) -> Result<Self, PresetError> {
        let root: toml::Value = toml::from_str(content)?;
        let sections = root.as_table().ok_or(PresetError::NotSectioned)?;

        let mut file = PresetFile::default();
        for (section, value) in sections {
            let Some(table) = value.as_table() else {
                continue;
            };
            if section == "baseline" {
                file.baseline = coerce_table(table)?;
            } else if let Some(name) = section.strip_prefix("preset_") {
                file.presets.insert(name.to_string(), coerce_table(table)?);
            }
        }
        Ok(file)
    }

    /// Names of all presets defined in the file, sorted.
    pub fn preset_names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    /// Resolve a named preset: baseline keys overlaid by the section's keys.
    pub fn resolve(&self, name: &str) -> Result<Preset, PresetError> {
        let section = self
            .presets
            .get(name)
            .ok_or_else(|| PresetError::UnknownPreset {
                name: name.to_string(),
                available: self.preset_names(),
            })?;

        let mut values = self.baseline.clone();
        for (key, value) in section {
            values.insert(key.clone(), value.clone());
        }
        Ok(Preset {
            name: name.to_string(),
            values,
        })
    }
}

fn coerce_table(
    table: &toml::map::Map<String, toml::Value>,
) -> Result<BTreeMap<String, PresetValue>, PresetError> {
    let mut out = BTreeMap::new();
    for (key, value) in table {
        out.insert(key.clone(), coerce_value(key, value)?);
    }
    Ok(out)
}

/// Convert a TOML value into a parameter map entry.
///
/// String values that lex as numbers become numbers, so quoted INI-style
/// values like `"22"` behave the same as native TOML integers.
fn coerce_value(key: &str, value: &toml::Value) -> Result<PresetValue, PresetError> {
    match value {
        toml::Value::Integer(v) => Ok(PresetValue::Int(*v)),
        toml::Value::Float(v) => Ok(PresetValue::Float(*v)),
        toml::Value::Boolean(v) => Ok(PresetValue::Bool(*v)),
        toml::Value::String(s) => Ok(coerce_str(s)),
        _ => Err(PresetError::UnsupportedValue {
            key: key.to_string(),
        }),
    }
}

fn coerce_str(s: &str) -> PresetValue {
    if let Ok(v) = s.parse::<i64>() {
        return PresetValue::Int(v);
    }
    // Require at least one digit so words like "nan" stay strings.
    if s.bytes().any(|b| b.is_ascii_digit()) {
        if let Ok(v) = s.parse::<f64>() {
            if v.is_finite() {
                return PresetValue::Float(v);
            }
        }
    }
    PresetValue::Str(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[baseline]
ffmpeg_path = "ffmpeg"
ffprobe_path = "ffprobe"
target_width = 1920
target_height = 1080
crop_samples = 6
crf_or_rate = "22"
audio_bitrate_kbps = 128
x265_params = "me=2:rd=4:psy-rd=2.0"
one_pass = false

[preset_film]
crf_or_rate = 2600
add_x265_params = "rd=6"
scale_filter = "spline36"

[preset_anime]
crf_or_rate = 18
sharpen_filter = "unsharp=5:5:0.5"
"#;

    #[test]
    fn test_baseline_keys_visible_through_preset() {
        let file = PresetFile::parse(SAMPLE).unwrap();
        let preset = file.resolve("film").unwrap();

        assert_eq!(preset.str("ffmpeg_path"), Some("ffmpeg"));
        assert_eq!(preset.int("target_width"), Some(1920));
        assert_eq!(preset.int("audio_bitrate_kbps"), Some(128));
        assert_eq!(preset.bool("one_pass"), Some(false));
    }

    #[test]
    fn test_preset_section_overrides_baseline() {
        let file = PresetFile::parse(SAMPLE).unwrap();

        let film = file.resolve("film").unwrap();
        assert_eq!(film.int("crf_or_rate"), Some(2600));
        assert_eq!(film.str("add_x265_params"), Some("rd=6"));

        let anime = file.resolve("anime").unwrap();
        assert_eq!(anime.int("crf_or_rate"), Some(18));
        assert_eq!(anime.str("add_x265_params"), None);
    }

    #[test]
    fn test_numeric_string_coercion() {
        let file = PresetFile::parse(SAMPLE).unwrap();
        let anime = file.resolve("anime").unwrap();

        // "22" in baseline lexes as a number and becomes an integer,
        // overridden to a native integer in both presets.
        assert_eq!(anime.int("crf_or_rate"), Some(18));

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), coerce_str("42"));
        map.insert("b".to_string(), coerce_str("0.5"));
        map.insert("c".to_string(), coerce_str("me=2:rd=4"));
        let p = Preset::from_map("t", map);
        assert_eq!(p.int("a"), Some(42));
        assert_eq!(p.float("b"), Some(0.5));
        assert_eq!(p.str("c"), Some("me=2:rd=4"));
    }

    #[test]
    fn test_int_float_distinction_preserved() {
        assert_eq!(coerce_str("50"), PresetValue::Int(50));
        assert_eq!(coerce_str("50.0"), PresetValue::Float(50.0));
        assert_eq!(PresetValue::Float(50.0).as_int(), None);
        assert_eq!(PresetValue::Int(50).as_float(), Some(50.0));
    }

    #[test]
    fn test_non_numeric_words_stay_strings() {
        assert_eq!(coerce_str("nan"), PresetValue::Str("nan".to_string()));
        assert_eq!(coerce_str("inf"), PresetValue::Str("inf".to_string()));
        assert_eq!(
            coerce_str("spline36"),
            PresetValue::Str("spline36".to_string())
        );
    }

    #[test]
    fn test_preset_names_sorted() {
        let file = PresetFile::parse(SAMPLE).unwrap();
        assert_eq!(file.preset_names(), vec!["anime", "film"]);
    }

    #[test]
    fn test_unknown_preset_lists_available() {
        let file = PresetFile::parse(SAMPLE).unwrap();
        let err = file.resolve("tv").unwrap_err();
        match err {
            PresetError::UnknownPreset { name, available } => {
                assert_eq!(name, "tv");
                assert_eq!(available, vec!["anime", "film"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_overrides_resolved_value() {
        let file = PresetFile::parse(SAMPLE).unwrap();
        let mut preset = file.resolve("film").unwrap();
        assert_eq!(preset.bool("one_pass"), Some(false));

        preset.set("one_pass", PresetValue::Bool(true));
        assert_eq!(preset.bool("one_pass"), Some(true));
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(SAMPLE.as_bytes()).unwrap();

        let file = PresetFile::load(tmp.path()).unwrap();
        assert_eq!(file.preset_names().len(), 2);
    }

    #[test]
    fn test_array_value_rejected() {
        let err = PresetFile::parse("[baseline]\nx = [1, 2]\n").unwrap_err();
        assert!(matches!(err, PresetError::UnsupportedValue { key } if key == "x"));
    }

    proptest! {
        // Any integer survives string coercion with its exact value, so
        // quoting numbers in the preset file never changes behavior.
        #[test]
        fn prop_integer_strings_coerce_exactly(v in any::<i64>()) {
            prop_assert_eq!(coerce_str(&v.to_string()), PresetValue::Int(v));
        }

        // Colon-joined parameter lists never accidentally coerce.
        #[test]
        fn prop_param_lists_stay_strings(
            key in "[a-z-]{1,12}",
            val in "[a-z0-9.]{1,8}",
        ) {
            let s = format!("{key}={val}");
            prop_assert_eq!(coerce_str(&s), PresetValue::Str(s.clone()));
        }
    }
}
