//! Settings file loading.
//!
//! Provides format detection (RON/JSON/TOML), file discovery and the
//! deserialization helpers behind [`load_settings`].

use cadence_core::settings::{ConfigError, SolverSettings};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::schema::SettingsData;

/// Base name of the settings file looked up by [`load_settings_from_dir`].
pub const SETTINGS_FILE: &str = "settings";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading a settings file.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A duration string could not be read.
    #[error("invalid duration '{value}' for {field} in {file}")]
    InvalidDuration {
        file: PathBuf,
        field: String,
        value: String,
    },

    /// A value was rejected by the settings validation.
    #[error("invalid settings in {file}: {source}")]
    Config {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for `{base_name}.ron`, `.toml` or `.json`.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` in the given format. `file` is only used for
/// error messages.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, DataLoadError> {
    let parse = |detail: String| DataLoadError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse(e.to_string())),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Entry points
// ===========================================================================

/// Load and validate solver settings from a RON, TOML or JSON file.
pub fn load_settings(path: &Path) -> Result<SolverSettings, DataLoadError> {
    let data: SettingsData = deserialize_file(path)?;
    let settings = data.resolve(path)?;
    tracing::debug!(
        event = "settings_loaded",
        file = %path.display(),
        plan_type = u8::from(settings.plan_type),
        constraints = settings.constraints,
        max_parallel = settings.max_parallel,
    );
    Ok(settings)
}

/// Load `settings.{ron,toml,json}` from `dir`.
pub fn load_settings_from_dir(dir: &Path) -> Result<SolverSettings, DataLoadError> {
    let path = find_data_file(dir, SETTINGS_FILE)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: SETTINGS_FILE.to_string(),
        dir: dir.to_path_buf(),
    })?;
    load_settings(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::settings::{self, PlanType};
    use cadence_core::time::Duration;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cadence_data_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    // -----------------------------------------------------------------------
    // detect_format
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("s.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("s.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("s.json")).unwrap(), Format::Json);
    }

    #[test]
    fn detect_format_unsupported() {
        assert!(matches!(
            detect_format(Path::new("settings.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(detect_format(Path::new("settings")).is_err());
    }

    // -----------------------------------------------------------------------
    // Each format
    // -----------------------------------------------------------------------

    #[test]
    fn ron_settings() {
        let s: SettingsData = deserialize_str(
            r#"(constraints: Some([leadtime, material]), plan_type: Some(3), lazy_delay: Some("2d"))"#,
            Format::Ron,
            Path::new("s.ron"),
        )
        .unwrap();
        let resolved = s.resolve(Path::new("s.ron")).unwrap();
        assert_eq!(resolved.constraints, settings::LEADTIME | settings::MATERIAL);
        assert_eq!(resolved.plan_type, PlanType::Unconstrained);
        assert_eq!(resolved.lazy_delay, Duration::from_days(2));
    }

    #[test]
    fn toml_settings() {
        let s: SettingsData = deserialize_str(
            "plan_type = 2\nallow_splits = false\nadministrative_leadtime = 3600\n",
            Format::Toml,
            Path::new("s.toml"),
        )
        .unwrap();
        let resolved = s.resolve(Path::new("s.toml")).unwrap();
        assert_eq!(resolved.plan_type, PlanType::UnconstrainedSearch);
        assert!(!resolved.allow_splits);
        assert_eq!(resolved.administrative_leadtime, Duration(3600));
    }

    #[test]
    fn json_settings() {
        let s: SettingsData = deserialize_str(
            r#"{"max_parallel": 2, "erase_previous_first": true, "minimum_delay": "1h"}"#,
            Format::Json,
            Path::new("s.json"),
        )
        .unwrap();
        let resolved = s.resolve(Path::new("s.json")).unwrap();
        assert_eq!(resolved.max_parallel, 2);
        assert!(resolved.erase_previous_first);
        assert_eq!(resolved.minimum_delay, Duration(3600));
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let result: Result<SettingsData, _> =
            deserialize_str(r#"{"plan_typ": 1}"#, Format::Json, Path::new("s.json"));
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));
    }

    // -----------------------------------------------------------------------
    // Files on disk
    // -----------------------------------------------------------------------

    #[test]
    fn load_settings_from_file() {
        let dir = make_test_dir("load");
        let path = dir.join("settings.toml");
        fs::write(&path, "iteration_accuracy = 5.0\nautocommit = false\n").unwrap();
        let s = load_settings(&path).unwrap();
        assert_eq!(s.iteration_accuracy, 5.0);
        assert!(!s.autocommit);
        cleanup(&dir);
    }

    #[test]
    fn invalid_value_in_file_is_rejected() {
        let dir = make_test_dir("invalid");
        let path = dir.join("settings.json");
        fs::write(&path, r#"{"iteration_accuracy": 150.0}"#).unwrap();
        assert!(matches!(
            load_settings(&path),
            Err(DataLoadError::Config { .. })
        ));
        cleanup(&dir);
    }

    #[test]
    fn directory_lookup() {
        let dir = make_test_dir("dir");
        assert!(matches!(
            load_settings_from_dir(&dir),
            Err(DataLoadError::MissingRequired { .. })
        ));
        fs::write(dir.join("settings.ron"), "(log_level: Some(1))").unwrap();
        assert_eq!(load_settings_from_dir(&dir).unwrap().log_level, 1);
        fs::write(dir.join("settings.json"), "{}").unwrap();
        assert!(matches!(
            load_settings_from_dir(&dir),
            Err(DataLoadError::ConflictingFormats { .. })
        ));
        cleanup(&dir);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = make_test_dir("missing");
        assert!(matches!(
            load_settings(&dir.join("nope.toml")),
            Err(DataLoadError::Io(_))
        ));
        cleanup(&dir);
    }
}
