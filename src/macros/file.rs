//! Macro persistence and the named macro library.
//!
//! On disk a macro is a JSON document: a small header (format version,
//! total duration, truncation flag, wall-clock recording time) plus the
//! ordered event records as `(offset_ms, channel, value)`. The loader
//! validates before constructing anything - a file with offsets running
//! backwards is rejected as corrupt and no partial macro escapes.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::event::Channel;
use crate::macros::{Macro, MacroError, MacroEvent};

/// Current macro file format version.
pub const MACRO_FILE_VERSION: u32 = 1;

/// Errors loading or saving macro files.
#[derive(Debug, thiserror::Error)]
pub enum MacroFileError {
    #[error("corrupt macro file: {0}")]
    CorruptMacro(String),

    #[error("unsupported macro file version {0} (expected {MACRO_FILE_VERSION})")]
    UnsupportedVersion(u32),

    #[error("invalid macro name '{0}'")]
    InvalidName(String),

    #[error("failed to parse macro file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct MacroFile {
    version: u32,
    total_duration_ms: u64,
    #[serde(default)]
    truncated: bool,
    recorded_at: DateTime<Local>,
    events: Vec<MacroRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MacroRecord {
    offset_ms: u64,
    channel: Channel,
    value: f32,
}

/// Write a macro as pretty JSON.
///
/// Offsets are stored with millisecond precision; sub-millisecond
/// spacing does not survive a save/load round trip.
pub fn save_macro(path: &Path, sequence: &Macro) -> Result<(), MacroFileError> {
    let file = MacroFile {
        version: MACRO_FILE_VERSION,
        total_duration_ms: sequence.total_duration().as_millis() as u64,
        truncated: sequence.is_truncated(),
        recorded_at: Local::now(),
        events: sequence
            .events()
            .iter()
            .map(|e| MacroRecord {
                offset_ms: e.offset.as_millis() as u64,
                channel: e.channel,
                value: e.value,
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json)?;
    info!(
        "Saved macro to {} ({} events, {}ms)",
        path.display(),
        file.events.len(),
        file.total_duration_ms
    );
    Ok(())
}

/// Load and validate a macro file.
///
/// Rejects unknown versions and any event sequence whose offsets
/// decrease; on rejection no macro object is produced.
pub fn load_macro(path: &Path) -> Result<Macro, MacroFileError> {
    let json = fs::read_to_string(path)?;
    let file: MacroFile = serde_json::from_str(&json)?;

    if file.version != MACRO_FILE_VERSION {
        return Err(MacroFileError::UnsupportedVersion(file.version));
    }

    let events: Vec<MacroEvent> = file
        .events
        .iter()
        .map(|r| MacroEvent {
            offset: Duration::from_millis(r.offset_ms),
            channel: r.channel,
            value: r.value,
        })
        .collect();

    let mut sequence = Macro::from_events(events).map_err(|err| match err {
        MacroError::NonMonotonicOffsets { index } => MacroFileError::CorruptMacro(format!(
            "{}: event {} has a decreasing offset",
            path.display(),
            index
        )),
    })?;

    if sequence.total_duration().as_millis() as u64 != file.total_duration_ms {
        warn!(
            "Macro header duration {}ms disagrees with events ({}ms), trusting the events",
            file.total_duration_ms,
            sequence.total_duration().as_millis()
        );
    }
    if file.truncated {
        sequence.mark_truncated();
    }

    debug!(
        "Loaded macro from {} ({} events)",
        path.display(),
        sequence.len()
    );
    Ok(sequence)
}

fn library_path(dir: &Path, name: &str) -> Result<PathBuf, MacroFileError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(MacroFileError::InvalidName(name.to_string()));
    }
    Ok(dir.join(format!("{name}.json")))
}

/// Save into the macro library under a caller-chosen name.
pub fn save_named(dir: &Path, name: &str, sequence: &Macro) -> Result<PathBuf, MacroFileError> {
    let path = library_path(dir, name)?;
    fs::create_dir_all(dir)?;
    save_macro(&path, sequence)?;
    Ok(path)
}

/// Load a named macro from the library.
pub fn load_named(dir: &Path, name: &str) -> Result<Macro, MacroFileError> {
    let path = library_path(dir, name)?;
    load_macro(&path)
}

/// Names of every macro saved in the library directory, sorted.
pub fn list_macros(dir: &Path) -> Result<Vec<String>, MacroFileError> {
    let mut names = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Macro {
        Macro::from_events(vec![
            MacroEvent {
                offset: Duration::ZERO,
                channel: Channel::ButtonA,
                value: 1.0,
            },
            MacroEvent {
                offset: Duration::from_millis(500),
                channel: Channel::LeftStickX,
                value: -0.5,
            },
            MacroEvent {
                offset: Duration::from_millis(1200),
                channel: Channel::ButtonA,
                value: 0.0,
            },
        ])
        .unwrap()
    }

    #[test]
    fn save_load_preserves_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("combo.json");

        save_macro(&path, &sample()).unwrap();
        let loaded = load_macro(&path).unwrap();

        assert_eq!(loaded, sample());
    }

    #[test]
    fn truncated_flag_survives_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.json");

        let mut sequence = sample();
        sequence.mark_truncated();
        save_macro(&path, &sequence).unwrap();

        assert!(load_macro(&path).unwrap().is_truncated());
    }

    #[test]
    fn decreasing_offsets_are_rejected_as_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{
                "version": 1,
                "total_duration_ms": 500,
                "recorded_at": "2026-08-05T12:00:00+00:00",
                "events": [
                    {"offset_ms": 0, "channel": "ButtonA", "value": 1.0},
                    {"offset_ms": 500, "channel": "ButtonA", "value": 0.0},
                    {"offset_ms": 200, "channel": "ButtonB", "value": 1.0}
                ]
            }"#,
        )
        .unwrap();

        assert!(matches!(
            load_macro(&path),
            Err(MacroFileError::CorruptMacro(_))
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.json");
        fs::write(
            &path,
            r#"{
                "version": 99,
                "total_duration_ms": 0,
                "recorded_at": "2026-08-05T12:00:00+00:00",
                "events": []
            }"#,
        )
        .unwrap();

        assert!(matches!(
            load_macro(&path),
            Err(MacroFileError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn unknown_channel_fails_to_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alien.json");
        fs::write(
            &path,
            r#"{
                "version": 1,
                "total_duration_ms": 0,
                "recorded_at": "2026-08-05T12:00:00+00:00",
                "events": [
                    {"offset_ms": 0, "channel": "TurboSlider", "value": 1.0}
                ]
            }"#,
        )
        .unwrap();

        assert!(matches!(load_macro(&path), Err(MacroFileError::Parse(_))));
    }

    #[test]
    fn library_roundtrip_and_listing() {
        let dir = tempdir().unwrap();
        let lib = dir.path().join("macros");

        save_named(&lib, "dash_combo", &sample()).unwrap();
        save_named(&lib, "aim_snap", &Macro::empty()).unwrap();

        assert_eq!(
            list_macros(&lib).unwrap(),
            vec!["aim_snap".to_string(), "dash_combo".to_string()]
        );
        assert_eq!(load_named(&lib, "dash_combo").unwrap(), sample());
    }

    #[test]
    fn listing_a_missing_library_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_macros(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn hostile_names_are_rejected() {
        let dir = tempdir().unwrap();
        for name in ["", "../escape", "with space", "slash/y"] {
            assert!(matches!(
                save_named(dir.path(), name, &Macro::empty()),
                Err(MacroFileError::InvalidName(_))
            ));
        }
    }
}
