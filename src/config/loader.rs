// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PlaybookFile, RawPlaybookFile};
use crate::errors::Result;

/// Load a playbook file from a given path and return the raw `RawPlaybookFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (job references, regexes, durations). Use [`load_and_validate`]
/// for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPlaybookFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

/// Parse a playbook definition from TOML text.
pub fn load_from_str(contents: &str) -> Result<RawPlaybookFile> {
    let playbook: RawPlaybookFile = toml::from_str(contents)?;
    Ok(playbook)
}

/// Load a playbook file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - at least one step,
///   - unknown implant / socks server references,
///   - steps with two jobs,
///   - bad durations, timestamps, regexes and output paths.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PlaybookFile> {
    let raw = load_from_path(&path)?;
    PlaybookFile::try_from(raw)
}

/// Playbook file used when none is given on the command line.
pub fn default_playbook_path() -> PathBuf {
    PathBuf::from("Playbook.toml")
}
