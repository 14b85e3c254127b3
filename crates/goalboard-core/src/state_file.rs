use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Reads a JSON state file, returning `None` when it does not exist yet.
pub fn read_json_state<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    let state = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(state))
}

/// Replaces the state file with pretty JSON of `state`.
///
/// The payload is flushed to a sibling `.tmp` file before the rename, so a
/// crash leaves either the previous state or the new one.
pub fn write_json_state<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    if path.is_dir() {
        bail!("state path '{}' is a directory", path.display());
    }
    let Some(file_name) = path.file_name() else {
        bail!("state path '{}' has no file name", path.display());
    };
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut payload = serde_json::to_vec_pretty(state).context("failed to serialize state")?;
    payload.push(b'\n');

    let mut staged_name = file_name.to_os_string();
    staged_name.push(".tmp");
    let staged = PathBuf::from(path).with_file_name(staged_name);
    let mut file = File::create(&staged)
        .with_context(|| format!("failed to create {}", staged.display()))?;
    file.write_all(&payload)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write {}", staged.display()))?;
    fs::rename(&staged, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
