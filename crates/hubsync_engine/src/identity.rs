//! Stable device identity.

use crate::error::{EngineError, EngineResult};
use std::fs;
use std::io;
use std::path::Path;
use uuid::Uuid;

/// Returns the unique id stored at `path`, creating it on first use.
///
/// The id is a random UUID written once and read back on every later
/// start, so a device keeps its identity (and its place in every hub's
/// peer registry) across restarts. A blank file is treated as missing.
pub fn load_or_create_unique_id(path: &Path) -> EngineResult<String> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let id = contents.trim();
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(EngineError::Identity(err)),
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(EngineError::Identity)?;
    }
    fs::write(path, format!("{id}\n")).map_err(EngineError::Identity)?;
    tracing::info!(path = %path.display(), id = %id, "created device identity");
    Ok(id)
}
