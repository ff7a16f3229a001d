//! Id command implementation.

use hubsync_engine::load_or_create_unique_id;
use std::path::Path;

/// Prints the unique id stored at `path`, creating it on first use.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let id = load_or_create_unique_id(path)?;
    println!("{id}");
    Ok(())
}
