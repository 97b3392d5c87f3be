//! Host list loading.
//!
//! The file holds one `address label` pair per line. Blank lines and lines
//! starting with `#` are ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostFileError {
    #[error("Failed to open file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read a host file into an address to label map.
///
/// A later line for the same address replaces the earlier label.
pub fn read_hosts_file(path: &Path) -> Result<BTreeMap<String, String>, HostFileError> {
    let contents = std::fs::read_to_string(path).map_err(|source| HostFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_hosts(&contents))
}

/// Parse host list text; malformed lines are skipped with a warning.
pub fn parse_hosts(contents: &str) -> BTreeMap<String, String> {
    let mut hosts = BTreeMap::new();

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(address), Some(label)) => {
                hosts.insert(address.to_string(), label.to_string());
            }
            _ => {
                tracing::warn!(
                    "Skipping host line {}: expected `address label`, got {:?}",
                    lineno + 1,
                    line
                );
            }
        }
    }

    hosts
}
