//! Reading the TOML config file from disk.
//!
//! The file is optional: the server only reads one when `--config` (or
//! `RELAY_CONFIG`) names it.  A named file that cannot be read is an error;
//! silently starting with defaults would hide a typo in the path.

use std::path::Path;

use tracing::debug;

use crate::domain::{ConfigError, FileConfig};

/// Loads and parses the config file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read and [`ConfigError::Parse`]
/// if its TOML is malformed.
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file = FileConfig::from_toml_str(&content)?;
    debug!("loaded config file {}", path.display());
    Ok(file)
}
