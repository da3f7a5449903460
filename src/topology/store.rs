//! Reading and writing `chain_config.json` in a network's base directory.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use thiserror::Error;

use super::types::NetworkConfiguration;

/// File holding the topology inside the base directory.
pub const CONFIG_FILE_NAME: &str = "chain_config.json";

/// Errors raised while reading or persisting the topology.
#[derive(Debug, Error)]
pub enum TopologyStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the file does not contain a valid topology.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the topology cannot be rendered.
    #[error("failed to render topology for {path}: {message}")]
    Render {
        /// Path the topology was meant for.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Loads and saves the topology of one base directory.
#[derive(Clone, Debug)]
pub struct TopologyStore {
    base: Utf8PathBuf,
}

impl TopologyStore {
    /// Creates a store for `base`.
    #[must_use]
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Full path of the configuration file.
    #[must_use]
    pub fn path(&self) -> Utf8PathBuf {
        self.base.join(CONFIG_FILE_NAME)
    }

    /// Reads the topology.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyStoreError::Io`] when the file cannot be read and
    /// [`TopologyStoreError::Parse`] when it is not a valid topology.
    pub fn read(&self) -> Result<NetworkConfiguration, TopologyStoreError> {
        let path = self.path();
        let dir = open_base(&self.base)?;
        let contents = dir
            .read_to_string(CONFIG_FILE_NAME)
            .map_err(|err| io_error(&path, &err))?;
        serde_json::from_str(&contents).map_err(|err| TopologyStoreError::Parse {
            path,
            message: err.to_string(),
        })
    }

    /// Writes the topology as tab-indented JSON readable only by its owner.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyStoreError`] when rendering or writing fails.
    pub fn write(&self, config: &NetworkConfiguration) -> Result<Utf8PathBuf, TopologyStoreError> {
        let path = self.path();
        let rendered = render(&path, config)?;
        let dir = open_base(&self.base)?;
        dir.write(CONFIG_FILE_NAME, rendered)
            .map_err(|err| io_error(&path, &err))?;
        restrict_to_owner(&dir, &path)?;
        Ok(path)
    }
}

fn open_base(base: &Utf8Path) -> Result<Dir, TopologyStoreError> {
    Dir::open_ambient_dir(base, ambient_authority()).map_err(|err| io_error(base, &err))
}

fn render(path: &Utf8Path, config: &NetworkConfiguration) -> Result<Vec<u8>, TopologyStoreError> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"\t"));
    config
        .serialize(&mut serializer)
        .map_err(|err| TopologyStoreError::Render {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    buffer.push(b'\n');
    Ok(buffer)
}

#[cfg(unix)]
fn restrict_to_owner(dir: &Dir, path: &Utf8Path) -> Result<(), TopologyStoreError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = cap_std::fs::Permissions::from_std(std::fs::Permissions::from_mode(0o600));
    dir.set_permissions(CONFIG_FILE_NAME, permissions)
        .map_err(|err| io_error(path, &err))
}

#[cfg(not(unix))]
fn restrict_to_owner(_dir: &Dir, _path: &Utf8Path) -> Result<(), TopologyStoreError> {
    Ok(())
}

fn io_error(path: &Utf8Path, err: &std::io::Error) -> TopologyStoreError {
    TopologyStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
