//! Layered configuration via `ortho-config`.
//!
//! Values merge defaults, `fleetmesh.toml` (or the file named by
//! `FLEETMESH_CONFIG_PATH`) and `FLEETMESH_*` environment variables.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::fleet::Fleet;
use crate::gateway::DEFAULT_MACHINE_BIN;
use crate::pipeline::{
    DEFAULT_CONTAINER_USER, DEFAULT_IDENTITY_COMMAND, DEFAULT_IMAGE, DEFAULT_REMOTE_ROOT,
    NodePorts, PipelineSettings,
};
use crate::poll::{Backoff, PollPolicy};

/// Fleet-wide settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FLEETMESH",
    discovery(
        app_name = "fleetmesh",
        env_var = "FLEETMESH_CONFIG_PATH",
        config_file_name = "fleetmesh.toml",
        dotfile_name = ".fleetmesh.toml",
        project_file_name = "fleetmesh.toml"
    )
)]
pub struct FleetConfig {
    /// Machine tool used to reach hosts.
    #[ortho_config(default = DEFAULT_MACHINE_BIN.to_owned())]
    pub machine_bin: String,
    /// Image used for every container.
    #[ortho_config(default = DEFAULT_IMAGE.to_owned())]
    pub image: String,
    /// User that owns the files pushed into the shared volume.
    #[ortho_config(default = DEFAULT_CONTAINER_USER.to_owned())]
    pub container_user: String,
    /// Root of the shared volume inside the containers.
    #[ortho_config(default = DEFAULT_REMOTE_ROOT.to_owned())]
    pub remote_root: String,
    /// Command printing the node's public key inside the core container.
    #[ortho_config(default = DEFAULT_IDENTITY_COMMAND.to_owned())]
    pub identity_command: String,
    /// Peer-to-peer port of the core.
    #[ortho_config(default = 46656)]
    pub p2p_port: u16,
    /// Control/RPC port of the core.
    #[ortho_config(default = 46657)]
    pub rpc_port: u16,
    /// Port the application listens on.
    #[ortho_config(default = 46658)]
    pub app_port: u16,
    /// Attempts when waiting for the data-store socket.
    #[ortho_config(default = 9)]
    pub marker_attempts: u32,
    /// Attempt `i` of the socket wait sleeps `i` times this many seconds.
    #[ortho_config(default = 1)]
    pub marker_unit_secs: u64,
    /// Pause between launching the core and the first identity check.
    #[ortho_config(default = 10)]
    pub install_grace_secs: u64,
    /// Pause between identity checks.
    #[ortho_config(default = 5)]
    pub identity_retry_secs: u64,
    /// Upper bound on waiting for the node identity.
    #[ortho_config(default = 300)]
    pub identity_timeout_secs: u64,
    /// Status queries made to confirm the node identity.
    #[ortho_config(default = 5)]
    pub status_attempts: u32,
    /// Pause before each status query.
    #[ortho_config(default = 1)]
    pub status_retry_secs: u64,
    /// Timeout for a single control request.
    #[ortho_config(default = 10)]
    pub request_timeout_secs: u64,
    /// Optional upper bound on a whole host pipeline.
    pub host_timeout_secs: Option<u64>,
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a field holds an unusable value.
    #[error(
        "invalid {field}: {reason}; set FLEETMESH_{env_suffix} or add {field} to fleetmesh.toml",
        env_suffix = field.to_uppercase()
    )]
    InvalidField {
        /// Configuration key.
        field: &'static str,
        /// What is wrong with the value.
        reason: &'static str,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl FleetConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("fleetmesh")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that every value can be used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_text(&self.machine_bin, "machine_bin")?;
        require_text(&self.image, "image")?;
        require_text(&self.container_user, "container_user")?;
        require_text(&self.remote_root, "remote_root")?;
        require_text(&self.identity_command, "identity_command")?;
        require(self.p2p_port != 0, "p2p_port", "port must be non-zero")?;
        require(self.rpc_port != 0, "rpc_port", "port must be non-zero")?;
        require(self.app_port != 0, "app_port", "port must be non-zero")?;
        require(
            self.p2p_port != self.rpc_port,
            "rpc_port",
            "must differ from p2p_port",
        )?;
        require(self.marker_attempts > 0, "marker_attempts", "must be at least 1")?;
        require(self.status_attempts > 0, "status_attempts", "must be at least 1")?;
        require(
            self.identity_timeout_secs > 0,
            "identity_timeout_secs",
            "must be at least 1",
        )?;
        require(
            self.request_timeout_secs > 0,
            "request_timeout_secs",
            "must be at least 1",
        )?;
        require(
            self.host_timeout_secs != Some(0),
            "host_timeout_secs",
            "must be at least 1 when set",
        )?;
        Ok(())
    }

    /// Builds pipeline settings after validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn pipeline_settings(&self) -> Result<PipelineSettings, ConfigError> {
        self.validate()?;
        Ok(PipelineSettings {
            image: self.image.clone(),
            container_user: self.container_user.clone(),
            remote_root: self.remote_root.clone(),
            identity_command: self.identity_command.clone(),
            ports: NodePorts {
                p2p: self.p2p_port,
                rpc: self.rpc_port,
                app: self.app_port,
            },
            marker_poll: PollPolicy::attempts(
                self.marker_attempts,
                Backoff::Linear(Duration::from_secs(self.marker_unit_secs)),
            ),
            install_grace: Duration::from_secs(self.install_grace_secs),
            identity_poll: PollPolicy::until(
                Duration::from_secs(self.identity_timeout_secs),
                Backoff::Retry(Duration::from_secs(self.identity_retry_secs)),
            ),
            status_poll: PollPolicy::attempts(
                self.status_attempts,
                Backoff::Fixed(Duration::from_secs(self.status_retry_secs)),
            ),
        })
    }

    /// Coordinator honouring the configured per-host deadline.
    #[must_use]
    pub fn fleet(&self) -> Fleet {
        Fleet::new().with_host_timeout(self.host_timeout_secs.map(Duration::from_secs))
    }

    /// Timeout for a single control request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn require_text(value: &str, field: &'static str) -> Result<(), ConfigError> {
    require(!value.trim().is_empty(), field, "value must not be empty")
}

const fn require(ok: bool, field: &'static str, reason: &'static str) -> Result<(), ConfigError> {
    if ok {
        return Ok(());
    }
    Err(ConfigError::InvalidField { field, reason })
}
