//! Viewer and client configuration.
//!
//! Configuration is passed explicitly to constructors; nothing here is
//! process-global.

use std::{
    fs,
    net::{Ipv6Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{ConfigError, codec::DEFAULT_MAX_FRAME_LENGTH};

/// Default port the viewer listens on.
pub const DEFAULT_PORT: u16 = 8417;

fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_port() -> u16 {
    DEFAULT_PORT
}
const fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}
const fn default_messages_per_frame() -> usize {
    256
}
const fn default_connect_timeout_ms() -> u64 {
    5_000
}
const fn default_startup_timeout_ms() -> u64 {
    10_000
}
const fn default_poll_interval_ms() -> u64 {
    100
}
fn default_viewer_command() -> String {
    "bodyview-viewer".to_string()
}

/// Join host and port, bracketing IPv6 literals.
fn host_port(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Viewer-side configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    /// Listen for remote clients.
    #[serde(default)]
    pub server_enabled: bool,
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted frame in bytes.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
    /// Upper bound of events processed per rendered frame.
    #[serde(default = "default_messages_per_frame")]
    pub messages_per_frame: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server_enabled: false,
            host: default_host(),
            port: default_port(),
            max_frame_length: default_max_frame_length(),
            messages_per_frame: default_messages_per_frame(),
        }
    }
}

impl ViewerConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `viewer.toml` from the user config directory, if present.
    ///
    /// # Errors
    /// Returns error if the file exists but is invalid.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Location of the per-user viewer configuration.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bodyview").join("viewer.toml"))
    }

    /// `host:port` the server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        host_port(&self.host, self.port)
    }
}

/// Client-side configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Viewer host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Viewer port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bound on a single connection attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on waiting for a spawned viewer to start listening.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Delay between readiness probes of a spawned viewer.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Command used to launch a viewer process (shell syntax).
    #[serde(default = "default_viewer_command")]
    pub viewer_command: String,
    /// Kill a spawned viewer when the session closes.
    #[serde(default)]
    pub terminate_on_close: bool,
    /// Largest frame the client will write.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            viewer_command: default_viewer_command(),
            terminate_on_close: false,
            max_frame_length: default_max_frame_length(),
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Config pointing at an explicit viewer address.
    #[must_use]
    pub fn for_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Self::default()
        }
    }

    /// `host:port` of the viewer.
    #[must_use]
    pub fn addr(&self) -> String {
        host_port(&self.host, self.port)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
