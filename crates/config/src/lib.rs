use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "parley.toml",
    "config/parley.toml",
    "crates/config/parley.toml",
    "../parley.toml",
    "../config/parley.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub typing: TypingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/ws".to_string(),
        }
    }
}

/// Backoff settings for re-establishing a dropped channel.
///
/// ```
/// use parley_config::ReconnectConfig;
///
/// let reconnect = ReconnectConfig::default();
/// assert_eq!(reconnect.base_delay_ms, 500);
/// assert_eq!(reconnect.max_delay_ms, 30_000);
/// assert!(reconnect.max_attempts.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "ReconnectConfig::default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "ReconnectConfig::default_max_delay")]
    pub max_delay_ms: u64,
    /// `None` keeps retrying for the lifetime of the session.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "ReconnectConfig::default_retry_rejected")]
    pub retry_rejected_handshake: bool,
}

impl ReconnectConfig {
    const fn default_base_delay() -> u64 {
        500
    }

    const fn default_max_delay() -> u64 {
        30_000
    }

    const fn default_retry_rejected() -> bool {
        true
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: Self::default_base_delay(),
            max_delay_ms: Self::default_max_delay(),
            max_attempts: None,
            retry_rejected_handshake: Self::default_retry_rejected(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// Local inactivity window after which a `typing.stop` is emitted.
    #[serde(default = "TypingConfig::default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Window after which a remote typing entry without refresh expires.
    #[serde(default = "TypingConfig::default_remote_expiry")]
    pub remote_expiry_ms: u64,
}

impl TypingConfig {
    const fn default_idle_timeout() -> u64 {
        2_000
    }

    const fn default_remote_expiry() -> u64 {
        3_000
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn remote_expiry(&self) -> Duration {
        Duration::from_millis(self.remote_expiry_ms)
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: Self::default_idle_timeout(),
            remote_expiry_ms: Self::default_remote_expiry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "SessionConfig::default_command_buffer")]
    pub command_buffer: usize,
    #[serde(default = "SessionConfig::default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl SessionConfig {
    const fn default_connect_timeout() -> u64 {
        10_000
    }

    const fn default_command_buffer() -> usize {
        64
    }

    const fn default_outbound_buffer() -> usize {
        256
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Self::default_connect_timeout(),
            command_buffer: Self::default_command_buffer(),
            outbound_buffer: Self::default_outbound_buffer(),
        }
    }
}

impl AppConfig {
    /// Clamp values that would otherwise produce zero-length timers or an
    /// inverted backoff range.
    pub fn normalized(mut self) -> Self {
        self.reconnect.base_delay_ms = self.reconnect.base_delay_ms.max(1);
        self.reconnect.max_delay_ms = self
            .reconnect
            .max_delay_ms
            .max(self.reconnect.base_delay_ms);
        self.typing.idle_timeout_ms = self.typing.idle_timeout_ms.max(1);
        self.typing.remote_expiry_ms = self.typing.remote_expiry_ms.max(1);
        self.session.connect_timeout_ms = self.session.connect_timeout_ms.max(1);
        self.session.command_buffer = self.session.command_buffer.max(1);
        self.session.outbound_buffer = self.session.outbound_buffer.max(1);
        self
    }
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the client configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use parley_config::load;
///
/// std::env::remove_var("PARLEY_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.server.url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("server.url", defaults.server.url.clone())?
        .set_default(
            "reconnect.base_delay_ms",
            clamp_to_i64(defaults.reconnect.base_delay_ms),
        )?
        .set_default(
            "reconnect.max_delay_ms",
            clamp_to_i64(defaults.reconnect.max_delay_ms),
        )?
        .set_default(
            "reconnect.retry_rejected_handshake",
            defaults.reconnect.retry_rejected_handshake,
        )?
        .set_default(
            "typing.idle_timeout_ms",
            clamp_to_i64(defaults.typing.idle_timeout_ms),
        )?
        .set_default(
            "typing.remote_expiry_ms",
            clamp_to_i64(defaults.typing.remote_expiry_ms),
        )?
        .set_default(
            "session.connect_timeout_ms",
            clamp_to_i64(defaults.session.connect_timeout_ms),
        )?
        .set_default(
            "session.command_buffer",
            clamp_to_i64(defaults.session.command_buffer as u64),
        )?
        .set_default(
            "session.outbound_buffer",
            clamp_to_i64(defaults.session.outbound_buffer as u64),
        )?;

    let environment_overrides = config::Environment::with_prefix("PARLEY").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("PARLEY_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via PARLEY_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?
        .normalized();

    debug!(?config, "loaded client configuration");
    Ok(config)
}
