//! Configuration for the translation relay.
//!
//! All deployment-facing knobs come from the environment (the variable names
//! are part of the hosting contract and predate this implementation); tuning
//! constants live in [`RelayTuning`] with serde defaults so embedders can
//! override them programmatically.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::error::{RelayError, Result};
use crate::settings::UserSettings;

/// Environment variable carrying the registered package name.
pub const ENV_PACKAGE_NAME: &str = "PACKAGE_NAME";
/// Environment variable carrying the upstream API key.
pub const ENV_API_KEY: &str = "AUGMENTOS_API_KEY";
/// Environment variable overriding the HTTP port.
pub const ENV_PORT: &str = "PORT";
/// Environment variable selecting the deployment mode.
pub const ENV_RUN_MODE: &str = "NODE_ENV";
/// Environment variable overriding the upstream WebSocket endpoint.
pub const ENV_UPSTREAM_URL: &str = "AUGMENTOS_WS_URL";
/// Environment variable pointing at the settings defaults descriptor.
pub const ENV_SETTINGS_PATH: &str = "SETTINGS_PATH";

const DEFAULT_PORT: u16 = 80;
const DEFAULT_UPSTREAM_URL: &str = "wss://prod.augmentos.cloud/app-ws";
const DEFAULT_SETTINGS_PATH: &str = "app_config.json";

/// Process-wide relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Registered package name, sent during upstream authentication.
    pub package_name: String,
    /// Upstream API key; also the root of viewer-token derivation.
    pub api_key: String,
    /// HTTP port for the viewer surface.
    pub port: u16,
    /// Whether viewer authentication is strict (production) or permissive.
    pub production: bool,
    /// Upstream WebSocket endpoint.
    pub upstream_url: String,
    /// Per-user default settings (descriptor-provided or built-in).
    pub default_settings: UserSettings,
    /// Tuning constants.
    pub tuning: RelayTuning,
}

/// Tuning constants for the engine's timers and buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayTuning {
    /// Minimum gap between interim glasses writes, in milliseconds.
    pub debounce_delay_ms: u64,
    /// Seconds without a translation event before the session is cleared.
    pub inactivity_timeout_s: u64,
    /// How long final captions stay on the glasses, in milliseconds.
    pub final_display_ms: u64,
    /// Confident-prefix acceptance threshold in [0, 1].
    pub acceptance_threshold: f64,
    /// Cap on retained wrapped final captions.
    pub max_final_captions: usize,
    /// Cap on conversation log entries.
    pub max_log_entries: usize,
    /// Per-subscriber outbound event buffer; overflow drops the subscriber.
    pub subscriber_buffer: usize,
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            debounce_delay_ms: 400,
            inactivity_timeout_s: 40,
            final_display_ms: 20_000,
            acceptance_threshold: 0.4,
            max_final_captions: crate::caption::MAX_FINAL_CAPTIONS,
            max_log_entries: crate::transcript::MAX_LOG_ENTRIES,
            subscriber_buffer: 64,
        }
    }
}

impl RelayConfig {
    /// Build the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing — the only fatal
    /// startup condition.
    pub fn from_env() -> Result<Self> {
        let package_name = require_env(ENV_PACKAGE_NAME)?;
        let api_key = require_env(ENV_API_KEY)?;

        let port = match std::env::var(ENV_PORT) {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
                RelayError::Config(format!("{ENV_PORT} must be a port number, got `{raw}`"))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let production = std::env::var(ENV_RUN_MODE)
            .map(|mode| mode.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let upstream_url = std::env::var(ENV_UPSTREAM_URL)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_owned());

        let settings_path = std::env::var(ENV_SETTINGS_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_PATH));
        let default_settings = load_default_settings(&settings_path);

        Ok(Self {
            package_name,
            api_key,
            port,
            production,
            upstream_url,
            default_settings,
            tuning: RelayTuning::default(),
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
        _ => Err(RelayError::Config(format!(
            "required environment variable {name} is not set"
        ))),
    }
}

/// Load the settings defaults descriptor, falling back to built-in defaults.
///
/// A missing or malformed descriptor is not fatal: the relay logs one warning
/// and continues with `UserSettings::default()`.
#[must_use]
pub fn load_default_settings(path: &std::path::Path) -> UserSettings {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<UserSettings>(&raw) {
            Ok(settings) => settings.normalized(),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    "settings descriptor is malformed, using built-in defaults: {err}"
                );
                UserSettings::default()
            }
        },
        Err(err) => {
            warn!(
                path = %path.display(),
                "settings descriptor not readable, using built-in defaults: {err}"
            );
            UserSettings::default()
        }
    }
}
