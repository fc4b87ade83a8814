use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use super::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecursiveWatchStrategy {
    /// One recursive OS watch on the target directory.
    #[default]
    Native,
    /// One non-recursive watch per enumerated directory under the target.
    Enumerated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
    #[serde(default = "default_snippet_limit_bytes")]
    pub snippet_limit_bytes: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_parent_poll_ms")]
    pub parent_poll_ms: u64,
    #[serde(default)]
    pub recursive_watch: RecursiveWatchStrategy,
    #[serde(default = "default_enumerated_watch_depth")]
    pub enumerated_watch_depth: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            output_limit_bytes: default_output_limit_bytes(),
            snippet_limit_bytes: default_snippet_limit_bytes(),
            debounce_ms: default_debounce_ms(),
            breaker_threshold: default_breaker_threshold(),
            parent_poll_ms: default_parent_poll_ms(),
            recursive_watch: RecursiveWatchStrategy::default(),
            enumerated_watch_depth: default_enumerated_watch_depth(),
        }
    }
}

impl BridgeSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn parent_poll_interval(&self) -> Duration {
        Duration::from_millis(self.parent_poll_ms)
    }

    /// Clamps every field into its supported range.
    pub fn normalized(mut self) -> Self {
        self.command_timeout_ms = self
            .command_timeout_ms
            .clamp(MIN_COMMAND_TIMEOUT_MS, MAX_COMMAND_TIMEOUT_MS);
        self.output_limit_bytes = self
            .output_limit_bytes
            .clamp(MIN_OUTPUT_LIMIT_BYTES, MAX_OUTPUT_LIMIT_BYTES);
        self.snippet_limit_bytes = self.snippet_limit_bytes.clamp(1, self.output_limit_bytes);
        self.debounce_ms = self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        self.breaker_threshold = self
            .breaker_threshold
            .clamp(MIN_BREAKER_THRESHOLD, MAX_BREAKER_THRESHOLD);
        self.parent_poll_ms = self.parent_poll_ms.clamp(MIN_PARENT_POLL_MS, MAX_PARENT_POLL_MS);
        self.enumerated_watch_depth = self.enumerated_watch_depth.clamp(1, MAX_ENUMERATED_WATCH_DEPTH);
        self
    }
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_millis() as u64
}

fn default_output_limit_bytes() -> usize {
    DEFAULT_OUTPUT_LIMIT_BYTES
}

fn default_snippet_limit_bytes() -> usize {
    DEFAULT_SNIPPET_LIMIT_BYTES
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_WINDOW.as_millis() as u64
}

fn default_breaker_threshold() -> u32 {
    DEFAULT_BREAKER_THRESHOLD
}

fn default_parent_poll_ms() -> u64 {
    DEFAULT_PARENT_POLL_INTERVAL.as_millis() as u64
}

fn default_enumerated_watch_depth() -> usize {
    DEFAULT_ENUMERATED_WATCH_DEPTH
}

pub(crate) fn write_bridge_settings_file(path: &Path, settings: &BridgeSettings) -> Result<(), String> {
    let body = serde_json::to_string_pretty(settings)
        .map_err(|error| format!("Failed to serialize bridge settings: {error}"))?;
    fs::write(path, format!("{body}\n"))
        .map_err(|error| format!("Failed to write {}: {error}", path.display()))
}

/// Loads settings from `path`, seeding the file with defaults when it is
/// missing and rewriting it with defaults when it cannot be parsed.
pub fn ensure_bridge_settings(path: &Path) -> Result<BridgeSettings, String> {
    if !path.is_file() {
        let settings = BridgeSettings::default();
        write_bridge_settings_file(path, &settings)?;
        return Ok(settings);
    }

    let raw = fs::read_to_string(path)
        .map_err(|error| format!("Failed to read {}: {error}", path.display()))?;

    match serde_json::from_str::<BridgeSettings>(&raw) {
        Ok(settings) => Ok(settings.normalized()),
        Err(error) => {
            warn!(
                path = %path.display(),
                %error,
                "bridge settings could not be parsed; recovering with defaults"
            );
            let settings = BridgeSettings::default();
            write_bridge_settings_file(path, &settings)?;
            Ok(settings)
        }
    }
}
