//! Application-level configuration: game tunables and background task cadence.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use anyhow::bail;
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::ScoringRules;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ARENA_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
///
/// Loaded once at startup and validated; never mutated afterward.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Length of one round window.
    pub round_duration: Duration,
    /// How long an invite stays pending before it expires.
    pub invite_ttl: Duration,
    /// Maximum roster size per room.
    pub room_capacity: usize,
    /// How long an all-disconnected room lingers before auto-cancel.
    pub disconnect_grace: Duration,
    /// Points awarded for any correct answer.
    pub base_points: u32,
    /// Maximum speed bonus for an instantaneous correct answer.
    pub max_speed_bonus: u32,
    /// How often the scheduler scans for due timer entries.
    pub timer_poll_interval: Duration,
    /// How often the reconciler sweeps accepted invites.
    pub reconcile_interval: Duration,
    /// How long finished or cancelled rooms stay readable in the store.
    pub finished_room_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(30),
            invite_ttl: Duration::from_secs(300),
            room_capacity: 8,
            disconnect_grace: Duration::from_secs(120),
            base_points: 100,
            max_speed_bonus: 100,
            timer_poll_interval: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(30),
            finished_room_ttl: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk.
    ///
    /// A missing or unreadable file falls back to built-in defaults; a file
    /// that parses but carries invalid values aborts startup.
    pub fn load() -> anyhow::Result<Self> {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    config.validate()?;
                    info!(path = %path.display(), "loaded configuration");
                    Ok(config)
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Ok(Self::default())
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Ok(Self::default())
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Scoring constants derived from this configuration.
    pub fn scoring_rules(&self) -> ScoringRules {
        ScoringRules {
            base_points: self.base_points,
            max_speed_bonus: self.max_speed_bonus,
            round_duration_ms: self.round_duration.as_millis() as u64,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.round_duration.is_zero() {
            bail!("round duration must be strictly positive");
        }
        if self.invite_ttl.is_zero() {
            bail!("invite ttl must be strictly positive");
        }
        if self.room_capacity < 2 {
            bail!("room capacity must allow at least 2 players");
        }
        if self.disconnect_grace.is_zero() {
            bail!("disconnect grace must be strictly positive");
        }
        if self.timer_poll_interval.is_zero() {
            bail!("timer poll interval must be strictly positive");
        }
        Ok(())
    }
}

/// JSON representation of the configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    round_duration_secs: Option<u64>,
    invite_ttl_secs: Option<u64>,
    room_capacity: Option<usize>,
    disconnect_grace_secs: Option<u64>,
    base_points: Option<u32>,
    max_speed_bonus: Option<u32>,
    timer_poll_interval_ms: Option<u64>,
    reconcile_interval_secs: Option<u64>,
    finished_room_ttl_secs: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            round_duration: raw
                .round_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.round_duration),
            invite_ttl: raw
                .invite_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.invite_ttl),
            room_capacity: raw.room_capacity.unwrap_or(defaults.room_capacity),
            disconnect_grace: raw
                .disconnect_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.disconnect_grace),
            base_points: raw.base_points.unwrap_or(defaults.base_points),
            max_speed_bonus: raw.max_speed_bonus.unwrap_or(defaults.max_speed_bonus),
            timer_poll_interval: raw
                .timer_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timer_poll_interval),
            reconcile_interval: raw
                .reconcile_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            finished_room_ttl: raw
                .finished_room_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.finished_room_ttl),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"round_duration_secs": 20, "room_capacity": 4}"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.round_duration, Duration::from_secs(20));
        assert_eq!(config.room_capacity, 4);
        assert_eq!(config.invite_ttl, AppConfig::default().invite_ttl);
    }

    #[test]
    fn tiny_capacity_is_rejected() {
        let config = AppConfig {
            room_capacity: 1,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
