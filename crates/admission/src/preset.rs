//! Named rate limits

use crate::window::RateLimit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Built-in rate limit presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// General API traffic: 100 per 15 minutes
    Api,
    /// Sign-in attempts: 5 per 15 minutes
    Auth,
    /// Password reset requests: 3 per hour
    PasswordReset,
    /// Inbound provider webhooks: 100 per minute
    Webhook,
}

impl Preset {
    /// Every preset
    pub const ALL: [Preset; 4] = [
        Preset::Api,
        Preset::Auth,
        Preset::PasswordReset,
        Preset::Webhook,
    ];

    /// Stable name, also used to namespace window keys
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Api => "api",
            Preset::Auth => "auth",
            Preset::PasswordReset => "password_reset",
            Preset::Webhook => "webhook",
        }
    }

    /// Limit used when no override is configured
    pub fn default_limit(&self) -> RateLimit {
        match self {
            Preset::Api => RateLimit::new(100, Duration::from_secs(15 * 60)),
            Preset::Auth => RateLimit::new(5, Duration::from_secs(15 * 60)),
            Preset::PasswordReset => RateLimit::new(3, Duration::from_secs(60 * 60)),
            Preset::Webhook => RateLimit::per_minute(100),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown preset name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rate limit preset '{0}'")]
pub struct ParsePresetError(pub String);

impl FromStr for Preset {
    type Err = ParsePresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "api" => Ok(Preset::Api),
            "auth" => Ok(Preset::Auth),
            "password_reset" => Ok(Preset::PasswordReset),
            "webhook" => Ok(Preset::Webhook),
            _ => Err(ParsePresetError(s.to_string())),
        }
    }
}

/// Effective limit per preset
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresetTable {
    overrides: HashMap<Preset, RateLimit>,
}

impl PresetTable {
    /// Table with every preset at its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the limit for one preset
    pub fn with_override(mut self, preset: Preset, limit: RateLimit) -> Self {
        self.overrides.insert(preset, limit);
        self
    }

    /// Replace the limit for the preset called `name`
    pub fn set_override(&mut self, name: &str, limit: RateLimit) -> Result<(), ParsePresetError> {
        let preset: Preset = name.parse()?;
        self.overrides.insert(preset, limit);
        Ok(())
    }

    /// Effective limit for `preset`
    pub fn get(&self, preset: Preset) -> RateLimit {
        self.overrides
            .get(&preset)
            .copied()
            .unwrap_or_else(|| preset.default_limit())
    }
}
