// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed `POINT_LEDGER__` (nested keys joined with
//! `__`, e.g. `POINT_LEDGER__SWEEP__CHUNK_SIZE=500`).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Policy written when the policy store starts empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyDefaults {
    pub max_earn_amount: i64,
    pub max_possession_limit: i64,
    pub default_expire_days: u32,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            max_earn_amount: 100_000,
            max_possession_limit: 2_000_000,
            default_expire_days: 365,
        }
    }
}

/// Expiration sweep settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Maximum number of lots expired per batch.
    pub chunk_size: usize,
    pub interval_secs: u64,
}

impl SweepConfig {
    /// Sweep period, never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            interval_secs: 86_400,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub policy: PolicyDefaults,
    pub sweep: SweepConfig,
    pub logging: LoggingConfig,
}

impl LedgerConfig {
    pub const ENV_PREFIX: &'static str = "POINT_LEDGER";

    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
