//! Tuning configuration snapshot
//!
//! The configuration is a JSON file naming what to tune; everything is
//! optional and anything absent is left untouched:
//!
//! ```json
//! {
//!     "undervolt": [
//!         { "index": 0, "title": "CPU", "value": -100 },
//!         { "index": 2, "title": "CPU Cache", "value": -100 }
//!     ],
//!     "power": {
//!         "package": { "short_term": 44, "long_term": 35,
//!                      "short_time_window": 0.00244140625,
//!                      "long_time_window": 28 }
//!     },
//!     "tjoffset": -20
//! }
//! ```
//!
//! Well-known voltage plane indices: 0 CPU, 1 GPU, 2 CPU cache,
//! 3 system agent, 4 analog I/O, 5 digital I/O.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, VoltflowError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuneConfig {
    /// Voltage-plane offsets, applied in order.
    #[serde(default)]
    pub undervolt: Vec<VoltagePlane>,

    /// Per-domain power limit requests.
    #[serde(default)]
    pub power: PowerConfig,

    /// Critical-temperature offset in degrees Celsius (magnitude used).
    #[serde(default)]
    pub tjoffset: Option<i32>,
}

impl TuneConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VoltflowError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            VoltflowError::ConfigError(format!("Failed to parse {}: {e}", path.display()))
        })
    }
}

/// One voltage-plane offset target.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoltagePlane {
    /// Plane selector in the mailbox command.
    pub index: u32,

    /// Label used in reports.
    pub title: String,

    /// Desired offset in millivolts; the magnitude is programmed and
    /// offsets always lower the voltage.
    pub value: f64,
}

/// Power limit requests keyed by domain name; an absent domain is skipped.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerConfig {
    #[serde(default)]
    pub package: Option<PowerLimit>,

    #[serde(default)]
    pub core: Option<PowerLimit>,

    #[serde(default)]
    pub dram: Option<PowerLimit>,
}

impl PowerConfig {
    pub fn for_domain(&self, name: &str) -> Option<&PowerLimit> {
        match name {
            "package" => self.package.as_ref(),
            "core" => self.core.as_ref(),
            "dram" => self.dram.as_ref(),
            _ => None,
        }
    }
}

/// Power ceilings for one domain.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerLimit {
    /// Short term ceiling in watts; negative turns the limit down to zero.
    pub short_term: i32,

    /// Long term ceiling in watts; negative turns the limit down to zero.
    pub long_term: i32,

    /// Short term window in seconds; non-positive leaves it unchanged.
    #[serde(default)]
    pub short_time_window: f64,

    /// Long term window in seconds; non-positive leaves it unchanged.
    #[serde(default)]
    pub long_time_window: f64,
}
