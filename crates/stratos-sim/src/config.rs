//! Simulation run configuration: the same "recognised configuration" fields
//! the CLI exposes (spec.md §6), loadable from an optional TOML file and
//! then overlaid by explicit CLI flags — following the default-function
//! pattern the teacher's `DaemonConfig` uses (`#[serde(default = "...")]`
//! plus a hand-written `Default` impl), one layer up from the protocol's own
//! [`stratos_types::ProtocolConfig`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cli::Cli;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub n_mobile: u32,
    pub n_requesters: u32,
    pub n_packets: Option<u32>,
    pub n_services: u32,
    pub n_schedule: Option<usize>,
    pub duration_secs: f64,
    pub plane_side: f64,
    pub speed_mps: f64,
    pub request_interval_secs: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            n_mobile: 30,
            n_requesters: 5,
            n_packets: None,
            n_services: 3,
            n_schedule: None,
            duration_secs: 60.0,
            plane_side: 1000.0,
            speed_mps: 5.0,
            request_interval_secs: 8.0,
            seed: 1,
        }
    }
}

impl SimConfig {
    /// Load from `path` if it exists, falling back to defaults otherwise
    /// (mirrors the teacher's `DaemonConfig::load`).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply any CLI flags the user explicitly passed on top of whatever
    /// this config already holds (file contents, or built-in defaults).
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(v) = cli.n_mobile {
            self.n_mobile = v;
        }
        if let Some(v) = cli.n_requesters {
            self.n_requesters = v;
        }
        if cli.n_packets.is_some() {
            self.n_packets = cli.n_packets;
        }
        if let Some(v) = cli.n_services {
            self.n_services = v;
        }
        if cli.n_schedule.is_some() {
            self.n_schedule = cli.n_schedule;
        }
        if let Some(v) = cli.duration_secs {
            self.duration_secs = v;
        }
        if let Some(v) = cli.plane_side {
            self.plane_side = v;
        }
        if let Some(v) = cli.speed_mps {
            self.speed_mps = v;
        }
        if let Some(v) = cli.request_interval_secs {
            self.request_interval_secs = v;
        }
        if let Some(v) = cli.seed {
            self.seed = v;
        }
    }
}
