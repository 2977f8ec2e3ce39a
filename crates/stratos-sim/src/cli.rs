//! Command-line surface (SPEC_FULL.md §4.14): exposes exactly the
//! "Recognised configuration" of spec.md §6 (`nMobile`, `nRequesters`,
//! `nPackets`, `nServices`, `nSchedule`) plus the ambient run controls a
//! runnable simulation binary needs (duration, mobility parameters, an
//! optional TOML config overlay, a JSON results-export path, a random seed,
//! and verbosity).
//!
//! Every field is `Option` so [`crate::config::SimConfig::apply_overrides`]
//! can tell "the user passed this flag" apart from "use the config file's
//! (or the built-in) default" — the same layering the teacher's
//! `DaemonConfig` does with a TOML file, one level up.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "stratos-sim", version, about = "STRATOS service-discovery and service-consumption protocol simulator")]
pub struct Cli {
    /// Number of mobile nodes to simulate (spec.md §6 `nMobile`).
    #[arg(long = "n-mobile")]
    pub n_mobile: Option<u32>,

    /// Number of nodes that periodically originate discovery requests
    /// (spec.md §6 `nRequesters`).
    #[arg(long = "n-requesters")]
    pub n_requesters: Option<u32>,

    /// Overrides `NUMBER_OF_PACKETS_TO_SEND` (spec.md §6 `nPackets`).
    #[arg(long = "n-packets")]
    pub n_packets: Option<u32>,

    /// Services offered per node (spec.md §6 `nServices`).
    #[arg(long = "n-services")]
    pub n_services: Option<u32>,

    /// Overrides `MAX_SCHEDULE_SIZE` (spec.md §6 `nSchedule`).
    #[arg(long = "n-schedule")]
    pub n_schedule: Option<usize>,

    /// Simulated run duration, in seconds.
    #[arg(long = "duration-secs")]
    pub duration_secs: Option<f64>,

    /// Side length of the square plane nodes move on, in metres.
    #[arg(long = "plane-side")]
    pub plane_side: Option<f64>,

    /// Node speed for the random-waypoint mobility stepper, in metres/second.
    #[arg(long = "speed-mps")]
    pub speed_mps: Option<f64>,

    /// Average interval between a requester's discovery rounds, in seconds.
    #[arg(long = "request-interval-secs")]
    pub request_interval_secs: Option<f64>,

    /// Random seed for node placement, mobility targets, and service
    /// assignment (jitter and per-packet randomness stay on the process-wide
    /// RNG, matching the rest of the workspace).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to a TOML file overlaying these defaults, loaded before CLI
    /// flags are applied.
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the run summary as JSON to this path on completion.
    #[arg(long = "export", value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
