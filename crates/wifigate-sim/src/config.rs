//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use wifigate::{ConfigError, Pacing};

#[derive(Debug, Parser)]
#[command(
    name = "wifigate-sim",
    version,
    about = "Simulate devices competing for a router's Wi-Fi connections"
)]
pub struct Args {
    /// Number of Wi-Fi connections. Prompted for when omitted.
    #[arg(short, long, env = "WIFIGATE_CAPACITY")]
    pub capacity: Option<usize>,

    /// Number of devices that want to connect. Prompted for when omitted.
    #[arg(short, long, env = "WIFIGATE_DEVICES")]
    pub devices: Option<usize>,

    /// File receiving one line per connection event.
    #[arg(short, long, env = "WIFIGATE_OUTPUT", default_value = "output.txt")]
    pub output: PathBuf,

    /// Upper bound on the delay between starting two devices, in milliseconds.
    #[arg(long, env = "WIFIGATE_STAGGER_MS", default_value_t = 500)]
    pub stagger_ms: u64,

    /// Upper bound on the delay between arriving and connecting, in milliseconds.
    #[arg(long, env = "WIFIGATE_ARRIVAL_MS", default_value_t = 1000)]
    pub arrival_ms: u64,

    /// Upper bound on the delay between connecting and being served, in milliseconds.
    #[arg(long, env = "WIFIGATE_CONNECT_MS", default_value_t = 1000)]
    pub connect_ms: u64,

    /// Upper bound on the delay between being served and logging out, in milliseconds.
    #[arg(long, env = "WIFIGATE_SERVE_MS", default_value_t = 2000)]
    pub serve_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub capacity: usize,
    pub devices: usize,
    pub output: PathBuf,
    pub stagger_max: Duration,
    pub pacing: Pacing,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            devices: 1,
            output: PathBuf::from("output.txt"),
            stagger_max: Duration::from_millis(500),
            pacing: Pacing::default(),
        }
    }
}

impl SimConfig {
    /// Build from parsed args, asking on the terminal for anything missing.
    ///
    /// Fails before anything touches the output file if the pool would be empty.
    pub fn resolve(args: Args) -> anyhow::Result<Self> {
        let capacity = match args.capacity {
            Some(capacity) => capacity,
            None => prompt_count("What is number of WI-FI Connections?")?,
        };
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity.into());
        }
        let devices = match args.devices {
            Some(devices) => devices,
            None => prompt_count("What is number of devices Clients want to connect?")?,
        };

        Ok(Self {
            capacity,
            devices,
            output: args.output,
            stagger_max: Duration::from_millis(args.stagger_ms),
            pacing: Pacing {
                arrival_max: Duration::from_millis(args.arrival_ms),
                connect_max: Duration::from_millis(args.connect_ms),
                serve_max: Duration::from_millis(args.serve_ms),
            },
        })
    }
}

fn prompt_count(prompt: &str) -> anyhow::Result<usize> {
    dialoguer::Input::<usize>::new()
        .with_prompt(prompt)
        .interact_text()
        .context("failed to read answer from terminal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_router_timings() {
        let args = Args::try_parse_from(["wifigate-sim", "-c", "2", "-d", "5"]).unwrap();
        let config = SimConfig::resolve(args).unwrap();

        assert_eq!(
            config,
            SimConfig {
                capacity: 2,
                devices: 5,
                ..SimConfig::default()
            }
        );
    }

    #[test]
    fn pacing_flags_override_defaults() {
        let args = Args::try_parse_from([
            "wifigate-sim",
            "--capacity",
            "3",
            "--devices",
            "9",
            "--output",
            "run.log",
            "--stagger-ms",
            "0",
            "--arrival-ms",
            "10",
            "--connect-ms",
            "20",
            "--serve-ms",
            "30",
        ])
        .unwrap();
        let config = SimConfig::resolve(args).unwrap();

        assert_eq!(config.output, PathBuf::from("run.log"));
        assert_eq!(config.stagger_max, Duration::ZERO);
        assert_eq!(
            config.pacing,
            Pacing {
                arrival_max: Duration::from_millis(10),
                connect_max: Duration::from_millis(20),
                serve_max: Duration::from_millis(30),
            }
        );
    }

    #[test]
    fn zero_capacity_is_rejected_before_output_is_touched() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.txt");
        std::fs::write(&output, "previous run\n").unwrap();

        let args = Args::try_parse_from([
            "wifigate-sim",
            "-c",
            "0",
            "-d",
            "3",
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap();
        let err = SimConfig::resolve(args).unwrap_err();

        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroCapacity)
        );
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous run\n");
    }

    #[test]
    fn rejects_non_numeric_capacity() {
        assert!(Args::try_parse_from(["wifigate-sim", "-c", "many"]).is_err());
    }
}
