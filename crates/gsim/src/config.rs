use guardsim::{
    config::ConfigArgs,
    network::{
        adversary::{
            Adversary, DEFAULT_DENIAL_KILL_PROBABILITY, DEFAULT_FILTER_BLOCK_PROBABILITY,
            DEFAULT_FLAKY_RELIABILITY,
        },
        NetworkConfig,
    },
    simulation::{DriverConfig, SimulationRng},
};
use tracing::level_filters::LevelFilter;

use crate::Error;

/// Smallest network drawn when `--total-relays` is not given.
pub const MIN_RANDOM_RELAYS: u64 = 100;
/// Largest network drawn when `--total-relays` is not given.
pub const MAX_RANDOM_RELAYS: u64 = 10_000;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "gsim")]
#[command(about = "Simulate entry guard selection against hostile networks")]
#[command(version)]
pub struct Config {
    #[command(flatten)]
    pub client: ConfigArgs,

    #[command(flatten)]
    pub simulation: SimulationArgs,

    #[command(flatten)]
    pub driver: DriverConfig,

    /// Seed for every random decision of the run. Random if not provided.
    #[arg(long, env = "GUARDSIM_SEED")]
    pub seed: Option<u64>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Log verbosity, refined by RUST_LOG.
    #[arg(long, env = "GUARDSIM_LOG_LEVEL")]
    pub log_level: Option<LevelFilter>,
}

/// The simulated network and the adversaries sitting on it.
#[derive(clap::Args, Debug, Clone)]
pub struct SimulationArgs {
    /// Number of relays at start. Random in [100, 10000] if not provided.
    #[arg(short = 'N', long)]
    pub total_relays: Option<usize>,

    /// Only ports 80 and 443 can be reached.
    #[arg(short = 'F', long)]
    pub fascist_firewall: bool,

    /// The local connection drops connections at random.
    #[arg(short = 'f', long)]
    pub flaky_network: bool,

    /// An adversary blocks honest relays but never its own.
    #[arg(short = 'e', long)]
    pub evil_filtering: bool,

    /// An adversary kills honest guards once they are used.
    #[arg(short = 's', long)]
    pub sniper_network: bool,

    /// Connection success probability with --flaky-network.
    #[arg(long, default_value_t = DEFAULT_FLAKY_RELIABILITY)]
    pub flaky_reliability: f64,

    /// Blocking probability with --evil-filtering.
    #[arg(long, default_value_t = DEFAULT_FILTER_BLOCK_PROBABILITY)]
    pub filter_block_probability: f64,

    /// Kill probability with --sniper-network.
    #[arg(long, default_value_t = DEFAULT_DENIAL_KILL_PROBABILITY)]
    pub sniper_kill_probability: f64,
}

impl SimulationArgs {
    pub fn network_config(&self, rng: &SimulationRng) -> Result<NetworkConfig, Error> {
        let total_relays = match self.total_relays {
            Some(0) => {
                return Err(Error::MissConfiguration(
                    "--total-relays must be positive".into(),
                ))
            }
            Some(n) => n,
            None => rng.gen_range_inclusive_u64(MIN_RANDOM_RELAYS..=MAX_RANDOM_RELAYS) as usize,
        };
        Ok(NetworkConfig {
            total_relays,
            ..Default::default()
        })
    }

    /// Adversary layers to stack, innermost first.
    pub fn adversaries(&self) -> Result<Vec<Adversary>, Error> {
        let mut stack = Vec::new();
        if self.fascist_firewall {
            stack.push(Adversary::RestrictiveFirewall);
        }
        if self.flaky_network {
            stack.push(Adversary::Flaky {
                reliability: probability("--flaky-reliability", self.flaky_reliability)?,
            });
        }
        if self.evil_filtering {
            stack.push(Adversary::SelectiveFiltering {
                block_probability: probability(
                    "--filter-block-probability",
                    self.filter_block_probability,
                )?,
            });
        }
        if self.sniper_network {
            stack.push(Adversary::TargetedDenial {
                kill_probability: probability(
                    "--sniper-kill-probability",
                    self.sniper_kill_probability,
                )?,
            });
        }
        Ok(stack)
    }
}

fn probability(flag: &'static str, value: f64) -> Result<f64, Error> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::MissConfiguration(
            format!("{flag} must be within [0, 1], got {value}").into(),
        ))
    }
}
