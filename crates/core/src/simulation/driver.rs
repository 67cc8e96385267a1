//! The simulation main loop.
//!
//! Time is split into periods, each ending with a fresh consensus. Periods
//! are split into sub-periods: relays go up and down at the start of every
//! sub-period and relays join or leave every few sub-periods. Each
//! sub-period holds a fixed number of circuit attempts spaced evenly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    client::{Client, ClientError, ClientStats, NetworkBelief},
    config::Proposal,
    network::Network,
    simulation::{TimeSource, VirtualTime},
};

pub const DEFAULT_PERIODS: usize = 30;
pub const DEFAULT_SUBPERIODS: usize = 30;
pub const DEFAULT_ATTEMPTS_PER_SUBPERIOD: usize = 6;
pub const DEFAULT_ATTEMPT_INTERVAL_SECS: u64 = 20;
pub const DEFAULT_CHURN_EVERY: usize = 10;

/// Shape of a simulation run.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of periods; a new consensus is fetched after each one.
    #[arg(long, default_value_t = DEFAULT_PERIODS)]
    pub periods: usize,

    /// Sub-periods per period; relays go up and down at the start of each.
    #[arg(long, default_value_t = DEFAULT_SUBPERIODS)]
    pub subperiods: usize,

    /// Circuit attempts per sub-period.
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS_PER_SUBPERIOD)]
    pub attempts: usize,

    /// Simulated seconds between two circuit attempts.
    #[arg(long, default_value_t = DEFAULT_ATTEMPT_INTERVAL_SECS)]
    pub attempt_interval_secs: u64,

    /// Relays join and leave every this many sub-periods.
    #[arg(long, default_value_t = DEFAULT_CHURN_EVERY)]
    pub churn_every: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            periods: DEFAULT_PERIODS,
            subperiods: DEFAULT_SUBPERIODS,
            attempts: DEFAULT_ATTEMPTS_PER_SUBPERIOD,
            attempt_interval_secs: DEFAULT_ATTEMPT_INTERVAL_SECS,
            churn_every: DEFAULT_CHURN_EVERY,
        }
    }
}

impl DriverConfig {
    pub fn total_attempts(&self) -> usize {
        self.periods * self.subperiods * self.attempts
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub proposal: Proposal,
    pub successes: usize,
    pub attempts: usize,
    pub success_ratio: f64,
    pub final_belief: NetworkBelief,
    /// Simulated time at which the client gave up, if it did.
    pub gave_up_at_secs: Option<u64>,
    pub elapsed_secs: u64,
    #[serde(flatten)]
    pub stats: ClientStats,
}

impl SimulationReport {
    pub fn gave_up(&self) -> bool {
        self.gave_up_at_secs.is_some()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.successes, self.attempts)?;
        writeln!(f, "{}", self.success_ratio)?;
        writeln!(
            f,
            "guards added: {} utopic, {} dystopic",
            self.stats.utopic_guards_added, self.stats.dystopic_guards_added
        )?;
        write!(f, "final belief: {:?}", self.final_belief)?;
        if let Some(at) = self.gave_up_at_secs {
            write!(f, "\ngave up after {at}s")?;
        }
        Ok(())
    }
}

/// Drive `client` through a whole run.
///
/// A [`ClientError::GivingUp`] ends the run early and is recorded in the
/// report; the attempt that raised it is not counted.
pub fn run_simulation<N: Network>(
    client: &mut Client<N, VirtualTime>,
    config: &DriverConfig,
) -> SimulationReport {
    let time = client.time().clone();
    let started = time.now();
    let mut successes = 0;
    let mut attempts = 0;
    let mut gave_up_at = None;

    'run: for period in 0..config.periods {
        for subperiod in 0..config.subperiods {
            if config.churn_every > 0 && subperiod % config.churn_every == 0 {
                client.network_mut().do_churn();
            }
            client.network_mut().update_running();

            for _ in 0..config.attempts {
                match client.build_circuit() {
                    Ok(true) => successes += 1,
                    Ok(false) => {}
                    Err(ClientError::GivingUp { pool, recent }) => {
                        let at = time.now().as_secs();
                        tracing::warn!(%pool, recent, at, "Client gave up");
                        gave_up_at = Some(at);
                        break 'run;
                    }
                }
                attempts += 1;
                time.advance_secs(config.attempt_interval_secs);
            }
        }
        client.refresh_consensus();
        tracing::debug!(period, successes, attempts, "Period finished");
    }

    let report = SimulationReport {
        proposal: client.params().proposal,
        successes,
        attempts,
        success_ratio: if attempts == 0 {
            0.0
        } else {
            successes as f64 / attempts as f64
        },
        final_belief: client.belief(),
        gave_up_at_secs: gave_up_at,
        elapsed_secs: time.now().saturating_sub(started).as_secs(),
        stats: client.stats(),
    };
    tracing::info!(
        successes = report.successes,
        attempts = report.attempts,
        ratio = report.success_ratio,
        gave_up = report.gave_up(),
        "Simulation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ClientParams,
        network::{adversary::Flaky, NetworkConfig, SimNetwork},
        simulation::SimulationRng,
    };

    fn small() -> DriverConfig {
        DriverConfig {
            periods: 2,
            subperiods: 3,
            attempts: 2,
            attempt_interval_secs: 20,
            churn_every: 2,
        }
    }

    fn healthy_network(seed: u64) -> SimNetwork {
        SimNetwork::new(
            NetworkConfig {
                total_relays: 200,
                relay_reliability: 1.0,
                mean_removals: 0.0,
                ..Default::default()
            },
            SimulationRng::new(seed),
        )
    }

    #[test_log::test]
    fn every_attempt_is_counted() {
        let rng = SimulationRng::new(1);
        let mut client = Client::new(
            healthy_network(1),
            VirtualTime::new(),
            ClientParams::new(Proposal::Prop241),
            rng,
        );
        let report = run_simulation(&mut client, &small());

        assert_eq!(report.attempts, small().total_attempts());
        assert_eq!(report.successes, report.attempts);
        assert_eq!(report.success_ratio, 1.0);
        assert_eq!(report.elapsed_secs, 12 * 20);
        assert!(!report.gave_up());
        assert_eq!(report.stats.utopic_guards_added, 1);
    }

    #[test]
    fn giving_up_ends_the_run() {
        let params = ClientParams {
            too_many_guards: 3,
            ..ClientParams::new(Proposal::Prop241)
        };
        let unreachable = Flaky::new(healthy_network(2), 0.0, SimulationRng::new(3));
        let mut client = Client::new(unreachable, VirtualTime::new(), params, SimulationRng::new(4));
        let report = run_simulation(&mut client, &small());

        assert_eq!(report.successes, 0);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.gave_up_at_secs, Some(40));
        assert!(report.to_string().contains("gave up after 40s"));
    }

    #[test]
    fn report_serialises_flat() -> anyhow::Result<()> {
        let mut client = Client::new(
            healthy_network(5),
            VirtualTime::new(),
            ClientParams::new(Proposal::Prop259),
            SimulationRng::new(5),
        );
        let report = run_simulation(&mut client, &small());
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["proposal"], "prop259");
        assert_eq!(json["final_belief"], "reachable");
        assert!(json["probes"].as_u64().is_some());
        assert!(json["gave_up_at_secs"].is_null());
        Ok(())
    }
}
