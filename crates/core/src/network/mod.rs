//! Simulated relay network.
//!
//! The [`Network`] trait is the only surface a client talks to: it hands out
//! consensus documents and answers connection probes. [`SimNetwork`] is the
//! ground-truth simulation of a relay population with churn, and the
//! [`adversary`] module wraps it to model censorship and attacks.
//!
//! # Layering
//!
//! ```text
//!   Client ──probe──▶ TargetedDenial ──▶ RestrictiveFirewall ──▶ SimNetwork
//!                        (optional)          (optional)          (ground truth)
//! ```
//!
//! Decorators only change probe outcomes (or kill relays as a side effect);
//! consensus, churn and running-state updates are always delegated to the
//! innermost network unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::simulation::SimulationRng;

pub mod adversary;
mod relay;

pub use relay::{Consensus, Relay, RelayId, FIREWALL_FRIENDLY_PORTS};

/// Default probability that a relay listens on a firewall-friendly port.
pub const DEFAULT_FIREWALL_FRIENDLY_PROBABILITY: f64 = 0.3;
/// Default probability that a relay is hostile.
pub const DEFAULT_HOSTILE_PROBABILITY: f64 = 0.5;
/// Default probability that a live relay is up at any given re-roll.
pub const DEFAULT_RELAY_RELIABILITY: f64 = 0.999;
/// Default mean number of relays joining per churn.
pub const DEFAULT_MEAN_ADDITIONS: f64 = 2.5;
/// Default mean number of relays leaving per churn.
pub const DEFAULT_MEAN_REMOVALS: f64 = 2.0;

/// Source of consensus documents and connection outcomes.
///
/// In a production port this would be backed by a directory client and real
/// connection attempts; a probe that times out must report `false`, exactly
/// like a refused connection.
pub trait Network {
    /// Relays currently listed as running.
    fn new_consensus(&self) -> Consensus;

    /// Relays leave and join, then every relay's running state is re-rolled.
    fn do_churn(&mut self);

    /// Time passes without churn: re-roll every relay's running state.
    fn update_running(&mut self);

    /// Attempt a connection to `relay`, returning whether it succeeded.
    fn probe_node_is_up(&mut self, relay: &Relay) -> bool;
}

/// Ground-truth queries and interventions, for adversary layers only.
///
/// Clients are written against [`Network`] alone and never see these.
pub trait GroundTruth {
    fn is_hostile(&self, id: RelayId) -> bool;

    fn is_truly_up(&self, id: RelayId) -> bool;

    /// Permanently take a relay down.
    fn kill(&mut self, id: RelayId);

    /// Bring a killed relay back and re-roll its running state.
    fn resurrect(&mut self, id: RelayId);
}

/// A network usable both by clients and by adversary layers wrapping it.
pub trait SimulatedNetwork: Network + GroundTruth {}

impl<T: Network + GroundTruth + ?Sized> SimulatedNetwork for T {}

impl<N: Network + ?Sized> Network for Box<N> {
    fn new_consensus(&self) -> Consensus {
        (**self).new_consensus()
    }

    fn do_churn(&mut self) {
        (**self).do_churn()
    }

    fn update_running(&mut self) {
        (**self).update_running()
    }

    fn probe_node_is_up(&mut self, relay: &Relay) -> bool {
        (**self).probe_node_is_up(relay)
    }
}

impl<N: GroundTruth + ?Sized> GroundTruth for Box<N> {
    fn is_hostile(&self, id: RelayId) -> bool {
        (**self).is_hostile(id)
    }

    fn is_truly_up(&self, id: RelayId) -> bool {
        (**self).is_truly_up(id)
    }

    fn kill(&mut self, id: RelayId) {
        (**self).kill(id)
    }

    fn resurrect(&mut self, id: RelayId) {
        (**self).resurrect(id)
    }
}

/// Parameters of the simulated relay population.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of relays created at start.
    pub total_relays: usize,
    /// Probability that a relay listens on 80 or 443.
    pub firewall_friendly_probability: f64,
    /// Probability that a relay is hostile.
    pub hostile_probability: f64,
    /// Probability that a live relay is up after a re-roll.
    pub relay_reliability: f64,
    /// Mean number of relays joining per churn (Poisson).
    pub mean_additions: f64,
    /// Mean number of relays leaving per churn (Poisson).
    pub mean_removals: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            total_relays: 100,
            firewall_friendly_probability: DEFAULT_FIREWALL_FRIENDLY_PROBABILITY,
            hostile_probability: DEFAULT_HOSTILE_PROBABILITY,
            relay_reliability: DEFAULT_RELAY_RELIABILITY,
            mean_additions: DEFAULT_MEAN_ADDITIONS,
            mean_removals: DEFAULT_MEAN_REMOVALS,
        }
    }
}

/// Ground-truth record of one relay.
#[derive(Debug, Clone)]
struct RelayState {
    relay: Relay,
    hostile: bool,
    reliability: f64,
    up: bool,
    dead: bool,
}

impl RelayState {
    fn update_running(&mut self, rng: &SimulationRng) {
        if !self.dead {
            self.up = rng.gen_bool(self.reliability);
        }
    }

    fn kill(&mut self) {
        self.dead = true;
        self.up = false;
    }
}

/// The ground-truth relay population.
#[derive(Debug)]
pub struct SimNetwork {
    relays: Vec<RelayState>,
    index: HashMap<RelayId, usize>,
    next_id: u64,
    config: NetworkConfig,
    rng: SimulationRng,
}

impl SimNetwork {
    pub fn new(config: NetworkConfig, rng: SimulationRng) -> Self {
        let mut network = Self {
            relays: Vec::with_capacity(config.total_relays),
            index: HashMap::with_capacity(config.total_relays),
            next_id: 0,
            config,
            rng,
        };
        for _ in 0..network.config.total_relays {
            network.spawn_relay();
        }
        network.update_running();
        tracing::debug!(
            relays = network.relays.len(),
            seed = network.rng.seed(),
            "Simulated network created"
        );
        network
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Total number of relays ever created, dead ones included.
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Number of relays that have not been killed.
    pub fn alive_count(&self) -> usize {
        self.relays.iter().filter(|r| !r.dead).count()
    }

    /// Descriptors of every relay, dead ones included.
    pub fn all_relays(&self) -> impl Iterator<Item = &Relay> {
        self.relays.iter().map(|r| &r.relay)
    }

    fn random_port(&self) -> u16 {
        if self.rng.gen_bool(self.config.firewall_friendly_probability) {
            FIREWALL_FRIENDLY_PORTS[self.rng.gen_range(0..FIREWALL_FRIENDLY_PORTS.len())]
        } else {
            self.rng.gen_range_inclusive_u64(1..=u16::MAX as u64) as u16
        }
    }

    fn random_bandwidth(&self) -> u64 {
        // spread capacities over a few orders of magnitude, like real relays
        let exponent = self.rng.gen_f64() * 4.0;
        (20.0 * 10f64.powf(exponent)) as u64
    }

    fn spawn_relay(&mut self) -> RelayId {
        let id = RelayId::new(self.next_id);
        self.next_id += 1;
        let relay = Relay::new(id, self.random_port(), self.random_bandwidth());
        let state = RelayState {
            relay,
            hostile: self.rng.gen_bool(self.config.hostile_probability),
            reliability: self.config.relay_reliability,
            up: true,
            dead: false,
        };
        self.index.insert(id, self.relays.len());
        self.relays.push(state);
        id
    }

    fn state(&self, id: RelayId) -> Option<&RelayState> {
        self.index.get(&id).map(|&i| &self.relays[i])
    }

    fn state_mut(&mut self, id: RelayId) -> Option<&mut RelayState> {
        self.index.get(&id).map(|&i| &mut self.relays[i])
    }
}

impl Network for SimNetwork {
    fn new_consensus(&self) -> Consensus {
        self.relays
            .iter()
            .filter(|r| r.up)
            .map(|r| r.relay.clone())
            .collect()
    }

    fn do_churn(&mut self) {
        let removals = self.rng.gen_poisson(self.config.mean_removals);
        let additions = self.rng.gen_poisson(self.config.mean_additions);

        let mut alive: Vec<usize> = (0..self.relays.len())
            .filter(|&i| !self.relays[i].dead)
            .collect();
        self.rng.shuffle(&mut alive);
        for &i in alive.iter().take(removals) {
            self.relays[i].kill();
        }

        for _ in 0..additions {
            self.spawn_relay();
        }

        self.update_running();
        tracing::debug!(
            removed = removals.min(alive.len()),
            added = additions,
            alive = self.alive_count(),
            "Network churn"
        );
    }

    fn update_running(&mut self) {
        for relay in &mut self.relays {
            relay.update_running(&self.rng);
        }
    }

    fn probe_node_is_up(&mut self, relay: &Relay) -> bool {
        self.state(relay.id()).is_some_and(|r| r.up)
    }
}

impl GroundTruth for SimNetwork {
    fn is_hostile(&self, id: RelayId) -> bool {
        self.state(id).is_some_and(|r| r.hostile)
    }

    fn is_truly_up(&self, id: RelayId) -> bool {
        self.state(id).is_some_and(|r| r.up)
    }

    fn kill(&mut self, id: RelayId) {
        if let Some(relay) = self.state_mut(id) {
            relay.kill();
        }
    }

    fn resurrect(&mut self, id: RelayId) {
        let rng = self.rng.clone();
        if let Some(relay) = self.state_mut(id) {
            relay.dead = false;
            relay.update_running(&rng);
        }
    }
}
