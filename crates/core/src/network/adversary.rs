//! Adversarial network layers.
//!
//! Each layer wraps another network, overrides how connection probes are
//! answered and delegates everything else unchanged:
//!
//! - [`RestrictiveFirewall`]: only allowed ports get through
//! - [`Flaky`]: every probe succeeds with a fixed probability at most
//! - [`SelectiveFiltering`]: honest relays are blocked with some probability,
//!   hostile relays never are
//! - [`TargetedDenial`]: honest relays a client connects to successfully are
//!   killed with some probability
//!
//! Layers compose by nesting. Order matters: a firewall outside a
//! targeted-denial layer stops probes before the attacker ever sees them,
//! while the reverse lets the attacker kill relays the firewall would let
//! through anyway.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{
    Consensus, GroundTruth, Network, Relay, RelayId, SimulatedNetwork, FIREWALL_FRIENDLY_PORTS,
};
use crate::simulation::SimulationRng;

/// Default success probability of a flaky local connection.
pub const DEFAULT_FLAKY_RELIABILITY: f64 = 0.8;
/// Default probability that a selective filter blocks an honest relay.
pub const DEFAULT_FILTER_BLOCK_PROBABILITY: f64 = 0.9;
/// Default probability that a targeted attacker kills a used honest relay.
pub const DEFAULT_DENIAL_KILL_PROBABILITY: f64 = 0.5;

macro_rules! delegate_to_inner {
    ($layer:ident) => {
        impl<N: SimulatedNetwork> GroundTruth for $layer<N> {
            fn is_hostile(&self, id: RelayId) -> bool {
                self.inner.is_hostile(id)
            }

            fn is_truly_up(&self, id: RelayId) -> bool {
                self.inner.is_truly_up(id)
            }

            fn kill(&mut self, id: RelayId) {
                self.inner.kill(id)
            }

            fn resurrect(&mut self, id: RelayId) {
                self.inner.resurrect(id)
            }
        }

        impl<N> $layer<N> {
            /// The wrapped network.
            pub fn inner(&self) -> &N {
                &self.inner
            }

            pub fn inner_mut(&mut self) -> &mut N {
                &mut self.inner
            }
        }
    };
}

/// A local firewall that only lets connections to some ports through.
#[derive(Debug)]
pub struct RestrictiveFirewall<N> {
    inner: N,
    allowed_ports: HashSet<u16>,
}

impl<N> RestrictiveFirewall<N> {
    /// Firewall allowing only ports 80 and 443.
    pub fn new(inner: N) -> Self {
        Self::with_ports(inner, FIREWALL_FRIENDLY_PORTS)
    }

    pub fn with_ports(inner: N, allowed_ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            inner,
            allowed_ports: allowed_ports.into_iter().collect(),
        }
    }
}

impl<N: SimulatedNetwork> Network for RestrictiveFirewall<N> {
    fn new_consensus(&self) -> Consensus {
        self.inner.new_consensus()
    }

    fn do_churn(&mut self) {
        self.inner.do_churn()
    }

    fn update_running(&mut self) {
        self.inner.update_running()
    }

    fn probe_node_is_up(&mut self, relay: &Relay) -> bool {
        self.allowed_ports.contains(&relay.port()) && self.inner.probe_node_is_up(relay)
    }
}

delegate_to_inner!(RestrictiveFirewall);

/// An unreliable local connection, independent of the relay probed.
#[derive(Debug)]
pub struct Flaky<N> {
    inner: N,
    reliability: f64,
    rng: SimulationRng,
}

impl<N> Flaky<N> {
    pub fn new(inner: N, reliability: f64, rng: SimulationRng) -> Self {
        Self {
            inner,
            reliability,
            rng,
        }
    }
}

impl<N: SimulatedNetwork> Network for Flaky<N> {
    fn new_consensus(&self) -> Consensus {
        self.inner.new_consensus()
    }

    fn do_churn(&mut self) {
        self.inner.do_churn()
    }

    fn update_running(&mut self) {
        self.inner.update_running()
    }

    fn probe_node_is_up(&mut self, relay: &Relay) -> bool {
        self.rng.gen_bool(self.reliability) && self.inner.probe_node_is_up(relay)
    }
}

delegate_to_inner!(Flaky);

/// An adversary that starves honest relays while leaving its own alone.
#[derive(Debug)]
pub struct SelectiveFiltering<N> {
    inner: N,
    block_probability: f64,
    rng: SimulationRng,
}

impl<N> SelectiveFiltering<N> {
    pub fn new(inner: N, block_probability: f64, rng: SimulationRng) -> Self {
        Self {
            inner,
            block_probability,
            rng,
        }
    }
}

impl<N: SimulatedNetwork> Network for SelectiveFiltering<N> {
    fn new_consensus(&self) -> Consensus {
        self.inner.new_consensus()
    }

    fn do_churn(&mut self) {
        self.inner.do_churn()
    }

    fn update_running(&mut self) {
        self.inner.update_running()
    }

    fn probe_node_is_up(&mut self, relay: &Relay) -> bool {
        if !self.inner.is_hostile(relay.id()) && self.rng.gen_bool(self.block_probability) {
            tracing::trace!(relay = %relay.id(), "Probe blocked by selective filter");
            return false;
        }
        self.inner.probe_node_is_up(relay)
    }
}

delegate_to_inner!(SelectiveFiltering);

/// An adversary that knocks out honest guards once a client uses them.
#[derive(Debug)]
pub struct TargetedDenial<N> {
    inner: N,
    kill_probability: f64,
    rng: SimulationRng,
}

impl<N> TargetedDenial<N> {
    pub fn new(inner: N, kill_probability: f64, rng: SimulationRng) -> Self {
        Self {
            inner,
            kill_probability,
            rng,
        }
    }
}

impl<N: SimulatedNetwork> Network for TargetedDenial<N> {
    fn new_consensus(&self) -> Consensus {
        self.inner.new_consensus()
    }

    fn do_churn(&mut self) {
        self.inner.do_churn()
    }

    fn update_running(&mut self) {
        self.inner.update_running()
    }

    fn probe_node_is_up(&mut self, relay: &Relay) -> bool {
        let up = self.inner.probe_node_is_up(relay);
        if up && !self.inner.is_hostile(relay.id()) && self.rng.gen_bool(self.kill_probability) {
            tracing::debug!(relay = %relay.id(), "Targeted denial killed a used relay");
            self.inner.kill(relay.id());
        }
        up
    }
}

delegate_to_inner!(TargetedDenial);

/// Declarative description of one adversary layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Adversary {
    RestrictiveFirewall,
    Flaky { reliability: f64 },
    SelectiveFiltering { block_probability: f64 },
    TargetedDenial { kill_probability: f64 },
}

impl Adversary {
    /// Wrap `network` in this layer. Randomised layers get their own RNG stream.
    pub fn wrap(
        self,
        network: Box<dyn SimulatedNetwork>,
        rng: SimulationRng,
    ) -> Box<dyn SimulatedNetwork> {
        match self {
            Adversary::RestrictiveFirewall => Box::new(RestrictiveFirewall::new(network)),
            Adversary::Flaky { reliability } => Box::new(Flaky::new(network, reliability, rng)),
            Adversary::SelectiveFiltering { block_probability } => {
                Box::new(SelectiveFiltering::new(network, block_probability, rng))
            }
            Adversary::TargetedDenial { kill_probability } => {
                Box::new(TargetedDenial::new(network, kill_probability, rng))
            }
        }
    }

    /// Wrap `network` in every layer of `stack`, first element innermost.
    pub fn wrap_all(
        stack: &[Adversary],
        mut network: Box<dyn SimulatedNetwork>,
        rng: &SimulationRng,
    ) -> Box<dyn SimulatedNetwork> {
        for (i, adversary) in stack.iter().enumerate() {
            network = adversary.wrap(network, rng.child_with_index(i as u64 + 1));
        }
        network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkConfig, SimNetwork};

    /// Every relay always up, so probe outcomes only reflect the layers.
    fn base_network(total_relays: usize) -> SimNetwork {
        SimNetwork::new(
            NetworkConfig {
                total_relays,
                relay_reliability: 1.0,
                ..Default::default()
            },
            SimulationRng::new(11),
        )
    }

    fn relays(net: &impl Network) -> Vec<Relay> {
        net.new_consensus().relays().to_vec()
    }

    #[test]
    fn firewall_blocks_uncommon_ports_regardless_of_truth() {
        let mut net = RestrictiveFirewall::new(base_network(100));
        let all = relays(&net);
        let (dystopic, utopic): (Vec<_>, Vec<_>) = all.iter().partition(|r| r.seems_dystopic());
        assert!(!utopic.is_empty() && !dystopic.is_empty());

        for relay in utopic {
            assert!(net.is_truly_up(relay.id()));
            assert!(!net.probe_node_is_up(relay));
        }
        for relay in dystopic {
            assert!(net.probe_node_is_up(relay));
        }
    }

    #[test]
    fn firewall_does_not_change_consensus() {
        let base = base_network(60);
        let expected = base.new_consensus().len();
        let net = RestrictiveFirewall::new(base);
        assert_eq!(net.new_consensus().len(), expected);
    }

    #[test]
    fn flaky_extremes() {
        let mut always = Flaky::new(base_network(20), 1.0, SimulationRng::new(1));
        let mut never = Flaky::new(base_network(20), 0.0, SimulationRng::new(1));
        for relay in relays(&always) {
            assert!(always.probe_node_is_up(&relay));
            assert!(!never.probe_node_is_up(&relay));
        }
    }

    #[test]
    fn selective_filter_spares_hostile_relays() {
        let mut net = SelectiveFiltering::new(base_network(100), 1.0, SimulationRng::new(5));
        for relay in relays(&net) {
            let hostile = net.is_hostile(relay.id());
            assert_eq!(net.probe_node_is_up(&relay), hostile);
        }
    }

    #[test]
    fn flaky_drops_about_its_share() {
        let mut net = Flaky::new(base_network(50), 0.5, SimulationRng::new(21));
        let all = relays(&net);
        let mut up = 0;
        for _ in 0..40 {
            up += all.iter().filter(|r| net.probe_node_is_up(r)).count();
        }
        // 2000 probes at one half
        assert!((900..=1100).contains(&up), "{up} probes got through");
    }

    #[test]
    fn selective_filter_partially_blocks_honest_relays() {
        let mut net = SelectiveFiltering::new(base_network(100), 0.3, SimulationRng::new(8));
        let all = relays(&net);
        let (mut honest, mut honest_up) = (0, 0);
        for _ in 0..30 {
            for relay in &all {
                let up = net.probe_node_is_up(relay);
                if net.is_hostile(relay.id()) {
                    assert!(up);
                } else {
                    honest += 1;
                    honest_up += usize::from(up);
                }
            }
        }
        assert!(honest > 0);
        let ratio = honest_up as f64 / honest as f64;
        assert!((0.6..0.8).contains(&ratio), "honest pass ratio {ratio}");
    }

    #[test]
    fn targeted_denial_kills_honest_relays_after_use() {
        let mut net = TargetedDenial::new(base_network(100), 1.0, SimulationRng::new(9));
        for relay in relays(&net) {
            // the first probe still succeeds, the punishment comes afterwards
            assert!(net.probe_node_is_up(&relay));
            if net.is_hostile(relay.id()) {
                assert!(net.probe_node_is_up(&relay));
            } else {
                assert!(!net.is_truly_up(relay.id()));
                assert!(!net.probe_node_is_up(&relay));
            }
        }
    }

    #[test]
    fn stacked_layers_compose() {
        let base: Box<dyn SimulatedNetwork> = Box::new(base_network(100));
        let rng = SimulationRng::new(3);
        let mut net = Adversary::wrap_all(
            &[
                Adversary::TargetedDenial {
                    kill_probability: 1.0,
                },
                Adversary::RestrictiveFirewall,
            ],
            base,
            &rng,
        );
        for relay in net.new_consensus().relays().to_vec() {
            let hostile = net.is_hostile(relay.id());
            let up = net.probe_node_is_up(&relay);
            assert_eq!(up, relay.seems_dystopic());
            // the firewall sits outside, so blocked probes never reach the attacker
            let killed = !net.is_truly_up(relay.id());
            assert_eq!(killed, relay.seems_dystopic() && !hostile);
        }
    }
}
