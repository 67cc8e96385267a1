use std::{collections::HashSet, fmt::Display};

use serde::{Deserialize, Serialize};

/// Ports reachable from behind a restrictive ("fascist") firewall.
pub const FIREWALL_FRIENDLY_PORTS: [u16; 2] = [80, 443];

/// Stable identity of a relay, unchanged across consensus refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelayId(u64);

impl RelayId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for RelayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "relay{}", self.0)
    }
}

/// Public descriptor of a relay, as listed in a consensus.
///
/// This is everything a client is allowed to know about a relay. Liveness
/// and hostility are ground truth kept by the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relay {
    id: RelayId,
    port: u16,
    /// Advertised capacity, in KB/s.
    bandwidth: u64,
}

impl Relay {
    pub fn new(id: RelayId, port: u16, bandwidth: u64) -> Self {
        Self {
            id,
            port,
            bandwidth,
        }
    }

    pub fn id(&self) -> RelayId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bandwidth(&self) -> u64 {
        self.bandwidth
    }

    /// Whether the relay listens on a port reachable through a restrictive firewall.
    pub fn seems_dystopic(&self) -> bool {
        FIREWALL_FRIENDLY_PORTS.contains(&self.port)
    }
}

/// The set of relays currently believed to be running.
#[derive(Debug, Clone, Default)]
pub struct Consensus {
    relays: Vec<Relay>,
    ids: HashSet<RelayId>,
}

impl Consensus {
    pub fn new(relays: Vec<Relay>) -> Self {
        let ids = relays.iter().map(Relay::id).collect();
        Self { relays, ids }
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn contains(&self, id: RelayId) -> bool {
        self.ids.contains(&id)
    }
}

impl FromIterator<Relay> for Consensus {
    fn from_iter<I: IntoIterator<Item = Relay>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dystopic_ports() {
        assert!(Relay::new(RelayId::new(0), 80, 1).seems_dystopic());
        assert!(Relay::new(RelayId::new(1), 443, 1).seems_dystopic());
        assert!(!Relay::new(RelayId::new(2), 9001, 1).seems_dystopic());
    }

    #[test]
    fn consensus_membership() {
        let consensus: Consensus = (0..5)
            .map(|i| Relay::new(RelayId::new(i), 9001, 100))
            .collect();
        assert_eq!(consensus.len(), 5);
        assert!(consensus.contains(RelayId::new(4)));
        assert!(!consensus.contains(RelayId::new(5)));
    }
}
