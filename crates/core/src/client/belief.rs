//! What the client believes about its own network connection.
//!
//! ```text
//!              utopic pool exhausted             dystopic pool exhausted
//!  Reachable ───────────────────────▶ PossiblyCensored ───────────────────▶ Down
//!      ▲                                │        ▲                           │
//!      │        utopic probe succeeds   │        │ dystopic probe succeeds   │
//!      └────────────────────────────────┘        └───────────────────────────┘
//!      ▲                                                                     │
//!      └─────────────────────── utopic probe succeeds ───────────────────────┘
//! ```
//!
//! Recovery probes out of `PossiblyCensored` and `Down` are gated by one
//! exponential timer per pool. Entering `Down` resets both timers, so the
//! first recovery probe happens on the next attempt and later ones back off.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Pool;
use crate::util::backoff::ExponentialTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkBelief {
    /// Unrestricted relays are reachable.
    #[default]
    Reachable,
    /// Only firewall-friendly relays seem reachable.
    PossiblyCensored,
    /// Nothing seems reachable: the local network is probably down.
    Down,
}

impl NetworkBelief {
    pub fn in_dystopia(self) -> bool {
        self != NetworkBelief::Reachable
    }

    pub fn network_appears_down(self) -> bool {
        self == NetworkBelief::Down
    }

    /// Pool that regular circuit attempts draw from.
    pub fn active_pool(self) -> Pool {
        if self.in_dystopia() {
            Pool::Dystopic
        } else {
            Pool::Utopic
        }
    }
}

/// Belief state plus the per-pool network-down timers gating recovery.
///
/// All belief transitions go through this type.
#[derive(Debug, Clone)]
pub(crate) struct BeliefTracker {
    belief: NetworkBelief,
    utopic_down: ExponentialTimer,
    dystopic_down: ExponentialTimer,
}

impl BeliefTracker {
    pub fn new(retry_delay: Duration, multiplier: f64) -> Self {
        Self {
            belief: NetworkBelief::Reachable,
            utopic_down: ExponentialTimer::new(retry_delay, multiplier),
            dystopic_down: ExponentialTimer::new(retry_delay, multiplier),
        }
    }

    pub fn belief(&self) -> NetworkBelief {
        self.belief
    }

    /// The given pool ran out of guards to try.
    pub fn pool_exhausted(&mut self, pool: Pool, now: Duration) {
        match (self.belief, pool) {
            (NetworkBelief::Reachable, Pool::Utopic) => {
                self.utopic_down.reset();
                self.utopic_down.fire(now);
                self.transition(NetworkBelief::PossiblyCensored);
            }
            (NetworkBelief::PossiblyCensored, Pool::Dystopic) => {
                self.utopic_down.reset();
                self.dystopic_down.reset();
                self.transition(NetworkBelief::Down);
            }
            _ => {}
        }
    }

    /// A probe through a guard of `pool` succeeded.
    pub fn connected(&mut self, pool: Pool) {
        match (self.belief, pool) {
            (NetworkBelief::PossiblyCensored | NetworkBelief::Down, Pool::Utopic) => {
                self.transition(NetworkBelief::Reachable)
            }
            (NetworkBelief::Down, Pool::Dystopic) => {
                self.transition(NetworkBelief::PossiblyCensored)
            }
            _ => {}
        }
    }

    /// Pick a pool to re-probe, firing its timer, if one is due.
    ///
    /// While `PossiblyCensored` only the utopic pool is re-probed; regular
    /// attempts already use the dystopic one.
    pub fn due_recovery_probe(&mut self, now: Duration) -> Option<Pool> {
        match self.belief {
            NetworkBelief::Reachable => None,
            NetworkBelief::PossiblyCensored => {
                if self.utopic_down.is_ready(now) {
                    self.utopic_down.fire(now);
                    Some(Pool::Utopic)
                } else {
                    None
                }
            }
            NetworkBelief::Down => {
                if self.utopic_down.is_ready(now) {
                    self.utopic_down.fire(now);
                    Some(Pool::Utopic)
                } else if self.dystopic_down.is_ready(now) {
                    self.dystopic_down.fire(now);
                    Some(Pool::Dystopic)
                } else {
                    None
                }
            }
        }
    }

    fn transition(&mut self, to: NetworkBelief) {
        if self.belief != to {
            tracing::info!(from = ?self.belief, to = ?to, "Network belief changed");
            self.belief = to;
        }
    }
}
