//! The entry-guard selection state machine.
//!
//! A [`Client`] keeps two primary guard lists: one drawn from relays on
//! arbitrary ports (the *utopic* pool) and one drawn from relays reachable
//! through restrictive firewalls on ports 80/443 (the *dystopic* pool). Each
//! circuit attempt picks the first usable guard of the pool its
//! [`NetworkBelief`] points at, probes it through the [`Network`] and records
//! the outcome on the guard.
//!
//! Where the two supported proposals differ:
//!
//! | | prop241 | prop259 |
//! |---|---|---|
//! | list ceiling | absolute count | share of the consensus |
//! | utopic pool exhausted | full list with nothing to try | enough guards down, see [`Client::check_failover_threshold`] |
//! | dystopic pool exhausted | nothing happens | network considered down |
//! | attempts while down | never down | skipped until a recovery probe is due |
//!
//! Under both proposals a `PossiblyCensored` client stays on the dystopic
//! pool until a utopic recovery probe succeeds.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::{
    config::ClientParams,
    network::{Consensus, Network, Relay, RelayId},
    simulation::{SimulationRng, TimeSource},
    util::backoff::ExponentialTimer,
};

mod belief;
mod guard;

use belief::BeliefTracker;
pub use belief::NetworkBelief;
pub use guard::{Guard, GuardList};

/// One of the two guard pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Relays on any port.
    Utopic,
    /// Relays on firewall-friendly ports only.
    Dystopic,
}

impl Pool {
    /// The pool a relay's candidacy belongs to.
    pub fn of(relay: &Relay) -> Self {
        if relay.seems_dystopic() {
            Pool::Dystopic
        } else {
            Pool::Utopic
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Utopic => f.write_str("utopic"),
            Pool::Dystopic => f.write_str("dystopic"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Too many guards were added too recently; the client must not go on.
    #[error("giving up: {recent} {pool} guards added within the recency window")]
    GivingUp { pool: Pool, recent: usize },
}

/// Counters kept over a client's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub utopic_guards_added: usize,
    pub dystopic_guards_added: usize,
    pub probes: usize,
    pub successful_probes: usize,
    pub recovery_probes: usize,
}

#[derive(Debug)]
struct PoolState {
    primary: GuardList,
    candidates: Vec<Relay>,
    retry: ExponentialTimer,
}

impl PoolState {
    fn new(params: &ClientParams) -> Self {
        Self {
            primary: GuardList::new(),
            candidates: Vec::new(),
            retry: ExponentialTimer::new(params.retry_delay(), params.retry_multiplier),
        }
    }
}

/// Guard selection state of one client.
pub struct Client<N, T> {
    network: N,
    time: T,
    params: ClientParams,
    rng: SimulationRng,
    utopic: PoolState,
    dystopic: PoolState,
    belief: BeliefTracker,
    stats: ClientStats,
}

impl<N: Network, T: TimeSource> Client<N, T> {
    /// Create a client and load the network's current consensus.
    ///
    /// `params` are expected to be validated already, see
    /// [`ClientParams::validate`].
    pub fn new(network: N, time: T, params: ClientParams, rng: SimulationRng) -> Self {
        debug_assert!(params.validate().is_ok(), "unvalidated client parameters");
        let mut client = Self {
            utopic: PoolState::new(&params),
            dystopic: PoolState::new(&params),
            belief: BeliefTracker::new(params.retry_delay(), params.retry_multiplier),
            network,
            time,
            params,
            rng,
            stats: ClientStats::default(),
        };
        client.refresh_consensus();
        client
    }

    pub fn params(&self) -> &ClientParams {
        &self.params
    }

    pub fn belief(&self) -> NetworkBelief {
        self.belief.belief()
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn time(&self) -> &T {
        &self.time
    }

    /// The primary guard list of `pool`.
    pub fn guards(&self, pool: Pool) -> &GuardList {
        &self.pool(pool).primary
    }

    /// Relays of the last consensus that belong to `pool`.
    pub fn candidates(&self, pool: Pool) -> &[Relay] {
        &self.pool(pool).candidates
    }

    /// Time until the retry timer of `pool` is ready again.
    pub fn retry_ready_in(&self, pool: Pool) -> Duration {
        self.pool(pool)
            .retry
            .next_fire_time()
            .saturating_sub(self.time.now())
    }

    fn pool(&self, pool: Pool) -> &PoolState {
        match pool {
            Pool::Utopic => &self.utopic,
            Pool::Dystopic => &self.dystopic,
        }
    }

    fn pool_mut(&mut self, pool: Pool) -> &mut PoolState {
        match pool {
            Pool::Utopic => &mut self.utopic,
            Pool::Dystopic => &mut self.dystopic,
        }
    }

    /// Fetch a fresh consensus from the network and apply it.
    pub fn refresh_consensus(&mut self) {
        let consensus = self.network.new_consensus();
        self.update_guard_lists(&consensus);
    }

    /// Rebuild both candidate pools from `consensus` and re-mark every
    /// primary guard as listed or unlisted.
    pub fn update_guard_lists(&mut self, consensus: &Consensus) {
        let (dystopic, utopic): (Vec<Relay>, Vec<Relay>) = consensus
            .relays()
            .iter()
            .cloned()
            .partition(Relay::seems_dystopic);
        self.utopic.candidates = utopic;
        self.dystopic.candidates = dystopic;
        self.utopic.primary.refresh_listing(consensus);
        self.dystopic.primary.refresh_listing(consensus);
        tracing::debug!(
            utopic = self.utopic.candidates.len(),
            dystopic = self.dystopic.candidates.len(),
            utopic_listed = self.utopic.primary.listed_count(),
            dystopic_listed = self.dystopic.primary.listed_count(),
            "Guard lists updated"
        );
    }

    /// How many listed guards make the primary list of `pool` full.
    ///
    /// Under prop259 this follows the size of the latest consensus, never
    /// dropping below one.
    pub fn guards_threshold(&self, pool: Pool) -> usize {
        if self.params.proposal.uses_fractional_thresholds() {
            let consensus_size = self.utopic.candidates.len() + self.dystopic.candidates.len();
            let fraction = match pool {
                Pool::Utopic => self.params.guard_fraction_utopic,
                Pool::Dystopic => self.params.guard_fraction_dystopic,
            };
            ((consensus_size as f64 * fraction).floor() as usize).max(1)
        } else {
            match pool {
                Pool::Utopic => self.params.guard_threshold_utopic,
                Pool::Dystopic => self.params.guard_threshold_dystopic,
            }
        }
    }

    /// Add a guard for `relay` to the primary list of `pool`.
    ///
    /// Fails with [`ClientError::GivingUp`] instead of adding when the new
    /// guard would bring the number of guards added within the recency
    /// window to the configured limit. A relay already in the list is not
    /// added twice; its existing guard is returned.
    pub fn add_guard(&mut self, relay: Relay, pool: Pool) -> Result<&Guard, ClientError> {
        let position = self.insert_guard(relay, pool)?;
        Ok(&self.pool(pool).primary[position])
    }

    fn insert_guard(&mut self, relay: Relay, pool: Pool) -> Result<usize, ClientError> {
        if let Some(position) = self.pool(pool).primary.position(relay.id()) {
            return Ok(position);
        }

        let now = self.time.now();
        let window = self.params.too_recently();
        let recent = self.pool(pool).primary.recently_added(window, now) + 1;
        if recent >= self.params.too_many_guards {
            tracing::warn!(%pool, recent, relay = %relay.id(), "Too many guards added too recently");
            return Err(ClientError::GivingUp { pool, recent });
        }

        let id = relay.id();
        let by_bandwidth = self.params.prioritize_by_bandwidth;
        let position = self
            .pool_mut(pool)
            .primary
            .insert(Guard::new(relay, now), by_bandwidth);
        match pool {
            Pool::Utopic => self.stats.utopic_guards_added += 1,
            Pool::Dystopic => self.stats.dystopic_guards_added += 1,
        }
        tracing::debug!(%pool, relay = %id, position, "Added guard");
        Ok(position)
    }

    /// Pick the guard to use next from `pool`, adding one if there is room.
    ///
    /// `Ok(None)` means there is nothing useful to try this attempt.
    pub fn get_guard(&mut self, pool: Pool) -> Result<Option<&Guard>, ClientError> {
        let position = self.select_guard(pool)?;
        Ok(position.map(|p| &self.pool(pool).primary[p]))
    }

    fn select_guard(&mut self, pool: Pool) -> Result<Option<usize>, ClientError> {
        if self.params.proposal.is_failover_aware() && self.belief().network_appears_down() {
            tracing::debug!(%pool, "Network appears down, not selecting a guard");
            return Ok(None);
        }
        self.select_guard_from(pool)
    }

    fn select_guard_from(&mut self, pool: Pool) -> Result<Option<usize>, ClientError> {
        let threshold = self.guards_threshold(pool);
        let now = self.time.now();

        let mut usable = self.pool(pool).primary.first_usable();
        if usable.is_none() && self.pool(pool).primary.listed_count() >= threshold {
            let state = self.pool_mut(pool);
            if state.retry.is_ready(now) {
                state.retry.fire(now);
                state.primary.mark_all_for_retry();
                tracing::debug!(
                    %pool,
                    next_retry = ?state.retry.next_fire_time(),
                    "Primary guards marked for retry"
                );
                usable = state.primary.first_usable();
            }
            if usable.is_none() {
                tracing::debug!(%pool, threshold, "Primary list full with nothing to try");
                return Ok(None);
            }
        }

        if usable.is_some() {
            return Ok(usable);
        }

        let state = self.pool(pool);
        let possible: Vec<&Relay> = state
            .candidates
            .iter()
            .filter(|r| !state.primary.contains(r.id()))
            .collect();
        let choice = if self.params.weighted_sampling {
            self.rng.choose_weighted(&possible, |r| r.bandwidth())
        } else {
            self.rng.choose(&possible)
        };
        let Some(relay) = choice.map(|r| (*r).clone()) else {
            tracing::debug!(%pool, "No candidate left to add");
            return Ok(None);
        };
        self.insert_guard(relay, pool).map(Some)
    }

    /// Move the belief on if enough guards of `pool` are exhausted.
    ///
    /// Only acts under prop259. Returns whether the failover threshold was
    /// reached.
    ///
    /// The number of exhausted guards needed is capped one below
    /// `too_many_guards`, so failover always happens before the circuit
    /// breaker would give up on a pool.
    pub fn check_failover_threshold(&mut self, pool: Pool) -> bool {
        if !self.params.proposal.is_failover_aware() {
            return false;
        }
        let needed = (self.guards_threshold(pool) as f64 * self.params.failover_fraction).ceil();
        let needed = (needed as usize)
            .min(self.params.too_many_guards.saturating_sub(1))
            .max(1);
        let exhausted = self.pool(pool).primary.exhausted_count();
        if exhausted < needed {
            return false;
        }
        tracing::debug!(%pool, exhausted, needed, "Failover threshold reached");
        let now = self.time.now();
        self.belief.pool_exhausted(pool, now);
        true
    }

    /// Probe the guard for relay `id` in `pool` and record the outcome.
    ///
    /// Returns `false` without probing when `id` is not a guard of `pool`.
    /// A success re-arms the retry backoff of `pool`.
    pub fn connect_to_guard(&mut self, pool: Pool, id: RelayId) -> bool {
        let Some(position) = self.pool(pool).primary.position(id) else {
            return false;
        };
        let relay = self.pool(pool).primary[position].relay().clone();
        let up = self.network.probe_node_is_up(&relay);
        if let Some(guard) = self.pool_mut(pool).primary.get_mut(position) {
            guard.mark(up);
        }

        self.stats.probes += 1;
        if up {
            self.stats.successful_probes += 1;
            self.pool_mut(pool).retry.reset();
            self.belief.connected(pool);
        }
        tracing::debug!(%pool, relay = %id, up, "Probed guard");
        up
    }

    /// Try to build one circuit, returning whether its first hop connected.
    ///
    /// At most one guard is probed per call. When a recovery probe is due it
    /// takes the place of the regular attempt.
    ///
    /// The only error is [`ClientError::GivingUp`], which is terminal for
    /// this client.
    pub fn build_circuit(&mut self) -> Result<bool, ClientError> {
        let now = self.time.now();
        if let Some(pool) = self.belief.due_recovery_probe(now) {
            self.stats.recovery_probes += 1;
            self.pool_mut(pool).primary.mark_all_for_retry();
            tracing::debug!(%pool, belief = ?self.belief(), "Recovery probe");
            if let Some(position) = self.select_guard_from(pool)? {
                let id = self.pool(pool).primary[position].id();
                return Ok(self.connect_to_guard(pool, id));
            }
        }

        if self.belief().network_appears_down() {
            return Ok(false);
        }

        let mut pool = self.belief().active_pool();
        let mut selected = self.select_guard(pool)?;
        if selected.is_none() {
            self.check_failover_threshold(pool);
            if pool == Pool::Utopic {
                // provisional dystopia: give the firewall-friendly pool a go
                self.belief.pool_exhausted(Pool::Utopic, now);
                pool = Pool::Dystopic;
                selected = self.select_guard(pool)?;
                if selected.is_none() {
                    self.check_failover_threshold(pool);
                }
            }
        }

        let Some(position) = selected else {
            tracing::debug!(belief = ?self.belief(), "No guard available");
            return Ok(false);
        };
        let id = self.pool(pool).primary[position].id();
        let up = self.connect_to_guard(pool, id);
        if !up {
            self.check_failover_threshold(pool);
        }
        Ok(up)
    }
}

impl<N, T> fmt::Debug for Client<N, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("proposal", &self.params.proposal)
            .field("belief", &self.belief.belief())
            .field("utopic_guards", &self.utopic.primary.len())
            .field("dystopic_guards", &self.dystopic.primary.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// A [`Client`] shared between threads.
///
/// Every operation takes the same lock, so guard lists are never mutated
/// concurrently.
pub struct SharedClient<N, T> {
    inner: Arc<Mutex<Client<N, T>>>,
}

impl<N, T> Clone for SharedClient<N, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: Network, T: TimeSource> SharedClient<N, T> {
    pub fn new(client: Client<N, T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    pub fn build_circuit(&self) -> Result<bool, ClientError> {
        self.inner.lock().build_circuit()
    }

    pub fn refresh_consensus(&self) {
        self.inner.lock().refresh_consensus()
    }

    pub fn belief(&self) -> NetworkBelief {
        self.inner.lock().belief()
    }

    /// Lock the client for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, Client<N, T>> {
        self.inner.lock()
    }
}
