use std::{collections::HashSet, ops::Index, time::Duration};

use crate::network::{Consensus, Relay, RelayId};

/// Outcome of the most recent connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LastProbe {
    #[default]
    Unknown,
    Up,
    Down,
}

/// What a client knows about one relay it chose to rely on.
///
/// Identity is the wrapped relay's [`RelayId`]. The up/down marks come from
/// the latest probe only, so a guard is never marked both up and down.
#[derive(Debug, Clone)]
pub struct Guard {
    relay: Relay,
    tried: bool,
    last_probe: LastProbe,
    listed: bool,
    added_at: Duration,
}

impl Guard {
    pub fn new(relay: Relay, added_at: Duration) -> Self {
        Self {
            relay,
            tried: false,
            last_probe: LastProbe::Unknown,
            listed: true,
            added_at,
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn id(&self) -> RelayId {
        self.relay.id()
    }

    /// Record the outcome of a connection attempt. Last probe wins.
    pub fn mark(&mut self, up: bool) {
        self.tried = true;
        self.last_probe = if up { LastProbe::Up } else { LastProbe::Down };
    }

    pub fn mark_listed(&mut self) {
        self.listed = true;
    }

    pub fn mark_unlisted(&mut self) {
        self.listed = false;
    }

    /// Allow a guard marked down to be tried again.
    pub fn mark_for_retry(&mut self) {
        self.tried = false;
    }

    pub fn can_try(&self) -> bool {
        self.listed && !(self.tried && self.marked_down())
    }

    pub fn added_within(&self, window: Duration, now: Duration) -> bool {
        self.added_at.saturating_add(window) >= now
    }

    pub fn tried_at_least_once(&self) -> bool {
        self.tried
    }

    pub fn marked_up(&self) -> bool {
        self.last_probe == LastProbe::Up
    }

    pub fn marked_down(&self) -> bool {
        self.last_probe == LastProbe::Down
    }

    pub fn is_listed(&self) -> bool {
        self.listed
    }
}

/// An ordered primary guard list holding at most one guard per relay.
#[derive(Debug, Clone, Default)]
pub struct GuardList {
    guards: Vec<Guard>,
    members: HashSet<RelayId>,
}

impl GuardList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guard> {
        self.guards.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Guard> {
        self.guards.get(index)
    }

    pub fn contains(&self, id: RelayId) -> bool {
        self.members.contains(&id)
    }

    pub fn position(&self, id: RelayId) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        self.guards.iter().position(|g| g.id() == id)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Guard> {
        self.guards.get_mut(index)
    }

    /// Insert a guard for a relay not yet in the list, returning its position.
    ///
    /// With `by_bandwidth` the list stays sorted by descending relay
    /// bandwidth (ties keep insertion order); otherwise the guard is appended.
    pub(crate) fn insert(&mut self, guard: Guard, by_bandwidth: bool) -> usize {
        debug_assert!(!self.contains(guard.id()), "duplicate guard {}", guard.id());
        self.members.insert(guard.id());
        let position = if by_bandwidth {
            let bandwidth = guard.relay().bandwidth();
            self.guards
                .iter()
                .position(|g| g.relay().bandwidth() < bandwidth)
                .unwrap_or(self.guards.len())
        } else {
            self.guards.len()
        };
        self.guards.insert(position, guard);
        position
    }

    /// Guards added no earlier than `window` before `now`.
    pub fn recently_added(&self, window: Duration, now: Duration) -> usize {
        self.guards
            .iter()
            .filter(|g| g.added_within(window, now))
            .count()
    }

    /// Position of the first guard that can be tried, in list order.
    pub fn first_usable(&self) -> Option<usize> {
        self.guards.iter().position(Guard::can_try)
    }

    pub fn usable_count(&self) -> usize {
        self.guards.iter().filter(|g| g.can_try()).count()
    }

    pub fn listed_count(&self) -> usize {
        self.guards.iter().filter(|g| g.is_listed()).count()
    }

    /// Guards that cannot be tried right now, either unlisted or found down.
    pub fn exhausted_count(&self) -> usize {
        self.guards.iter().filter(|g| !g.can_try()).count()
    }

    pub(crate) fn mark_all_for_retry(&mut self) {
        for guard in &mut self.guards {
            guard.mark_for_retry();
        }
    }

    /// Mark every guard listed or unlisted according to `consensus`.
    pub(crate) fn refresh_listing(&mut self, consensus: &Consensus) {
        for guard in &mut self.guards {
            if consensus.contains(guard.id()) {
                guard.mark_listed();
            } else {
                guard.mark_unlisted();
            }
        }
    }
}

impl Index<usize> for GuardList {
    type Output = Guard;

    fn index(&self, index: usize) -> &Guard {
        &self.guards[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(id: u64, bandwidth: u64) -> Relay {
        Relay::new(RelayId::new(id), 9001, bandwidth)
    }

    #[test]
    fn new_guard_is_listed_and_untried() {
        let guard = Guard::new(relay(1, 10), Duration::ZERO);
        assert!(guard.is_listed());
        assert!(!guard.tried_at_least_once());
        assert!(!guard.marked_up() && !guard.marked_down());
        assert!(guard.can_try());
    }

    #[test]
    fn marks_never_overlap() {
        let mut guard = Guard::new(relay(1, 10), Duration::ZERO);
        for outcome in [true, false, false, true, true, false] {
            guard.mark(outcome);
            assert!(guard.tried_at_least_once());
            assert!(!(guard.marked_up() && guard.marked_down()));
            assert_eq!(guard.marked_up(), outcome);
            assert_eq!(guard.marked_down(), !outcome);
        }
    }

    #[test]
    fn down_guard_needs_retry() {
        let mut guard = Guard::new(relay(1, 10), Duration::ZERO);
        guard.mark(false);
        assert!(!guard.can_try());

        guard.mark_for_retry();
        assert!(guard.can_try());
        assert!(guard.marked_down());

        guard.mark(true);
        assert!(guard.can_try());
    }

    #[test]
    fn untried_listed_guard_is_always_tryable() {
        let mut guard = Guard::new(relay(1, 10), Duration::ZERO);
        guard.mark(false);
        guard.mark_for_retry();
        guard.mark_unlisted();
        assert!(!guard.can_try());
        guard.mark_listed();
        guard.mark_listed();
        assert!(guard.can_try());
    }

    #[test]
    fn added_within_window() {
        let guard = Guard::new(relay(1, 10), Duration::from_secs(100));
        let window = Duration::from_secs(50);
        assert!(guard.added_within(window, Duration::from_secs(100)));
        assert!(guard.added_within(window, Duration::from_secs(150)));
        assert!(!guard.added_within(window, Duration::from_secs(151)));
    }

    #[test]
    fn bandwidth_ordered_insert() {
        let mut list = GuardList::new();
        for (id, bw) in [(1, 50), (2, 500), (3, 50), (4, 5), (5, 1_000)] {
            list.insert(Guard::new(relay(id, bw), Duration::ZERO), true);
        }
        let order: Vec<u64> = list.iter().map(|g| g.id().as_u64()).collect();
        assert_eq!(order, vec![5, 2, 1, 3, 4]);
    }

    #[test]
    fn refresh_listing_by_identity() {
        let mut list = GuardList::new();
        for id in 0..4 {
            list.insert(Guard::new(relay(id, 1), Duration::ZERO), false);
        }
        let consensus: Consensus = [relay(1, 1), relay(3, 1), relay(7, 1)].into_iter().collect();
        list.refresh_listing(&consensus);
        let listed: Vec<bool> = list.iter().map(Guard::is_listed).collect();
        assert_eq!(listed, vec![false, true, false, true]);
        assert_eq!(list.listed_count(), 2);
        assert_eq!(list.exhausted_count(), 2);
    }
}
