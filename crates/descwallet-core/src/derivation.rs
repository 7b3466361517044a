//! Derivation index tracking for receive and change addresses
//!
//! Hands out fresh indices by default so addresses are not reused, and
//! decides how far past the last active index sync must look.

use crate::descriptor::Descriptor;
use crate::types::KeychainKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default gap limit for address scanning
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Policy for address rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Always use a fresh address
    #[default]
    AlwaysFresh,
    /// Hand out the last revealed address again until it receives funds
    ReuseUntilUsed,
}

/// Persistable state of one keychain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeychainState {
    /// Highest index handed out
    pub last_revealed: Option<u32>,
    /// Indices seen in chain data
    pub used: BTreeSet<u32>,
}

impl KeychainState {
    /// One past the highest revealed or used index
    pub fn next_after_activity(&self) -> u32 {
        let revealed = self.last_revealed.map(|i| i.saturating_add(1));
        let used = self.used.iter().next_back().map(|i| i.saturating_add(1));
        revealed.max(used).unwrap_or(0)
    }
}

/// Index tracker for both keychains
#[derive(Debug, Clone)]
pub struct AddressTracker {
    states: BTreeMap<KeychainKind, KeychainState>,
    policy: RotationPolicy,
    gap_limit: u32,
}

impl AddressTracker {
    /// Create new tracker
    pub fn new(policy: RotationPolicy) -> Self {
        Self {
            states: BTreeMap::new(),
            policy,
            gap_limit: DEFAULT_GAP_LIMIT,
        }
    }

    /// Create with custom gap limit
    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.gap_limit = gap_limit.max(1);
        self
    }

    /// Restore from persisted state
    pub fn restore(
        states: impl IntoIterator<Item = (KeychainKind, KeychainState)>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            states: states.into_iter().collect(),
            ..Self::new(policy)
        }
    }

    /// State of one keychain
    pub fn state(&self, keychain: KeychainKind) -> KeychainState {
        self.states.get(&keychain).cloned().unwrap_or_default()
    }

    /// All keychain states for persistence
    pub fn states(&self) -> &BTreeMap<KeychainKind, KeychainState> {
        &self.states
    }

    /// Gap limit
    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    /// Get policy
    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Index the next [`Self::reveal`] would return, without revealing it
    pub fn peek(&self, keychain: KeychainKind, descriptor: &Descriptor) -> u32 {
        let state = self.states.get(&keychain);
        let empty = KeychainState::default();
        let state = state.unwrap_or(&empty);
        if self.policy == RotationPolicy::ReuseUntilUsed {
            if let Some(last) = state.last_revealed {
                if !state.used.contains(&last) {
                    return last;
                }
            }
        }
        descriptor.next_unused_index(&state.used, state.last_revealed)
    }

    /// Reveal the next address index according to the rotation policy
    pub fn reveal(&mut self, keychain: KeychainKind, descriptor: &Descriptor) -> u32 {
        let index = self.peek(keychain, descriptor);
        self.mark_revealed(keychain, index);
        index
    }

    /// Record `index` as handed out; never lowers the revealed index
    pub fn mark_revealed(&mut self, keychain: KeychainKind, index: u32) {
        let state = self.states.entry(keychain).or_default();
        state.last_revealed = state.last_revealed.max(Some(index));
        tracing::debug!("Revealed {} index {}", keychain, index);
    }

    /// Replace every keychain state, e.g. to undo an unpersisted update
    pub fn replace_states(&mut self, states: BTreeMap<KeychainKind, KeychainState>) {
        self.states = states;
    }

    /// Record indices seen in chain data; returns whether anything changed
    pub fn mark_used(&mut self, keychain: KeychainKind, indices: &BTreeSet<u32>) -> bool {
        let state = self.states.entry(keychain).or_default();
        let before = state.used.len();
        state.used.extend(indices.iter().copied());
        state.used.len() != before
    }

    /// Exclusive end of the index range sync must watch
    pub fn lookahead_end(&self, keychain: KeychainKind) -> u32 {
        self.state(keychain)
            .next_after_activity()
            .saturating_add(self.gap_limit)
    }
}

impl Default for AddressTracker {
    fn default() -> Self {
        Self::new(RotationPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> Descriptor {
        Descriptor::parse("wpkh(tprv8ZgxMBicQKsPexGYyaFwnAsCXCjmz2FaTm6LtesyyihjbQE3gRMfXqQBXKM43DvC1UgRVv1qom1qFxNMSqVAs88qx9PhgFnfGVUdiiDf6j4/0/*)").unwrap()
    }

    #[test]
    fn test_always_fresh_policy() {
        let desc = descriptor();
        let mut tracker = AddressTracker::new(RotationPolicy::AlwaysFresh);

        let idx1 = tracker.reveal(KeychainKind::External, &desc);
        let idx2 = tracker.reveal(KeychainKind::External, &desc);
        let idx3 = tracker.reveal(KeychainKind::External, &desc);
        assert_eq!((idx1, idx2, idx3), (0, 1, 2));
        // keychains are independent
        assert_eq!(tracker.reveal(KeychainKind::Internal, &desc), 0);
    }

    #[test]
    fn test_reuse_until_used_policy() {
        let desc = descriptor();
        let mut tracker = AddressTracker::new(RotationPolicy::ReuseUntilUsed);

        let idx1 = tracker.reveal(KeychainKind::External, &desc);
        let idx2 = tracker.reveal(KeychainKind::External, &desc);
        assert_eq!(idx1, idx2);

        tracker.mark_used(KeychainKind::External, &BTreeSet::from([idx1]));
        let idx3 = tracker.reveal(KeychainKind::External, &desc);
        assert_ne!(idx1, idx3);
    }

    #[test]
    fn test_never_reuses_used_index() {
        let desc = descriptor();
        let mut tracker = AddressTracker::default();
        tracker.mark_used(KeychainKind::External, &BTreeSet::from([0, 7]));
        assert_eq!(tracker.peek(KeychainKind::External, &desc), 8);
        assert_eq!(tracker.reveal(KeychainKind::External, &desc), 8);
        assert_eq!(tracker.reveal(KeychainKind::External, &desc), 9);
    }

    #[test]
    fn test_lookahead_end() {
        let desc = descriptor();
        let mut tracker = AddressTracker::default().with_gap_limit(5);
        assert_eq!(tracker.lookahead_end(KeychainKind::External), 5);
        tracker.reveal(KeychainKind::External, &desc);
        assert_eq!(tracker.lookahead_end(KeychainKind::External), 6);
        tracker.mark_used(KeychainKind::External, &BTreeSet::from([10]));
        assert_eq!(tracker.lookahead_end(KeychainKind::External), 16);
    }

    #[test]
    fn test_state_persistence() {
        let desc = descriptor();
        let mut tracker = AddressTracker::default();
        for _ in 0..5 {
            tracker.reveal(KeychainKind::External, &desc);
        }
        tracker.mark_used(KeychainKind::External, &BTreeSet::from([1, 3]));

        let restored = AddressTracker::restore(tracker.states().clone(), tracker.policy());
        assert_eq!(restored.state(KeychainKind::External).last_revealed, Some(4));
        assert_eq!(restored.peek(KeychainKind::External, &desc), 5);
    }

    #[test]
    fn test_mark_revealed_never_lowers() {
        let mut tracker = AddressTracker::default();
        tracker.mark_revealed(KeychainKind::Internal, 4);
        tracker.mark_revealed(KeychainKind::Internal, 2);
        assert_eq!(tracker.state(KeychainKind::Internal).last_revealed, Some(4));

        let before = tracker.states().clone();
        tracker.mark_revealed(KeychainKind::Internal, 9);
        tracker.replace_states(before);
        assert_eq!(tracker.state(KeychainKind::Internal).last_revealed, Some(4));
    }
}
