use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Threshold (in whole currency units) used when no value has been stored yet.
pub const DEFAULT_PRICE_THRESHOLD: u64 = 30000;

/// Product/variant identifiers excluded from listings and alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BannedIds(BTreeSet<u64>);

impl BannedIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not banned before.
    pub fn insert(&mut self, id: u64) -> bool {
        self.0.insert(id)
    }

    /// Returns `true` if the id was banned before.
    pub fn remove(&mut self, id: u64) -> bool {
        self.0.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u64> for BannedIds {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Configuration that survives between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Offset of the next unseen inbound message.
    pub last_update_marker: i64,
    pub price_threshold: u64,
    pub banned_ids: BannedIds,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            last_update_marker: 0,
            price_threshold: DEFAULT_PRICE_THRESHOLD,
            banned_ids: BannedIds::new(),
        }
    }
}

/// Fields that [`PersistedState::repaired`] had to replace with defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repairs {
    pub marker: bool,
    pub threshold: bool,
    pub dropped_ids: usize,
}

impl Repairs {
    pub fn any(&self) -> bool {
        self.marker || self.threshold || self.dropped_ids > 0
    }
}

impl PersistedState {
    /// Builds a state from raw stored fields, substituting defaults for
    /// anything missing or out of range.
    pub fn repaired(
        marker: Option<i64>,
        threshold: Option<i64>,
        banned: impl IntoIterator<Item = i64>,
    ) -> (Self, Repairs) {
        let mut repairs = Repairs::default();

        let last_update_marker = match marker {
            Some(m) if m >= 0 => m,
            _ => {
                repairs.marker = true;
                0
            }
        };

        let price_threshold = match threshold {
            Some(t) if t > 0 => t as u64,
            _ => {
                repairs.threshold = true;
                DEFAULT_PRICE_THRESHOLD
            }
        };

        let mut banned_ids = BannedIds::new();
        for id in banned {
            match u64::try_from(id) {
                Ok(id) => {
                    banned_ids.insert(id);
                }
                Err(_) => repairs.dropped_ids += 1,
            }
        }

        (
            Self {
                last_update_marker,
                price_threshold,
                banned_ids,
            },
            repairs,
        )
    }

    /// Moves the marker past `offset`. The marker never moves backwards.
    pub fn advance_marker(&mut self, offset: i64) {
        self.last_update_marker = self.last_update_marker.max(offset.saturating_add(1));
    }

    /// Whether `offset` is already reflected in the marker.
    pub fn has_seen(&self, offset: i64) -> bool {
        offset < self.last_update_marker
    }
}

/// One entry of the inbound message feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub offset: i64,
    /// Absent for updates that carry no user message (edits, channel posts).
    pub sender_id: Option<i64>,
    pub text: Option<String>,
}

impl InboundMessage {
    pub fn text(offset: i64, sender_id: i64, text: impl Into<String>) -> Self {
        Self {
            offset,
            sender_id: Some(sender_id),
            text: Some(text.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_uses_default_threshold() {
        let state = PersistedState::default();
        assert_eq!(state.last_update_marker, 0);
        assert_eq!(state.price_threshold, DEFAULT_PRICE_THRESHOLD);
        assert!(state.banned_ids.is_empty());
    }

    #[test]
    fn banned_ids_collapse_duplicates() {
        let mut ids = BannedIds::new();
        assert!(ids.insert(7));
        assert!(!ids.insert(7));
        assert_eq!(ids.len(), 1);
        assert!(!ids.remove(8));
        assert!(ids.remove(7));
        assert!(ids.is_empty());
    }

    #[test]
    fn add_then_remove_restores_set() {
        let original: BannedIds = [3, 9, 12].into_iter().collect();
        for x in [1, 9, 40] {
            let mut ids = original.clone();
            let was_new = ids.insert(x);
            ids.remove(x);
            if was_new {
                assert_eq!(ids, original);
            } else {
                assert!(!ids.contains(x));
            }
        }
    }

    #[test]
    fn repair_fills_missing_fields() {
        let (state, repairs) = PersistedState::repaired(None, Some(0), [5, -1, 5]);
        assert_eq!(state.last_update_marker, 0);
        assert_eq!(state.price_threshold, DEFAULT_PRICE_THRESHOLD);
        assert_eq!(state.banned_ids.iter().collect::<Vec<_>>(), vec![5]);
        assert!(repairs.marker);
        assert!(repairs.threshold);
        assert_eq!(repairs.dropped_ids, 1);
    }

    #[test]
    fn repair_keeps_valid_fields() {
        let (state, repairs) = PersistedState::repaired(Some(42), Some(250), [1, 2]);
        assert_eq!(state.last_update_marker, 42);
        assert_eq!(state.price_threshold, 250);
        assert!(!repairs.any());
    }

    #[test]
    fn marker_never_moves_backwards() {
        let mut state = PersistedState {
            last_update_marker: 10,
            ..PersistedState::default()
        };
        state.advance_marker(3);
        assert_eq!(state.last_update_marker, 10);
        state.advance_marker(10);
        assert_eq!(state.last_update_marker, 11);
        assert!(state.has_seen(10));
        assert!(!state.has_seen(11));
    }

    #[test]
    fn state_serializes_banned_ids_as_list() {
        let state = PersistedState {
            last_update_marker: 4,
            price_threshold: 20,
            banned_ids: [5, 2].into_iter().collect(),
        };
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["banned_ids"], serde_json::json!([2, 5]));
        let back: PersistedState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }
}
