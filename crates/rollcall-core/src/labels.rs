//! Identity ↔ label index.
//!
//! Labels are assigned `1..=N` over the identities in ascending order. The
//! assignment is deterministic for a given set but shifts whenever an
//! identity is added or removed ahead of another one, so a label is only
//! valid alongside the mapping that produced it.

use crate::types::{Identity, Label};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMapping {
    /// Identities in label order; index `i` carries label `i + 1`.
    identities: Vec<Identity>,
}

impl LabelMapping {
    /// Build the mapping from any collection of identities (duplicates collapse).
    pub fn compute<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        let sorted: BTreeSet<Identity> = identities.into_iter().collect();
        Self {
            identities: sorted.into_iter().collect(),
        }
    }

    pub fn label_of(&self, identity: &Identity) -> Option<Label> {
        self.identities
            .iter()
            .position(|candidate| candidate == identity)
            .map(|idx| Label(idx as u32 + 1))
    }

    pub fn identity_of(&self, label: Label) -> Option<&Identity> {
        let idx = label.0.checked_sub(1)? as usize;
        self.identities.get(idx)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Iterate `(label, identity)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, &Identity)> {
        self.identities
            .iter()
            .enumerate()
            .map(|(idx, identity)| (Label(idx as u32 + 1), identity))
    }
}
