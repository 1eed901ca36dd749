//! Retention policies: which versions survive a collection

use crate::model::NodeHash;
use crate::store::RootsIndex;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    /// The `n` highest versions
    KeepLatest(usize),
    /// Exactly these versions; unknown versions are ignored
    KeepVersions(Vec<u64>),
    /// Every version `>=` this one
    KeepSince(u64),
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::KeepLatest(1)
    }
}

/// Versions split by a policy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Retention {
    pub retained: BTreeMap<u64, NodeHash>,
    pub pruned: BTreeMap<u64, NodeHash>,
}

impl Retention {
    /// Distinct roots of the retained versions
    pub fn retained_roots(&self) -> Vec<NodeHash> {
        let mut roots: Vec<NodeHash> = self.retained.values().copied().collect();
        roots.sort();
        roots.dedup();
        roots
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty() && self.pruned.is_empty()
    }
}

impl RetentionPolicy {
    /// Split the versions of `roots`
    ///
    /// An empty index resolves to an empty retention. A non-empty index that
    /// resolves to zero retained versions is a policy violation.
    pub fn resolve(&self, roots: &dyn RootsIndex) -> Result<Retention> {
        let all = roots.list_all()?;
        if all.is_empty() {
            return Ok(Retention::default());
        }

        let total = all.len();
        let mut retention = Retention::default();
        for (rank, (version, root)) in all.into_iter().enumerate() {
            let keep = match self {
                RetentionPolicy::KeepLatest(n) => total - rank <= *n,
                RetentionPolicy::KeepVersions(versions) => versions.contains(&version),
                RetentionPolicy::KeepSince(since) => version >= *since,
            };
            if keep {
                retention.retained.insert(version, root);
            } else {
                retention.pruned.insert(version, root);
            }
        }

        if retention.retained.is_empty() {
            return Err(Error::Policy(format!(
                "{:?} retains none of {} versions",
                self, total
            )));
        }
        Ok(retention)
    }
}
