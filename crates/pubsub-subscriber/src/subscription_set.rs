//! The mutable set of targets a session polls for.
//!
//! Mutations go through a `watch` channel: writers are serialized by its lock,
//! and the session worker is woken by `changed()` so it can cancel the poll
//! in flight and restart with the new set.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::types::{Target, TargetKind};

/// Point-in-time view of a [`SubscriptionSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetSnapshot {
    targets: BTreeSet<Target>,
    reset_generation: u64,
}

impl SetSnapshot {
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn to_vec(&self) -> Vec<Target> {
        self.targets.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, target: &Target) -> bool {
        self.targets.contains(target)
    }

    /// Names that go in the channel path segment: channels and wildcards.
    pub fn channel_names(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| match t.kind() {
                TargetKind::Channel | TargetKind::Wildcard => true,
                TargetKind::ChannelGroup => false,
            })
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| t.kind() == TargetKind::ChannelGroup)
            .map(|t| t.name().to_string())
            .collect()
    }

    pub(crate) fn reset_generation(&self) -> u64 {
        self.reset_generation
    }
}

/// Shared handle to a session's targets. Cloning shares the same set.
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    tx: Arc<watch::Sender<SetSnapshot>>,
}

impl SubscriptionSet {
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        let snapshot = SetSnapshot {
            targets: targets.into_iter().collect(),
            reset_generation: 0,
        };
        let (tx, _rx) = watch::channel(snapshot);
        Self { tx: Arc::new(tx) }
    }

    /// Merge `targets` into the set. Returns how many were new; adding a
    /// target already present is a no-op and does not wake the session.
    pub fn add(&self, targets: impl IntoIterator<Item = Target>) -> usize {
        let mut added = 0;
        self.tx.send_if_modified(|set| {
            for t in targets {
                if set.targets.insert(t) {
                    added += 1;
                }
            }
            added > 0
        });
        added
    }

    /// Drop `targets` from the set. Returns how many were present.
    pub fn remove<'a>(&self, targets: impl IntoIterator<Item = &'a Target>) -> usize {
        let mut removed = 0;
        self.tx.send_if_modified(|set| {
            for t in targets {
                if set.targets.remove(t) {
                    removed += 1;
                }
            }
            removed > 0
        });
        removed
    }

    pub fn snapshot(&self) -> SetSnapshot {
        self.tx.borrow().clone()
    }

    /// Ask the session to drop its cursor. Always wakes the session.
    pub(crate) fn request_reset(&self) {
        self.tx.send_modify(|set| set.reset_generation += 1);
    }

    pub(crate) fn watch(&self) -> watch::Receiver<SetSnapshot> {
        self.tx.subscribe()
    }
}
