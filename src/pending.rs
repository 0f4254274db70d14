//! The pending-callback table shared by every store on a context.
//!
//! One entry per listener. Triggers that reach a listener before it is
//! delivered are merged into its entry:
//! - keys widen, and collapse to `All` for good once any all-keys trigger hits
//! - the due time is the earliest of the two, and an immediate trigger clears it
//! - the block-bypass flag only ever turns on

use crate::subscriptions::Listener;
use crate::types::{Key, ListenerId, Timestamp};
use std::collections::{HashMap, HashSet};

/// Keys accumulated for one listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingKeys {
    All,
    Keys(Vec<Key>),
}

impl PendingKeys {
    fn absorb(&mut self, incoming: PendingKeys) {
        match incoming {
            PendingKeys::All => *self = PendingKeys::All,
            PendingKeys::Keys(more) => {
                if let PendingKeys::Keys(keys) = self {
                    keys.extend(more);
                }
            }
        }
    }

    /// Keys with duplicates removed, keeping first occurrence. `None` for `All`.
    pub fn deduplicated(&self) -> Option<Vec<Key>> {
        match self {
            PendingKeys::All => None,
            PendingKeys::Keys(keys) => {
                let mut seen = HashSet::with_capacity(keys.len());
                Some(
                    keys.iter()
                        .filter(|k| seen.insert(k.as_str()))
                        .cloned()
                        .collect(),
                )
            }
        }
    }
}

pub(crate) struct PendingEntry {
    pub(crate) listener: Listener,
    pub(crate) keys: PendingKeys,
    /// `None` means deliverable immediately.
    pub(crate) due: Option<Timestamp>,
    pub(crate) bypass_block: bool,
    order: u64,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<ListenerId, PendingEntry>,
    next_order: u64,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a trigger for `listener`, merging with any entry already queued.
    pub(crate) fn merge(
        &mut self,
        listener: &Listener,
        keys: PendingKeys,
        due: Option<Timestamp>,
        bypass_block: bool,
    ) {
        if let Some(entry) = self.entries.get_mut(&listener.id()) {
            entry.keys.absorb(keys);
            entry.due = match (entry.due, due) {
                (Some(current), Some(incoming)) => Some(current.min(incoming)),
                _ => None,
            };
            entry.bypass_block |= bypass_block;
            tracing::trace!(listener = listener.id().0, ?entry.due, "merged pending trigger");
            return;
        }

        self.next_order += 1;
        self.entries.insert(
            listener.id(),
            PendingEntry {
                listener: listener.clone(),
                keys,
                due,
                bypass_block,
                order: self.next_order,
            },
        );
    }

    /// Drop any queued trigger for `id`. Returns true if one was queued.
    pub(crate) fn purge(&mut self, id: ListenerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Remove and return every entry deliverable at `now`, in queue order.
    ///
    /// While `blocked`, only bypassing entries qualify. Entries due in the
    /// future stay queued unless `ignore_throttle` is set.
    pub(crate) fn take_ready(
        &mut self,
        now: Timestamp,
        blocked: bool,
        ignore_throttle: bool,
    ) -> Vec<PendingEntry> {
        let ready_ids: Vec<ListenerId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                if blocked && !entry.bypass_block {
                    return false;
                }
                !matches!(entry.due, Some(due) if due > now && !ignore_throttle)
            })
            .map(|(id, _)| *id)
            .collect();

        let mut ready: Vec<PendingEntry> = ready_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect();
        ready.sort_by_key(|entry| entry.order);
        ready
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: ListenerId) -> Option<&PendingEntry> {
        self.entries.get(&id)
    }
}
