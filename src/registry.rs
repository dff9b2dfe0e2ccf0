//! Lookup table from script-visible timer ids to platform handles.
//!
//! A closed-address hash with a fixed bucket count and a single mutex.
//! `clear*` from script resolves ids in O(1); iteration happens only when
//! a context cancels its timers en-masse or the runtime shuts down.

use std::array;

use parking_lot::Mutex;

use crate::engine::ContextId;
use crate::eventloop::HandleId;

pub(crate) const TIMER_TABLE_BUCKETS: usize = 64;

pub(crate) struct TimerRegistry {
    locked: Mutex<[Vec<TimerEntry>; TIMER_TABLE_BUCKETS]>,
}

#[derive(Clone, Copy)]
struct TimerEntry {
    id: i32,
    handle: HandleId,
    owner: ContextId,
}

fn bucket(id: i32) -> usize {
    id.unsigned_abs() as usize % TIMER_TABLE_BUCKETS
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(array::from_fn(|_| Vec::new())),
        }
    }

    pub fn insert(&self, id: i32, handle: HandleId, owner: ContextId) {
        let mut buckets = self.locked.lock();
        buckets[bucket(id)].push(TimerEntry { id, handle, owner });
    }

    /// Resolves a script-visible id. Absent ids are the expected case for
    /// `clear*` on an expired timer.
    pub fn find(&self, id: i32) -> Option<(HandleId, ContextId)> {
        let buckets = self.locked.lock();
        buckets[bucket(id)]
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| (entry.handle, entry.owner))
    }

    /// Removes an entry. Idempotent.
    pub fn remove(&self, id: i32) -> Option<(HandleId, ContextId)> {
        let mut buckets = self.locked.lock();
        let chain = &mut buckets[bucket(id)];
        let index = chain.iter().position(|entry| entry.id == id)?;
        let entry = chain.swap_remove(index);
        Some((entry.handle, entry.owner))
    }

    pub fn contains(&self, id: i32) -> bool {
        self.find(id).is_some()
    }

    /// Removes and returns every entry owned by `owner`.
    pub fn take_owned(&self, owner: ContextId) -> Vec<(i32, HandleId)> {
        let mut buckets = self.locked.lock();
        let mut taken = Vec::new();
        for chain in buckets.iter_mut() {
            chain.retain(|entry| {
                if entry.owner == owner {
                    taken.push((entry.id, entry.handle));
                    false
                } else {
                    true
                }
            });
        }
        taken
    }

    /// Removes and returns every entry.
    pub fn drain_all(&self) -> Vec<(i32, HandleId)> {
        let mut buckets = self.locked.lock();
        let mut taken = Vec::new();
        for chain in buckets.iter_mut() {
            taken.extend(chain.drain(..).map(|entry| (entry.id, entry.handle)));
        }
        taken
    }

    pub fn len(&self) -> usize {
        let buckets = self.locked.lock();
        buckets.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use alot::Lots;

    use super::*;

    fn ids() -> (Vec<HandleId>, Vec<ContextId>) {
        // LotIds can only be minted by a Lots.
        let mut lots = Lots::new();
        let handles: Vec<HandleId> = (0..4).map(|n| lots.push(n)).collect();
        let contexts = handles.iter().map(|id| ContextId(*id)).collect();
        (handles, contexts)
    }

    #[test]
    fn insert_find_remove() {
        let (handles, contexts) = ids();
        let registry = TimerRegistry::new();
        registry.insert(7, handles[0], contexts[0]);
        // Lands in the same bucket as 7.
        registry.insert(7 + TIMER_TABLE_BUCKETS as i32, handles[1], contexts[0]);

        assert_eq!(registry.find(7), Some((handles[0], contexts[0])));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(7));

        assert!(registry.remove(7).is_some());
        assert!(registry.remove(7).is_none());
        assert_eq!(
            registry.find(7 + TIMER_TABLE_BUCKETS as i32),
            Some((handles[1], contexts[0]))
        );
    }

    #[test]
    fn take_owned_filters_by_context() {
        let (handles, contexts) = ids();
        let registry = TimerRegistry::new();
        registry.insert(1, handles[0], contexts[0]);
        registry.insert(2, handles[1], contexts[1]);
        registry.insert(3, handles[2], contexts[0]);

        let mut taken = registry.take_owned(contexts[0]);
        taken.sort_by_key(|(id, _)| *id);
        assert_eq!(
            taken.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(2));
    }

    #[test]
    fn drain_all_empties_every_bucket() {
        let (handles, contexts) = ids();
        let registry = TimerRegistry::new();
        for id in 1..=100 {
            registry.insert(id, handles[0], contexts[0]);
        }
        assert_eq!(registry.drain_all().len(), 100);
        assert_eq!(registry.len(), 0);
    }
}
