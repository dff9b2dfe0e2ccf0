//! Per-worker timer loop with deferred handle teardown.
//!
//! Handles move through armed → stopped → closing. Closing a handle never
//! surrenders its payload immediately: the payload is delivered by
//! [`EventLoop::drain_closed`] on a later loop turn, so a script callback
//! reference stored in the payload is only released on the owning thread,
//! outside engine re-entry.

use std::time::{Duration, Instant};

use alot::{LotId, Lots};

pub(crate) type HandleId = LotId;

pub(crate) struct EventLoop<T> {
    handles: Lots<TimerHandle<T>>,
    /// Every open handle, in creation order.
    open: Vec<HandleId>,
    /// Handles whose close has been requested but not yet delivered.
    close_queue: Vec<HandleId>,
}

struct TimerHandle<T> {
    state: HandleState,
    due: Option<Instant>,
    payload: T,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum HandleState {
    Armed,
    Stopped,
    Closing,
}

impl<T> EventLoop<T> {
    pub fn new() -> Self {
        Self {
            handles: Lots::new(),
            open: Vec::new(),
            close_queue: Vec::new(),
        }
    }

    /// Registers a handle in the stopped state.
    pub fn open(&mut self, payload: T) -> HandleId {
        let id = self.handles.push(TimerHandle {
            state: HandleState::Stopped,
            due: None,
            payload,
        });
        self.open.push(id);
        id
    }

    /// Arms (or re-arms) a handle to fire after `delay`. Ignored once the
    /// handle is closing.
    pub fn start(&mut self, id: HandleId, delay: Duration) {
        if let Some(handle) = self.handles.get_mut(id) {
            if handle.state != HandleState::Closing {
                handle.state = HandleState::Armed;
                handle.due = Some(Instant::now() + delay);
            }
        }
    }

    /// Disarms a handle without closing it. Ignored once closing.
    pub fn stop(&mut self, id: HandleId) {
        if let Some(handle) = self.handles.get_mut(id) {
            if handle.state != HandleState::Closing {
                handle.state = HandleState::Stopped;
                handle.due = None;
            }
        }
    }

    /// Schedules a handle for close. Idempotent; the payload surfaces in
    /// the next [`Self::drain_closed`].
    pub fn close(&mut self, id: HandleId) {
        if let Some(handle) = self.handles.get_mut(id) {
            if handle.state != HandleState::Closing {
                handle.state = HandleState::Closing;
                handle.due = None;
                self.close_queue.push(id);
            }
        }
    }

    /// Tears a handle down immediately, bypassing the close queue. Used by
    /// en-masse cancellation, which runs outside engine re-entry.
    pub fn remove(&mut self, id: HandleId) -> Option<T> {
        let handle = self.handles.remove(id)?;
        self.open.retain(|open| *open != id);
        self.close_queue.retain(|queued| *queued != id);
        Some(handle.payload)
    }

    /// Disarms and returns every handle due at `now`, in creation order.
    /// Callers fire them, then restart (periodic) or close (one-shot).
    pub fn take_due(&mut self, now: Instant) -> Vec<HandleId> {
        let mut due = Vec::new();
        for id in &self.open {
            if let Some(handle) = self.handles.get_mut(*id) {
                if handle.state == HandleState::Armed && handle.due.is_some_and(|at| at <= now) {
                    handle.state = HandleState::Stopped;
                    handle.due = None;
                    due.push(*id);
                }
            }
        }
        due
    }

    /// Delivers the payloads of every handle scheduled for close, freeing
    /// the handles.
    pub fn drain_closed(&mut self) -> Vec<T> {
        let queued = std::mem::take(&mut self.close_queue);
        let mut closed = Vec::with_capacity(queued.len());
        for id in queued {
            if let Some(handle) = self.handles.remove(id) {
                self.open.retain(|open| *open != id);
                closed.push(handle.payload);
            }
        }
        closed
    }

    /// Armed handles plus undelivered closes; the loop has work as long as
    /// this is non-zero.
    pub fn active_handles(&self) -> usize {
        let armed = self
            .open
            .iter()
            .filter(|id| {
                self.handles
                    .get(**id)
                    .is_some_and(|handle| handle.state == HandleState::Armed)
            })
            .count();
        armed + self.close_queue.len()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_handles(&self) -> Vec<HandleId> {
        self.open.clone()
    }

    pub fn is_closing(&self, id: HandleId) -> bool {
        self.handles
            .get(id)
            .is_some_and(|handle| handle.state == HandleState::Closing)
    }

    pub fn is_open(&self, id: HandleId) -> bool {
        self.handles.get(id).is_some()
    }

    pub fn payload(&self, id: HandleId) -> Option<&T> {
        self.handles.get(id).map(|handle| &handle.payload)
    }

    /// The earliest armed deadline, if any.
    pub fn next_due(&self) -> Option<Instant> {
        self.open
            .iter()
            .filter_map(|id| self.handles.get(*id))
            .filter(|handle| handle.state == HandleState::Armed)
            .filter_map(|handle| handle.due)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_creation_order() {
        let mut timers = EventLoop::new();
        let first = timers.open("first");
        let second = timers.open("second");
        timers.start(first, Duration::ZERO);
        timers.start(second, Duration::ZERO);

        let due = timers.take_due(Instant::now() + Duration::from_millis(1));
        assert_eq!(due, vec![first, second]);
        // Fired handles are disarmed until restarted.
        assert!(timers
            .take_due(Instant::now() + Duration::from_millis(1))
            .is_empty());
    }

    #[test]
    fn close_delivery_is_deferred() {
        let mut timers = EventLoop::new();
        let id = timers.open("payload");
        timers.start(id, Duration::ZERO);
        timers.close(id);
        timers.close(id);

        // Closing handles no longer fire but keep the loop active.
        assert!(timers
            .take_due(Instant::now() + Duration::from_millis(1))
            .is_empty());
        assert_eq!(timers.active_handles(), 1);

        assert_eq!(timers.drain_closed(), vec!["payload"]);
        assert_eq!(timers.active_handles(), 0);
        assert_eq!(timers.open_count(), 0);
    }

    #[test]
    fn remove_bypasses_close_queue() {
        let mut timers = EventLoop::new();
        let id = timers.open("payload");
        timers.close(id);
        assert_eq!(timers.remove(id), Some("payload"));
        assert!(timers.drain_closed().is_empty());
    }

    #[test]
    fn restart_rearms() {
        let mut timers = EventLoop::new();
        let id = timers.open(());
        timers.start(id, Duration::ZERO);
        let fired = timers.take_due(Instant::now() + Duration::from_millis(1));
        assert_eq!(fired.len(), 1);

        timers.start(id, Duration::ZERO);
        assert_eq!(timers.active_handles(), 1);
        assert!(timers.next_due().is_some());
    }
}
