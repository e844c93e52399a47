//! Auto-reset events grouped into wait sets. The lowest ready bit wins.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MAX_EVENTS: u32 = u128::BITS;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("event set mutex poisoned")]
    Poisoned,
    #[error("wait mask is empty")]
    EmptyMask,
}

#[derive(Debug, Default)]
struct EventState {
    signaled: u128,
    timers: Vec<(u32, Instant)>,
}

impl EventState {
    fn fire_due_timers(&mut self, now: Instant) {
        let mut fired = 0_u128;
        self.timers.retain(|&(bit, due)| {
            if due <= now {
                fired |= 1_u128 << bit;
                false
            } else {
                true
            }
        });
        self.signaled |= fired;
    }

    fn next_due(&self, mask: u128) -> Option<Instant> {
        self.timers
            .iter()
            .filter(|(bit, _)| mask & (1_u128 << bit) != 0)
            .map(|&(_, due)| due)
            .min()
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<EventState>,
    cvar: Condvar,
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, EventState>, WaitError> {
        self.state.lock().map_err(|_| WaitError::Poisoned)
    }

    fn update(&self, f: impl FnOnce(&mut EventState)) {
        // A poisoned set can no longer wake anybody; signaling is best effort.
        if let Ok(mut st) = self.state.lock() {
            f(&mut st);
            self.cvar.notify_all();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventSet {
    inner: Arc<Inner>,
}

impl EventSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&self, bit: u32) -> Event {
        debug_assert!(bit < MAX_EVENTS, "event bit {bit} out of range");
        Event {
            inner: self.inner.clone(),
            bit,
        }
    }

    pub fn timer(&self, bit: u32) -> Timer {
        debug_assert!(bit < MAX_EVENTS, "timer bit {bit} out of range");
        Timer {
            inner: self.inner.clone(),
            bit,
        }
    }

    /// Blocks until one of the events in `mask` is signaled.
    pub fn wait(&self, mask: u128) -> Result<u32, WaitError> {
        loop {
            if let Some(bit) = self.wait_until(mask, None)? {
                return Ok(bit);
            }
        }
    }

    pub fn wait_timeout(&self, mask: u128, timeout: Duration) -> Result<Option<u32>, WaitError> {
        self.wait_until(mask, Some(Instant::now() + timeout))
    }

    /// Clears every signaled bit in `mask` without waking anybody.
    pub fn reset_mask(&self, mask: u128) {
        if let Ok(mut st) = self.inner.state.lock() {
            st.signaled &= !mask;
        }
    }

    pub fn signaled(&self) -> u128 {
        self.inner.lock().map(|st| st.signaled).unwrap_or(0)
    }

    fn wait_until(&self, mask: u128, deadline: Option<Instant>) -> Result<Option<u32>, WaitError> {
        if mask == 0 {
            return Err(WaitError::EmptyMask);
        }
        let mut st = self.inner.lock()?;
        loop {
            let now = Instant::now();
            st.fire_due_timers(now);
            let ready = st.signaled & mask;
            if ready != 0 {
                let bit = ready.trailing_zeros();
                st.signaled &= !(1_u128 << bit);
                return Ok(Some(bit));
            }
            if deadline.is_some_and(|d| now >= d) {
                return Ok(None);
            }
            let wake = match (deadline, st.next_due(mask)) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            st = match wake {
                Some(at) => {
                    self.inner
                        .cvar
                        .wait_timeout(st, at.saturating_duration_since(now))
                        .map_err(|_| WaitError::Poisoned)?
                        .0
                }
                None => self.inner.cvar.wait(st).map_err(|_| WaitError::Poisoned)?,
            };
        }
    }
}

/// One auto-reset event inside an [`EventSet`].
#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<Inner>,
    bit: u32,
}

impl Event {
    pub fn signal(&self) {
        let bit = self.bit;
        self.inner.update(|st| st.signaled |= 1_u128 << bit);
    }

    pub fn reset(&self) {
        let bit = self.bit;
        self.inner.update(|st| st.signaled &= !(1_u128 << bit));
    }

    pub fn is_signaled(&self) -> bool {
        self.inner
            .lock()
            .map(|st| st.signaled & self.mask() != 0)
            .unwrap_or(false)
    }

    pub fn bit(&self) -> u32 {
        self.bit
    }

    pub fn mask(&self) -> u128 {
        1_u128 << self.bit
    }
}

/// One-shot waitable timer inside an [`EventSet`].
#[derive(Debug, Clone)]
pub struct Timer {
    inner: Arc<Inner>,
    bit: u32,
}

impl Timer {
    /// (Re)arms the timer; a pending due time is replaced.
    pub fn arm(&self, after: Duration) {
        let bit = self.bit;
        let due = Instant::now() + after;
        self.inner.update(|st| {
            st.timers.retain(|&(b, _)| b != bit);
            st.timers.push((bit, due));
        });
    }

    /// Cancels a pending due time and drops an expiry nobody consumed yet.
    pub fn cancel(&self) {
        let bit = self.bit;
        self.inner.update(|st| {
            st.timers.retain(|&(b, _)| b != bit);
            st.signaled &= !(1_u128 << bit);
        });
    }

    pub fn is_armed(&self) -> bool {
        self.inner
            .lock()
            .map(|st| st.timers.iter().any(|&(b, _)| b == self.bit))
            .unwrap_or(false)
    }

    pub fn mask(&self) -> u128 {
        1_u128 << self.bit
    }
}
