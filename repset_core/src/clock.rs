//! Time sources for the session engine.
//!
//! Timers never count ticks to know how much time passed: every tick and
//! every resume re-reads the wall clock. A `Ticker` only decides *when* the
//! host calls back into the controller.

use chrono::{DateTime, Duration, Utc};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

/// Wall-clock "now" provider
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same instant, so a test can keep one handle and give
/// another to the controller.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.now.set(self.now.get() + Duration::seconds(seconds));
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now.set(at);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Identity of one scheduled repeating callback
///
/// A tick carrying a handle that is no longer the timer's current handle is
/// stale and must be ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickHandle(pub u64);

/// "Call me back every N seconds until cancelled"
///
/// The host delivers each tick by calling
/// `SessionController::handle_tick(handle)` on the UI context.
pub trait Ticker {
    fn schedule_repeating(&mut self, interval_seconds: u32) -> TickHandle;
    fn cancel(&mut self, handle: TickHandle);
}

/// Ticker that hands out handles and remembers which are live
///
/// Used by tests and by hosts that drive ticks from their own loop.
#[derive(Clone, Debug, Default)]
pub struct ManualTicker {
    inner: Rc<RefCell<ManualTickerState>>,
}

#[derive(Debug, Default)]
struct ManualTickerState {
    next_id: u64,
    active: BTreeSet<TickHandle>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, handle: TickHandle) -> bool {
        self.inner.borrow().active.contains(&handle)
    }

    /// Currently scheduled handles, oldest first
    pub fn active_handles(&self) -> Vec<TickHandle> {
        self.inner.borrow().active.iter().copied().collect()
    }
}

impl Ticker for ManualTicker {
    fn schedule_repeating(&mut self, interval_seconds: u32) -> TickHandle {
        let mut state = self.inner.borrow_mut();
        state.next_id += 1;
        let handle = TickHandle(state.next_id);
        state.active.insert(handle);
        tracing::trace!("Scheduled tick {:?} every {}s", handle, interval_seconds);
        handle
    }

    fn cancel(&mut self, handle: TickHandle) {
        self.inner.borrow_mut().active.remove(&handle);
    }
}
