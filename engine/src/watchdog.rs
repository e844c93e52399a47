use crate::event::{Event, EventSet, Timer};
use crate::hw::thread::{RT_PRIORITY_WATCHDOG, promote_current_thread};
use crate::shared::Shared;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

pub const ABORT_EVENT: u32 = 0;
pub const TIMER_EVENT: u32 = 1;
const THREAD_NAME: &str = "uacstream-watchdog";

pub struct Watchdog {
    shared: Arc<Shared>,
    events: EventSet,
    abort: Event,
    timer: Timer,
}

impl Watchdog {
    pub fn new(shared: Arc<Shared>) -> Self {
        let events = EventSet::new();
        Self {
            shared,
            abort: events.event(ABORT_EVENT),
            timer: events.timer(TIMER_EVENT),
            events,
        }
    }

    pub fn abort_event(&self) -> Event {
        self.abort.clone()
    }

    /// Handle the I/O thread arms and cancels.
    pub fn timer(&self) -> Timer {
        self.timer.clone()
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        promote_current_thread(
            THREAD_NAME,
            RT_PRIORITY_WATCHDOG,
            self.shared.options.realtime,
        );
        let mask = self.abort.mask() | self.timer.mask();
        loop {
            match self.events.wait(mask) {
                Ok(ABORT_EVENT) => {
                    self.timer.cancel();
                    break;
                }
                Ok(TIMER_EVENT) => {
                    warn!(
                        "no packet completed within {} ms, requesting reset",
                        self.shared.options.watchdog_interval_ms
                    );
                    self.shared.stats.record_watchdog_reset();
                    if !(self.shared.io_alive() && self.shared.post_reset()) {
                        warn!("I/O thread is gone, asking the host directly");
                        self.shared.request_host_reset();
                    }
                }
                Ok(other) => warn!("{} woke on unknown event {}", THREAD_NAME, other),
                Err(e) => {
                    error!("{} wait failed: {}", THREAD_NAME, e);
                    break;
                }
            }
        }
        debug!("{} exited", THREAD_NAME);
    }
}
