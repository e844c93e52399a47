use crate::event::{Event, EventSet};
use crate::host::{HostMessage, MessageSelector, host_supports};
use crate::hw::device::HwNotifier;
use crate::hw::thread::{RT_PRIORITY_EVENTS, promote_current_thread};
use crate::shared::{IoState, Shared};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub const ABORT_EVENT: u32 = 0;
pub const CLOCK_RATE_EVENT: u32 = 1;
pub const CLOCK_SOURCE_EVENT: u32 = 2;
pub const RESYNC_EVENT: u32 = 3;
const THREAD_NAME: &str = "uacstream-hw-events";

pub struct HwEventThread {
    shared: Arc<Shared>,
    events: EventSet,
    abort: Event,
}

impl HwEventThread {
    pub fn new(shared: Arc<Shared>) -> Self {
        let events = EventSet::new();
        Self {
            shared,
            abort: events.event(ABORT_EVENT),
            events,
        }
    }

    pub fn abort_event(&self) -> Event {
        self.abort.clone()
    }

    pub fn notifier(&self) -> HwNotifier {
        HwNotifier {
            clock_rate_changed: self.events.event(CLOCK_RATE_EVENT),
            clock_source_changed: self.events.event(CLOCK_SOURCE_EVENT),
            resync_requested: self.events.event(RESYNC_EVENT),
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        promote_current_thread(THREAD_NAME, RT_PRIORITY_EVENTS, self.shared.options.realtime);
        let mask = (1_u128 << (RESYNC_EVENT + 1)) - 1;
        loop {
            match self.events.wait(mask) {
                Ok(ABORT_EVENT) => break,
                Ok(CLOCK_RATE_EVENT) => self.on_clock_rate_changed(),
                Ok(CLOCK_SOURCE_EVENT) => {
                    info!(
                        "{} clock source changed to {}",
                        self.shared.device_name,
                        self.shared.device.current_clock_source()
                    );
                }
                Ok(RESYNC_EVENT) => self.on_resync(),
                Ok(other) => warn!("{} woke on unknown event {}", THREAD_NAME, other),
                Err(e) => {
                    error!("{} wait failed: {}", THREAD_NAME, e);
                    break;
                }
            }
        }
        debug!("{} exited", THREAD_NAME);
    }

    fn on_clock_rate_changed(&self) {
        let rate = match self.shared.device.current_sample_rate() {
            Ok(rate) => rate,
            Err(e) => {
                error!("{} clock rate unreadable: {}", self.shared.device_name, e);
                return;
            }
        };
        if self.shared.selected_rate() == Some(rate) {
            return;
        }
        let known = match self.shared.resources() {
            Ok(res) => res.supports_rate(rate),
            Err(e) => {
                error!("{} clock rate change ignored: {}", THREAD_NAME, e);
                return;
            }
        };
        if !known {
            warn!(
                "{} switched to unsupported rate {} Hz",
                self.shared.device_name, rate
            );
            return;
        }
        info!("{} clock rate changed to {} Hz", self.shared.device_name, rate);
        self.shared.select_rate(Some(rate));
        if self.shared.buffers_exist() {
            self.shared.set_rate_change_pending();
            self.shared.post_reset();
        }
    }

    fn on_resync(&self) {
        if self.shared.io_state() != IoState::Running {
            return;
        }
        if self.shared.options.resync_notify
            && let Some(host) = self.shared.host()
            && host_supports(host.as_ref(), MessageSelector::ResyncRequest)
            && host.message(HostMessage::ResyncRequest) == 1
        {
            debug!("host accepted resync request");
            return;
        }
        self.shared.post_reset();
    }
}
