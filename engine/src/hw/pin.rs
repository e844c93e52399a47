use crate::error::PinError;
use crate::packet::PacketRef;
use crate::sample::SampleFormat;

/// Streaming direction of a pin. Render carries host output to the device,
/// capture carries device input to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Render,
    Capture,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Render, Direction::Capture];

    pub fn index(self) -> usize {
        match self {
            Direction::Render => 0,
            Direction::Capture => 1,
        }
    }

    pub fn signal_bit(self) -> u8 {
        1 << self.index()
    }

    pub fn is_input(self) -> bool {
        self == Direction::Capture
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Render => "render",
            Direction::Capture => "capture",
        }
    }
}

/// Run state of a hardware pin. Transitions go one step at a time:
/// Stop <-> Acquire <-> Pause <-> Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PinState {
    Stop,
    Acquire,
    Pause,
    Run,
}

impl PinState {
    pub fn can_transition_to(self, to: PinState) -> bool {
        (self as i32 - to as i32).abs() <= 1
    }

    pub fn step_towards(self, target: PinState) -> PinState {
        use PinState::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Equal => self,
            std::cmp::Ordering::Less => match self {
                Stop => Acquire,
                Acquire => Pause,
                Pause | Run => Run,
            },
            std::cmp::Ordering::Greater => match self {
                Run => Pause,
                Pause => Acquire,
                Acquire | Stop => Stop,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinFormat {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u32,
    pub frames: u32,
}

impl PinFormat {
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes()
    }

    pub fn packet_bytes(&self) -> usize {
        self.frame_bytes() * self.frames as usize
    }
}

/// One direction of one sample-rate/bit-depth combination of the device.
///
/// Read packets are filled by the pin and write packets consumed by it; in
/// both cases the pin sets the packet's bytes-used and signals its completion
/// event once the transfer is done. A pin must not signal packets that were
/// queued before it was moved to [`PinState::Stop`].
pub trait HardwarePin: Send {
    fn instantiate(&mut self, format: &PinFormat) -> Result<(), PinError>;
    fn reset(&mut self) -> Result<(), PinError>;
    fn set_state(&mut self, state: PinState) -> Result<(), PinError>;
    fn enqueue_read(&mut self, packet: &PacketRef) -> Result<(), PinError>;
    fn enqueue_write(&mut self, packet: &PacketRef) -> Result<(), PinError>;
    fn close(&mut self);
    /// Hardware latency in samples at `sample_rate`.
    fn latency(&self, sample_rate: u32) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_states_move_one_step() {
        assert!(PinState::Stop.can_transition_to(PinState::Acquire));
        assert!(PinState::Run.can_transition_to(PinState::Pause));
        assert!(!PinState::Stop.can_transition_to(PinState::Run));
        assert!(!PinState::Run.can_transition_to(PinState::Acquire));
    }

    #[test]
    fn stepping_walks_every_intermediate_state() {
        let mut path = vec![];
        let mut s = PinState::Run;
        while s != PinState::Stop {
            s = s.step_towards(PinState::Stop);
            path.push(s);
        }
        assert_eq!(path, [PinState::Pause, PinState::Acquire, PinState::Stop]);
        assert_eq!(PinState::Stop.step_towards(PinState::Pause), PinState::Acquire);
        assert_eq!(PinState::Pause.step_towards(PinState::Pause), PinState::Pause);
    }

    #[test]
    fn directions_have_distinct_signal_bits() {
        assert_eq!(Direction::Render.signal_bit(), 0b01);
        assert_eq!(Direction::Capture.signal_bit(), 0b10);
    }
}
