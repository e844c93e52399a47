//! Buffer sizes are stored in 100 ns units and exchanged in frames. At
//! 44.1 kHz the conversion uses 441 samples per 100 000 ticks rounded up;
//! other rates truncate.

use std::sync::OnceLock;
use std::time::Instant;

pub const TICKS_PER_SECOND: u64 = 10_000_000;
pub const TICKS_PER_MS: u64 = 10_000;

/// Buffer durations offered to the host, in milliseconds.
pub const BUFFER_SIZES_MS: [u32; 15] = [1, 2, 3, 4, 5, 6, 8, 10, 12, 15, 20, 25, 30, 40, 50];

pub const DEFAULT_BUFFER_SIZE_100NS: u32 = 100_000;

const RATE_44K1: u32 = 44_100;
const SCALE_44K1_SAMPLES: u64 = 441;
const SCALE_44K1_TICKS: u64 = 100_000;

pub fn samples_for_interval(sample_rate: u32, interval_100ns: u64) -> u32 {
    if sample_rate == RATE_44K1 {
        let scaled = interval_100ns * SCALE_44K1_SAMPLES;
        scaled.div_ceil(SCALE_44K1_TICKS) as u32
    } else {
        (interval_100ns * sample_rate as u64 / TICKS_PER_SECOND) as u32
    }
}

pub fn interval_for_samples(sample_rate: u32, samples: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    if sample_rate == RATE_44K1 {
        samples as u64 * SCALE_44K1_TICKS / SCALE_44K1_SAMPLES
    } else {
        samples as u64 * TICKS_PER_SECOND / sample_rate as u64
    }
}

/// Whole milliseconds covered by `samples`, at least 1.
pub fn buffer_ms(sample_rate: u32, samples: u32) -> u32 {
    ((interval_for_samples(sample_rate, samples) / TICKS_PER_MS) as u32).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizeRange {
    pub min: u32,
    pub max: u32,
    pub preferred: u32,
    pub granularity: i32,
}

impl BufferSizeRange {
    pub fn for_rate(sample_rate: u32, preferred_100ns: u32) -> Self {
        let sizes: Vec<u32> = BUFFER_SIZES_MS
            .iter()
            .map(|&ms| samples_for_interval(sample_rate, ms as u64 * TICKS_PER_MS))
            .collect();
        let min = sizes.first().copied().unwrap_or(0);
        let max = sizes.last().copied().unwrap_or(0);
        let wanted = samples_for_interval(sample_rate, preferred_100ns as u64);
        let preferred = sizes
            .iter()
            .copied()
            .min_by_key(|&s| s.abs_diff(wanted))
            .unwrap_or(min);
        let granularity = if min == max {
            0
        } else if sizes.iter().all(|s| s.is_power_of_two()) {
            -1
        } else {
            sizes.iter().copied().fold(0, gcd) as i32
        };
        Self {
            min,
            max,
            preferred,
            granularity,
        }
    }

    pub fn contains(&self, samples: u32) -> bool {
        samples >= self.min && samples <= self.max
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Monotonic system time in nanoseconds.
pub fn system_time_nanos() -> u64 {
    #[cfg(unix)]
    {
        use nix::libc;
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) } == 0 {
            return now.tv_sec as u64 * 1_000_000_000 + now.tv_nsec as u64;
        }
    }
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
