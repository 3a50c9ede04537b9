//! Monotonic tick source for the timer engine (`platform-timing`'s `CurrentTick`,
//! `MicrosecondsToTicks` and `TicksToMicroseconds`). Grounded on
//! `original_source/src/platform/components/timing/timer_linux.c`'s TSC-to-wallclock
//! calibration, stripped of the unrelated hot-path budget framing.

use std::sync::OnceLock;
use std::time::Instant;

#[allow(unsafe_code)]
mod rdtsc {
    #[cfg(target_arch = "x86_64")]
    #[inline(always)]
    pub fn read() -> u64 {
        // SAFETY: `_rdtsc` reads a CPU register and has no memory-safety implications.
        unsafe { std::arch::x86_64::_rdtsc() }
    }

    #[cfg(not(target_arch = "x86_64"))]
    #[inline(always)]
    pub fn read() -> u64 {
        std::time::Instant::now().elapsed().as_nanos() as u64
    }
}

struct Calibration {
    ticks_per_microsecond: f64,
    epoch_tsc: u64,
}

static CALIBRATION: OnceLock<Calibration> = OnceLock::new();

/// Measure the TSC rate against the wall clock. Idempotent; only the first call's
/// measurement is kept.
pub fn calibrate() {
    CALIBRATION.get_or_init(|| {
        let start_instant = Instant::now();
        let start_tsc = rdtsc::read();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let end_tsc = rdtsc::read();
        let elapsed_us = start_instant.elapsed().as_micros().max(1) as f64;
        Calibration {
            ticks_per_microsecond: (end_tsc - start_tsc) as f64 / elapsed_us,
            epoch_tsc: start_tsc,
        }
    });
}

fn calibration() -> &'static Calibration {
    CALIBRATION.get().expect("tick::calibrate() must run before the tick source is read")
}

/// The timer engine's monotonic clock, expressed in raw ticks since calibration.
pub fn current_tick() -> u64 {
    rdtsc::read()
}

pub fn microseconds_to_ticks(microseconds: u64) -> u64 {
    (microseconds as f64 * calibration().ticks_per_microsecond) as u64
}

/// Converts a tick value back into microseconds elapsed since calibration.
pub fn ticks_to_microseconds(ticks: u64) -> u64 {
    let cal = calibration();
    let delta_ticks = ticks.saturating_sub(cal.epoch_tsc) as f64;
    (delta_ticks / cal.ticks_per_microsecond) as u64
}
