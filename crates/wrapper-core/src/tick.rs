//! A 32-bit wrapping monotonic tick counter, ~100ms granularity.
//!
//! A fixed-width wrapping counter gives constant-time arithmetic and is
//! self-correcting for long-running processes. All ages are computed as
//! signed 32-bit differences so they remain correct across a single wrap;
//! this assumes no single age exceeds 2^31 ticks (~6.8 years at 100ms),
//! which every configured state timeout is far below.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type Tick = u32;

/// One tick is ~100ms; ten ticks make a second.
pub const TICKS_PER_SECOND: u32 = 10;

/// A fixed initial offset avoids low-value ambiguity (a tick near zero
/// looking indistinguishable from "unset") right after start.
const INITIAL_OFFSET: Tick = 1_000;

/// Age of `end` relative to `start`, as a signed tick count. Correct across
/// exactly one wraparound.
pub fn age_ticks(start: Tick, end: Tick) -> i32 {
    end.wrapping_sub(start) as i32
}

/// Age of `end` relative to `start`, in whole seconds (truncating).
pub fn age_seconds(start: Tick, end: Tick) -> i32 {
    age_ticks(start, end) / TICKS_PER_SECOND as i32
}

/// `start` advanced by `seconds` (may be negative), wrapping as needed.
pub fn add(start: Tick, seconds: i32) -> Tick {
    let delta = seconds.wrapping_mul(TICKS_PER_SECOND as i32);
    start.wrapping_add(delta as u32)
}

/// True iff `now - deadline >= 0` in signed 32-bit arithmetic.
pub fn expired(now: Tick, deadline: Tick) -> bool {
    age_ticks(deadline, now) >= 0
}

/// How the clock advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Ticks are derived directly from the wall clock on every `now()` call.
    SystemTime,
    /// A maintenance thread increments the counter roughly every 100ms; the
    /// counter is guarded by a mutex (the "tick mutex") since `now()` may be
    /// called from more than one thread when `useJavaIOThread`-style worker
    /// threads are enabled.
    TickThread,
}

/// The supervisor's clock. Owned by the `Supervisor` aggregate and threaded
/// explicitly through operations that need "now" — never a process-wide
/// singleton.
pub struct TickClock {
    mode: ClockMode,
    origin: Instant,
    counter: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TickClock {
    /// Construct a clock in `SystemTime` mode: `now()` is computed on demand
    /// from `Instant::now()`, no background thread required.
    pub fn system_time() -> Self {
        TickClock {
            mode: ClockMode::SystemTime,
            origin: Instant::now(),
            counter: Arc::new(AtomicU32::new(INITIAL_OFFSET)),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Construct a clock in `TickThread` mode and start the maintenance
    /// thread immediately.
    pub fn tick_thread() -> Self {
        let counter = Arc::new(AtomicU32::new(INITIAL_OFFSET));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_counter = Arc::clone(&counter);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("wrapperd-tick".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(100));
                    thread_counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .expect("spawning tick thread");
        TickClock {
            mode: ClockMode::TickThread,
            origin: Instant::now(),
            counter,
            stop,
            thread: Some(handle),
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn now(&self) -> Tick {
        match self.mode {
            ClockMode::SystemTime => {
                let elapsed_ms = self.origin.elapsed().as_millis();
                let ticks = (elapsed_ms / 100) as u32;
                INITIAL_OFFSET.wrapping_add(ticks)
            }
            ClockMode::TickThread => self.counter.load(Ordering::SeqCst),
        }
    }

    pub fn age_ticks(&self, start: Tick) -> i32 {
        age_ticks(start, self.now())
    }

    pub fn age_seconds(&self, start: Tick) -> i32 {
        age_seconds(start, self.now())
    }

    pub fn add_seconds(&self, seconds: i32) -> Tick {
        add(self.now(), seconds)
    }

    pub fn expired(&self, deadline: Tick) -> bool {
        expired(self.now(), deadline)
    }
}

impl Drop for TickClock {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_seconds_matches_add_for_small_deltas() {
        for s in [0, 1, 5, 30, 3600, 1 << 20] {
            let start: Tick = 42;
            let end = add(start, s);
            assert_eq!(age_seconds(start, end), s, "s={}", s);
        }
    }

    #[test]
    fn expired_is_signed_and_wrap_safe() {
        let deadline: Tick = 100;
        assert!(!expired(99, deadline));
        assert!(expired(100, deadline));
        assert!(expired(101, deadline));

        // Wrap across u32::MAX: deadline just before wrap, now just after.
        let deadline: Tick = u32::MAX - 5;
        let now: Tick = 10; // wrapped around
        assert!(expired(now, deadline));
    }

    #[test]
    fn age_ticks_handles_wraparound() {
        let start: Tick = u32::MAX - 2;
        let end: Tick = 3; // wrapped past MAX
        assert_eq!(age_ticks(start, end), 6);
    }

    #[test]
    fn system_time_clock_advances_monotonically() {
        let clock = TickClock::system_time();
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t1 = clock.now();
        assert!(age_ticks(t0, t1) >= 0);
    }

    #[test]
    fn tick_thread_clock_advances() {
        let clock = TickClock::tick_thread();
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(250));
        let t1 = clock.now();
        assert!(clock.age_ticks(t0) > 0, "t0={} t1={}", t0, t1);
    }
}
