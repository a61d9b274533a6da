//! Real-time pacing for the encode loop
//!
//! Reading PCM from a file-backed or buffered endpoint can run far ahead
//! of playback time; the pacer throttles each iteration to the nominal
//! duration of one codec frame. The checkpoint advances by exactly one
//! nominal period per call, never by the actual wake time, so a single
//! late wakeup shortens the next wait instead of shifting the schedule.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::transport::StopSignal;

#[derive(Debug, PartialEq, Eq)]
pub enum PaceOutcome {
    Continue,
    Cancelled,
}

/// Per-iteration rate limiter bound to a codec frame duration.
#[derive(Debug)]
pub struct Pacer {
    checkpoint: Instant,
    nominal: Duration,
}

impl Pacer {
    /// `nominal` is the real-time duration of one iteration's worth of
    /// audio, typically [`frame_duration`](crate::CodecAdapter::frame_duration).
    pub fn new(nominal: Duration) -> Self {
        Self {
            checkpoint: Instant::now(),
            nominal,
        }
    }

    pub fn nominal(&self) -> Duration {
        self.nominal
    }

    /// Suspend until one nominal period past the previous checkpoint. A
    /// call arriving late falls through immediately; that is expected
    /// under load and is not reported. The wait doubles as a cancellation
    /// point: it watches the stop signal's event descriptor.
    pub fn wait(&mut self, stop: &StopSignal) -> PaceOutcome {
        if stop.is_stopped() {
            return PaceOutcome::Cancelled;
        }
        let due = self.checkpoint + self.nominal;
        loop {
            let now = Instant::now();
            if now >= due {
                break;
            }
            let remaining = due - now;
            // poll(2) has millisecond resolution; rounding up and
            // re-checking the clock keeps sub-millisecond remainders from
            // turning into a busy spin.
            let ms = ((remaining.as_micros() + 999) / 1000).min(u128::from(u16::MAX)) as u16;
            let mut fds = [PollFd::new(stop.event_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(ms)) {
                Err(Errno::EINTR) => continue,
                Err(_) | Ok(_) => {}
            }
            if stop.is_stopped() {
                return PaceOutcome::Cancelled;
            }
        }
        self.checkpoint = due;
        PaceOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_time_stays_near_n_times_nominal() {
        let stop = StopSignal::new().unwrap();
        let mut pacer = Pacer::new(Duration::from_millis(10));
        assert_eq!(pacer.nominal(), Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..20 {
            assert_eq!(pacer.wait(&stop), PaceOutcome::Continue);
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(190), "ran hot: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(400), "drifted: {elapsed:?}");
    }

    #[test]
    fn late_caller_catches_up_without_extra_waiting() {
        let stop = StopSignal::new().unwrap();
        let mut pacer = Pacer::new(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(35));

        // Three periods are already owed; these calls must fall through.
        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(pacer.wait(&stop), PaceOutcome::Continue);
        }
        assert!(start.elapsed() < Duration::from_millis(8));
    }

    #[test]
    fn stop_interrupts_the_wait() {
        let stop = StopSignal::new().unwrap();
        let mut pacer = Pacer::new(Duration::from_secs(1));

        let waker = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            waker.stop();
        });

        let start = Instant::now();
        assert_eq!(pacer.wait(&stop), PaceOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_millis(500));
        handle.join().unwrap();
    }
}
