// ── Adaptive polling cadence ──
//
// Pure state: the polling loop asks for the next sleep interval, command
// dispatch resets the fast window. Fast polling runs for a bounded
// number of rounds after any mutating command so its effect shows up
// quickly, then the loop falls back to the slow steady-state interval.

use std::time::Duration;

use crate::config::StationOptions;

/// The firmware cannot keep up with more than one full report round
/// every 5 seconds in steady state.
pub(crate) const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Lower bound for the post-command fast interval.
pub(crate) const MIN_FAST_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) struct Cadence {
    slow: Duration,
    fast: Duration,
    /// Fast rounds per window: `2 * slow / fast`.
    fast_rounds_max: u32,
    fast_rounds: u32,
}

impl Cadence {
    pub fn new(options: &StationOptions) -> Self {
        let slow = options.refresh_interval.max(MIN_REFRESH_INTERVAL);
        let fast = options.fast_polling_interval.max(MIN_FAST_INTERVAL);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
        let fast_rounds_max = (slow.as_secs_f64() * 2.0 / fast.as_secs_f64()) as u32;
        Self {
            slow,
            fast,
            fast_rounds_max,
            // Start outside the fast window: steady state until the
            // first mutating command.
            fast_rounds: fast_rounds_max,
        }
    }

    /// Interval to sleep after the current round of report requests.
    pub fn next_sleep(&mut self) -> Duration {
        if self.fast_rounds < self.fast_rounds_max {
            self.fast_rounds += 1;
            self.fast
        } else {
            self.slow
        }
    }

    /// A mutating command was issued: restart the fast window.
    pub fn boost(&mut self) {
        self.fast_rounds = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cadence() -> Cadence {
        Cadence::new(&StationOptions::default())
    }

    #[test]
    fn steady_state_uses_the_slow_interval() {
        let mut cadence = cadence();
        assert_eq!(cadence.next_sleep(), Duration::from_secs(5));
        assert_eq!(cadence.next_sleep(), Duration::from_secs(5));
    }

    #[test]
    fn boost_opens_a_bounded_fast_window() {
        let mut cadence = cadence();
        cadence.boost();

        // 2 * 5s / 1s = 10 fast rounds, then back to slow.
        for _ in 0..10 {
            assert_eq!(cadence.next_sleep(), Duration::from_secs(1));
        }
        assert_eq!(cadence.next_sleep(), Duration::from_secs(5));
    }

    #[test]
    fn boost_mid_window_restarts_the_count() {
        let mut cadence = cadence();
        cadence.boost();
        for _ in 0..7 {
            cadence.next_sleep();
        }

        cadence.boost();
        for _ in 0..10 {
            assert_eq!(cadence.next_sleep(), Duration::from_secs(1));
        }
        assert_eq!(cadence.next_sleep(), Duration::from_secs(5));
    }

    #[test]
    fn intervals_are_clamped_to_firmware_minimums() {
        let options = StationOptions {
            periodic_polling: true,
            refresh_interval: Duration::from_secs(1),
            fast_polling_interval: Duration::from_millis(100),
        };
        let mut cadence = Cadence::new(&options);
        assert_eq!(cadence.next_sleep(), Duration::from_secs(5));
        cadence.boost();
        assert_eq!(cadence.next_sleep(), Duration::from_secs(1));
    }
}
