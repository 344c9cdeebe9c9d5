// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

use tracing::debug;

/// Fixed-step clock: reports how many simulation steps are due since the
/// last poll. Rendering runs every tick, simulation only when a step is due.
#[derive(Debug)]
pub struct TickClock {
    step: Duration,
    last: Instant,
    accumulated: Duration,
    max_steps: u32,
}

impl TickClock {
    pub fn new(step: Duration) -> Self {
        Self::starting_at(step, Instant::now())
    }

    pub fn starting_at(step: Duration, now: Instant) -> Self {
        Self {
            step: step.max(Duration::from_millis(1)),
            last: now,
            accumulated: Duration::ZERO,
            max_steps: 8,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Steps due at `now`. Caps the catch-up after a long stall (window
    /// drag, minimise) so the simulation does not spiral.
    pub fn due_steps(&mut self, now: Instant) -> u32 {
        self.accumulated += now.saturating_duration_since(self.last);
        self.last = now;

        let mut steps = 0;
        while self.accumulated >= self.step && steps < self.max_steps {
            self.accumulated -= self.step;
            steps += 1;
        }
        if steps == self.max_steps {
            debug!(
                dropped_ms = self.accumulated.as_millis() as u64,
                "tick catch-up capped at {} steps", self.max_steps
            );
            self.accumulated = Duration::ZERO;
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_steps_before_one_period() {
        let t0 = Instant::now();
        let mut clock = TickClock::starting_at(Duration::from_millis(16), t0);
        assert_eq!(clock.due_steps(t0 + Duration::from_millis(10)), 0);
        assert_eq!(clock.due_steps(t0 + Duration::from_millis(17)), 1);
    }

    #[test]
    fn remainder_carries_over() {
        let t0 = Instant::now();
        let mut clock = TickClock::starting_at(Duration::from_millis(16), t0);
        assert_eq!(clock.due_steps(t0 + Duration::from_millis(40)), 2);
        // 8ms carried, 8ms more makes a third step
        assert_eq!(clock.due_steps(t0 + Duration::from_millis(48)), 1);
    }

    #[test]
    fn long_stall_is_capped() {
        let t0 = Instant::now();
        let mut clock = TickClock::starting_at(Duration::from_millis(16), t0);
        assert_eq!(clock.due_steps(t0 + Duration::from_secs(5)), 8);
        assert_eq!(clock.due_steps(t0 + Duration::from_secs(5)), 0);
    }
}
