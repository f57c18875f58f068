//! Polling and backoff schedules.
//!
//! Every wait in the pipeline is driven by one of these two shapes: a bounded
//! poll (fixed attempt count, jittered interval) or an escalating backoff
//! ladder consumed step by step until it runs dry.

use std::time::Duration;

use rand::Rng;

/// Bounded polling budget with a jittered interval.
#[derive(Debug, Clone)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
    variance_pct: f64,
}

impl PollBudget {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            variance_pct: 0.25,
        }
    }

    /// Short read-back poll used after a checkbox click.
    pub fn token_check() -> Self {
        Self::new(5, Duration::from_millis(600))
    }

    /// Longer window used while waiting on an audio answer verification.
    pub fn audio_verification() -> Self {
        Self::new(20, Duration::from_millis(1500))
    }

    pub fn with_variance(mut self, variance_pct: f64) -> Self {
        self.variance_pct = variance_pct.clamp(0.0, 1.0);
        self
    }

    /// Interval with jitter applied, never below half the base interval.
    pub fn jittered_interval(&self) -> Duration {
        if self.interval.is_zero() || self.variance_pct == 0.0 {
            return self.interval;
        }
        let base = self.interval.as_secs_f64();
        let variance = base * self.variance_pct;
        let jitter = rand::thread_rng().gen_range(-variance..=variance);
        Duration::from_secs_f64((base + jitter).max(base / 2.0))
    }

    /// Upper bound of the whole poll, used for budget accounting.
    pub fn worst_case(&self) -> Duration {
        self.interval
            .saturating_mul(self.attempts)
            .mul_f64(1.0 + self.variance_pct)
    }
}

/// Escalating wait ladder consumed once per passive retry.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
    cursor: usize,
}

impl BackoffSchedule {
    pub fn new(steps: Vec<Duration>) -> Self {
        Self { steps, cursor: 0 }
    }

    /// The passive wait-for-automatic-resolution ladder.
    pub fn passive_wait() -> Self {
        Self::new(
            [1, 2, 3, 5, 10, 15, 20]
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        )
    }

    /// Short escalating waits between audio-switch retries.
    pub fn audio_switch() -> Self {
        Self::new(
            [1, 2, 4]
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        )
    }

    /// Next wait, or `None` once the ladder is exhausted.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let wait = self.steps.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(wait)
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passive_ladder_escalates_and_runs_dry() {
        let mut schedule = BackoffSchedule::passive_wait();
        let mut waits = Vec::new();
        while let Some(wait) = schedule.next_wait() {
            waits.push(wait.as_secs());
        }
        assert_eq!(waits, vec![1, 2, 3, 5, 10, 15, 20]);
        assert!(schedule.is_exhausted());
        assert_eq!(schedule.next_wait(), None);
    }

    #[test]
    fn reset_rewinds_the_ladder() {
        let mut schedule = BackoffSchedule::new(vec![Duration::from_secs(1)]);
        assert!(schedule.next_wait().is_some());
        assert!(schedule.is_exhausted());
        schedule.reset();
        assert_eq!(schedule.remaining(), 1);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let budget = PollBudget::new(5, Duration::from_millis(1000));
        for _ in 0..50 {
            let interval = budget.jittered_interval();
            assert!(interval >= Duration::from_millis(500));
            assert!(interval <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn zero_variance_is_deterministic() {
        let budget = PollBudget::new(3, Duration::from_millis(200)).with_variance(0.0);
        assert_eq!(budget.jittered_interval(), Duration::from_millis(200));
    }
}
