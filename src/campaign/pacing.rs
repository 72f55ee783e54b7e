//! Human-pacing controls. Pure state, no DOM access; call sites opt in.

use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Max sends admitted inside any sliding one-hour window.
    pub hourly_cap: usize,
    /// Probability of an occasional long pause between contacts.
    pub long_pause_chance: f64,
    pub long_pause_min_secs: u64,
    pub long_pause_max_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            hourly_cap: 30,
            long_pause_chance: 0.05,
            long_pause_min_secs: 20,
            long_pause_max_secs: 120,
        }
    }
}

#[derive(Debug)]
pub struct PacingPolicy {
    config: PacingConfig,
    sent_at: VecDeque<Instant>,
}

impl PacingPolicy {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            sent_at: VecDeque::new(),
        }
    }

    /// Uniform random whole-second delay in `[min, max]`.
    pub fn random_delay(&self, min_secs: u64, max_secs: u64) -> Duration {
        let (lo, hi) = if min_secs <= max_secs {
            (min_secs, max_secs)
        } else {
            (max_secs, min_secs)
        };
        let mut rng = rand::rng();
        Duration::from_secs(rng.random_range(lo..=hi))
    }

    /// Whether another send is admitted right now. A `false` answer means
    /// "do not send"; enforcement is the caller's job.
    pub fn check_rate_limit(&mut self) -> bool {
        self.check_rate_limit_at(Instant::now())
    }

    pub fn record_sent(&mut self) {
        self.record_sent_at(Instant::now());
    }

    /// Occasionally produce a long pause to break up the send cadence.
    pub fn maybe_long_pause(&self) -> Option<Duration> {
        let mut rng = rand::rng();
        if !rng.random_bool(self.config.long_pause_chance.clamp(0.0, 1.0)) {
            return None;
        }
        let secs = rng.random_range(self.config.long_pause_min_secs..=self.config.long_pause_max_secs);
        Some(Duration::from_secs(secs))
    }

    pub fn sends_in_window(&mut self) -> usize {
        self.prune(Instant::now());
        self.sent_at.len()
    }

    fn check_rate_limit_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.sent_at.len() < self.config.hourly_cap
    }

    fn record_sent_at(&mut self, now: Instant) {
        self.prune(now);
        self.sent_at.push_back(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.sent_at.front() {
            if now.duration_since(*front) > WINDOW {
                self.sent_at.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(cap: usize) -> PacingPolicy {
        PacingPolicy::new(PacingConfig {
            hourly_cap: cap,
            ..PacingConfig::default()
        })
    }

    #[test]
    fn rate_limit_closes_at_cap() {
        let mut p = policy(3);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(p.check_rate_limit_at(t0));
            p.record_sent_at(t0);
        }
        assert!(!p.check_rate_limit_at(t0));
    }

    #[test]
    fn rate_limit_reopens_after_window_passes() {
        let mut p = policy(2);
        let t0 = Instant::now();
        p.record_sent_at(t0);
        p.record_sent_at(t0);
        assert!(!p.check_rate_limit_at(t0));
        assert!(p.check_rate_limit_at(t0 + WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn window_prunes_only_expired_entries() {
        let mut p = policy(2);
        let t0 = Instant::now();
        p.record_sent_at(t0);
        p.record_sent_at(t0 + Duration::from_secs(1800));
        // At t0+1h+1s the first send fell out, the second is still counted.
        let later = t0 + WINDOW + Duration::from_secs(1);
        assert!(p.check_rate_limit_at(later));
        p.record_sent_at(later);
        assert!(!p.check_rate_limit_at(later));
    }

    #[test]
    fn random_delay_stays_in_range_and_tolerates_swapped_bounds() {
        let p = policy(1);
        for _ in 0..50 {
            let d = p.random_delay(2, 5).as_secs();
            assert!((2..=5).contains(&d));
        }
        assert_eq!(p.random_delay(4, 4).as_secs(), 4);
        let d = p.random_delay(9, 3).as_secs();
        assert!((3..=9).contains(&d));
    }

    #[test]
    fn long_pause_respects_probability_extremes() {
        let never = PacingPolicy::new(PacingConfig {
            long_pause_chance: 0.0,
            ..PacingConfig::default()
        });
        assert!(never.maybe_long_pause().is_none());

        let always = PacingPolicy::new(PacingConfig {
            long_pause_chance: 1.0,
            long_pause_min_secs: 20,
            long_pause_max_secs: 120,
            ..PacingConfig::default()
        });
        let pause = always.maybe_long_pause().unwrap().as_secs();
        assert!((20..=120).contains(&pause));
    }
}
