//! Per-resolver quality scoring, token-bucket rate governance, and
//! quarantine.

use std::time::{Duration, Instant};

use crate::bus::Priority;

/// Lower bound a resolver's score must stay above to remain eligible for
/// selection. Once it drops below this, the resolver is quarantined for
/// [`QUARANTINE_COOLDOWN`] rather than permanently banned — a flaky network
/// should not be allowed to degrade the pool to zero usable resolvers.
const QUARANTINE_THRESHOLD: f64 = 0.15;
const QUARANTINE_COOLDOWN: Duration = Duration::from_secs(30);
const SCORE_DECAY_ON_FAILURE: f64 = 0.85;
const SCORE_RECOVERY_ON_SUCCESS: f64 = 0.05;

/// Exponential moving average weight applied to each new latency sample.
const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Mutable scoring state for one upstream resolver.
pub struct ResolverScore {
    score: f64,
    avg_latency: Duration,
    quarantined_until: Option<Instant>,
}

impl Default for ResolverScore {
    fn default() -> Self {
        Self {
            score: 1.0,
            avg_latency: Duration::from_millis(50),
            quarantined_until: None,
        }
    }
}

impl ResolverScore {
    pub fn record_success(&mut self, latency: Duration) {
        self.score = (self.score + SCORE_RECOVERY_ON_SUCCESS).min(1.0);
        let prev = self.avg_latency.as_secs_f64();
        let sample = latency.as_secs_f64();
        let updated = prev + LATENCY_EWMA_ALPHA * (sample - prev);
        self.avg_latency = Duration::from_secs_f64(updated.max(0.0));
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.score *= SCORE_DECAY_ON_FAILURE;
        if self.score < QUARANTINE_THRESHOLD {
            self.quarantined_until = Some(now + QUARANTINE_COOLDOWN);
        }
    }

    pub fn is_quarantined(&self, now: Instant) -> bool {
        match self.quarantined_until {
            Some(until) if now < until => true,
            Some(_) => false,
            None => false,
        }
    }

    /// Clears an expired quarantine, if any, so the resolver becomes a
    /// selection candidate again with a reset (but not perfect) score.
    pub fn lift_expired_quarantine(&mut self, now: Instant) {
        if let Some(until) = self.quarantined_until {
            if now >= until {
                self.quarantined_until = None;
                self.score = QUARANTINE_THRESHOLD.max(0.3);
            }
        }
    }

    /// Selection weight: higher success score and lower latency both raise
    /// it. Never zero, so a recovering resolver is still selectable (with
    /// low probability) rather than starved forever.
    pub fn weight(&self) -> f64 {
        let latency_factor = 1.0 / (1.0 + self.avg_latency.as_secs_f64());
        (self.score * latency_factor).max(0.001)
    }
}

/// A simple token bucket used to rate-govern queries to one resolver.
///
/// `priority` determines starvation resistance: `Critical` always takes a
/// token even if the bucket is momentarily empty (the caller waits briefly
/// for a refill); `Low` may be rejected under pressure.
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempts to take a token immediately. Returns `true` on success.
    pub fn try_take(&mut self, priority: Priority) -> bool {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }
        // Critical never gets hard-rejected by this call; the caller
        // (ResolverPool::take_token) waits and retries instead.
        let _ = priority;
        false
    }

    /// How long until at least one token will be available.
    pub fn time_to_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_failures_quarantine_resolver() {
        let mut s = ResolverScore::default();
        let now = Instant::now();
        for _ in 0..20 {
            s.record_failure(now);
        }
        assert!(s.is_quarantined(now));
    }

    #[test]
    fn success_raises_score_back_up() {
        let mut s = ResolverScore::default();
        let now = Instant::now();
        s.record_failure(now);
        let after_failure = s.weight();
        s.record_success(Duration::from_millis(10));
        assert!(s.weight() > after_failure);
    }

    #[test]
    fn quarantine_lifts_after_cooldown() {
        let mut s = ResolverScore::default();
        let now = Instant::now();
        for _ in 0..20 {
            s.record_failure(now);
        }
        assert!(s.is_quarantined(now));
        let later = now + QUARANTINE_COOLDOWN + Duration::from_secs(1);
        s.lift_expired_quarantine(later);
        assert!(!s.is_quarantined(later));
    }

    #[test]
    fn token_bucket_exhausts_and_refills() {
        let mut bucket = TokenBucket::new(2.0, 100.0);
        assert!(bucket.try_take(Priority::Low));
        assert!(bucket.try_take(Priority::Low));
        assert!(!bucket.try_take(Priority::Low));
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_take(Priority::Low));
    }
}
