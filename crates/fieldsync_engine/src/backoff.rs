//! Exponential backoff between failed sync runs.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule for consecutive failed runs.
///
/// The delay doubles per failure from `base` up to `cap`, then gets
/// up to `jitter_pct` of random spread in either direction so a fleet
/// of devices recovering from the same outage does not retry in
/// lockstep. Rate-limit responses use [`BackoffPolicy::extended_delay`],
/// which raises the cap by `extended_cap_multiplier`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Ceiling for the uncapped exponential.
    pub cap: Duration,
    /// Cap multiplier applied when the server rate-limits us.
    pub extended_cap_multiplier: u32,
    /// Jitter spread as a fraction of the capped delay.
    pub jitter_pct: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(15 * 60),
            extended_cap_multiplier: 4,
            jitter_pct: 0.10,
        }
    }
}

impl BackoffPolicy {
    /// Returns the jittered delay after `failures` consecutive failed
    /// runs. Zero failures means no delay.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_jitter(failures, unit)
    }

    /// Like [`BackoffPolicy::delay`] but with the raised rate-limit cap.
    #[must_use]
    pub fn extended_delay(&self, failures: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        let cap = self.cap * self.extended_cap_multiplier.max(1);
        jittered(raw_delay(self.base, cap, failures), self.jitter_pct, unit)
    }

    /// Deterministic variant: `unit` in `[-1, 1]` selects the jitter.
    #[must_use]
    pub fn delay_with_jitter(&self, failures: u32, unit: f64) -> Duration {
        jittered(raw_delay(self.base, self.cap, failures), self.jitter_pct, unit)
    }

    /// The capped delay before jitter.
    #[must_use]
    pub fn raw_delay(&self, failures: u32) -> Duration {
        raw_delay(self.base, self.cap, failures)
    }
}

fn raw_delay(base: Duration, cap: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exponent = (failures - 1).min(62);
    let secs = base
        .as_secs()
        .saturating_mul(1u64 << exponent)
        .min(cap.as_secs());
    Duration::from_secs(secs)
}

fn jittered(delay: Duration, jitter_pct: f64, unit: f64) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = 1.0 + jitter_pct * unit.clamp(-1.0, 1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
