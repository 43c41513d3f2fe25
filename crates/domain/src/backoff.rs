//! Capped exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Returns `base * 2^attempt`, capped at `max`. Attempts of 63 or more return
/// `max` without computing the product.
pub fn exponential_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt >= 63 {
        return max;
    }

    let wait = base.as_nanos().saturating_mul(1u128 << attempt);
    if wait >= max.as_nanos() {
        return max;
    }

    // wait < max, so the whole seconds fit in a u64.
    Duration::new((wait / NANOS_PER_SEC) as u64, (wait % NANOS_PER_SEC) as u32)
}

/// Uniformly samples `[base, exponential_backoff(attempt, base, max)]`.
pub fn jittered_exponential_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    jittered_exponential_backoff_with(&mut rand::thread_rng(), attempt, base, max)
}

/// Same as [`jittered_exponential_backoff`] with a caller-supplied RNG. When
/// `max < base` the capped value is returned as-is.
pub fn jittered_exponential_backoff_with<R>(
    rng: &mut R,
    attempt: u32,
    base: Duration,
    max: Duration,
) -> Duration
where
    R: Rng + ?Sized,
{
    let ceiling = exponential_backoff(attempt, base, max);
    if ceiling <= base {
        return ceiling;
    }
    rng.gen_range(base..=ceiling)
}
