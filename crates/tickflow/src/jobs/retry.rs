use rand::Rng;

/// Upper bound of the jitter window, in milliseconds.
pub const MAX_JITTER_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: None,
        }
    }
}

impl BackoffConfig {
    pub fn new(base_ms: u64, max_ms: Option<u64>) -> Self {
        Self { base_ms, max_ms }
    }
}

/// Delay before retry number `attempt_no` (1-indexed).
///
/// `base * 2^(attempt_no-1)` plus a uniform jitter in `[0, min(raw, 500))`,
/// then capped at `max_ms` when one is configured.
pub fn next_delay_ms(attempt_no: u32, cfg: &BackoffConfig, rng: &mut impl Rng) -> u64 {
    let exp = attempt_no.max(1) - 1;

    // 2^exp; past 63 the multiplier is huge anyway, let saturation and the cap handle it
    let pow2 = 1_u64.checked_shl(exp).unwrap_or(u64::MAX);
    let raw = cfg.base_ms.saturating_mul(pow2);

    let window = raw.min(MAX_JITTER_MS);
    let jitter = if window == 0 {
        0
    } else {
        rng.gen_range(0..window)
    };

    let delay = raw.saturating_add(jitter);
    match cfg.max_ms {
        Some(max) => delay.min(max),
        None => delay,
    }
}
