use std::time::Duration;

/// Courtesy pauses between requests.
pub trait DelayPolicy: Send + Sync {
    /// After an image was accepted.
    fn after_image(&self) -> Duration;
    /// After a page was processed.
    fn after_page(&self) -> Duration;
    /// After the `consecutive`-th failed page in a row.
    fn after_failure(&self, consecutive: u32) -> Duration;
}

/// Randomized delays: 0.5-1s per image, 1-2s per page, 3-5s per failure growing with repeated failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDelay;

const MAX_FAILURE_DELAY_MS: u64 = 30_000;

fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(fastrand::u64(min_ms..=max_ms))
}

impl DelayPolicy for RandomDelay {
    fn after_image(&self) -> Duration {
        jitter(500, 1_000)
    }

    fn after_page(&self) -> Duration {
        jitter(1_000, 2_000)
    }

    fn after_failure(&self, consecutive: u32) -> Duration {
        jitter(3_000, 5_000)
            .saturating_mul(consecutive.clamp(1, 6))
            .min(Duration::from_millis(MAX_FAILURE_DELAY_MS))
    }
}

/// No waiting at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayPolicy for NoDelay {
    fn after_image(&self) -> Duration {
        Duration::ZERO
    }

    fn after_page(&self) -> Duration {
        Duration::ZERO
    }

    fn after_failure(&self, _consecutive: u32) -> Duration {
        Duration::ZERO
    }
}
