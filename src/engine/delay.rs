use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::sleep;

/// Suspends the calling task for a bounded random time.
///
/// Implementations must only suspend the current task and must be safe to
/// call from many workers at once. The returned duration is the one slept.
pub trait Delay: Send + Sync {
    fn delay(&self, max: Duration) -> BoxFuture<'static, Duration>;
}

/// Sleeps for a duration drawn uniformly from `[0, max)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDelay;

impl Delay for RandomDelay {
    fn delay(&self, max: Duration) -> BoxFuture<'static, Duration> {
        let pause = sample_below(max);
        Box::pin(async move {
            sleep(pause).await;
            pause
        })
    }
}

fn sample_below(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }

    // thread-local generator, no shared state between workers
    let mut rng = rand::rng();
    Duration::from_millis(rng.random_range(0..max_ms))
}
