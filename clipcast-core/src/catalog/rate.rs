use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;

/// Global request gate shared by every catalog fetch worker: a single-permit
/// semaphore topped up once per interval by a background ticker. Permits are
/// single-use; the bucket never holds more than one, so missed ticks or clock
/// skew cannot produce a burst.
pub struct RateGate {
    permits: Arc<Semaphore>,
}

impl RateGate {
    /// Must be called from within a runtime; the replenish ticker stops on
    /// its own once the gate is dropped.
    pub fn new(interval: Duration) -> Self {
        let permits = Arc::new(Semaphore::new(1));
        let weak = Arc::downgrade(&permits);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(permits) = weak.upgrade() else {
                    break;
                };
                if permits.available_permits() == 0 {
                    permits.add_permits(1);
                }
            }
        });
        Self { permits }
    }

    /// Waits for the next request slot and consumes it. Callers that need to
    /// bail out early should race this against their cancellation token.
    pub async fn acquire(&self) {
        // the semaphore is never closed, so acquire cannot fail
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}
