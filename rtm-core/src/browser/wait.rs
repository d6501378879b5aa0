use std::time::Duration;

use tokio::time::{sleep, Instant};

/// A bounded wait: polling loops check `expired` between attempts and pause for
/// a fixed interval. Every UI wait in the extraction agent goes through one of
/// these; there are no unconditional sleeps without an upper bound.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    interval: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
            interval,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub async fn pause(&self) {
        sleep(self.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_after_timeout() {
        let deadline = Deadline::new(Duration::from_secs(2), Duration::from_millis(100));
        assert!(!deadline.expired());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(deadline.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_advances_by_interval() {
        let deadline = Deadline::new(Duration::from_secs(1), Duration::from_millis(250));
        let before = Instant::now();
        deadline.pause().await;
        assert_eq!(Instant::now() - before, Duration::from_millis(250));
    }
}
