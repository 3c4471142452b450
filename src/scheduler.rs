//! Single-slot timers used by the engine loop.
//!
//! Both the restart debounce and the stderr flush window need "fire once after
//! the most recent poke". [`SingleSlotTimer`] holds at most one pending
//! deadline; arming it again replaces the old one.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Deadline used when `now + delay` does not fit in an [`Instant`]; about 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Handle for one scheduled firing. Replaced wholesale on every re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartToken {
    deadline: Instant,
    sequence: u64,
}

impl RestartToken {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[derive(Debug, Default)]
pub struct SingleSlotTimer {
    pending: Option<RestartToken>,
    armed: u64,
}

impl SingleSlotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending firing and schedule a new one `delay` from now.
    ///
    /// A delay too large to represent is clamped to [`FAR_FUTURE`].
    pub fn arm(&mut self, delay: Duration) -> RestartToken {
        self.armed += 1;
        let now = Instant::now();
        let deadline = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        let token = RestartToken {
            deadline,
            sequence: self.armed,
        };
        self.pending = Some(token);
        token
    }

    pub fn cancel(&mut self) -> Option<RestartToken> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<RestartToken> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolve when the pending deadline passes, consuming the token.
    ///
    /// Never resolves while nothing is pending. Cancel-safe: dropping the
    /// future before it completes leaves the token in place.
    pub async fn fired(&mut self) -> RestartToken {
        let Some(token) = self.pending else {
            return std::future::pending().await;
        };
        sleep_until(token.deadline).await;
        self.pending = None;
        token
    }
}

/// Trailing-edge debounce for restarts.
///
/// Every [`schedule`](Self::schedule) pushes the firing out to `delay` after
/// the latest call. The firing is observed by awaiting [`due`](Self::due) from
/// the engine loop, so even a zero delay runs on a later loop turn, never inline.
#[derive(Debug)]
pub struct RestartScheduler {
    delay: Duration,
    timer: SingleSlotTimer,
}

impl RestartScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: SingleSlotTimer::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self) -> RestartToken {
        let token = self.timer.arm(self.delay);
        tracing::trace!(sequence = token.sequence(), "restart scheduled");
        token
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn cancel(&mut self) -> Option<RestartToken> {
        self.timer.cancel()
    }

    pub async fn due(&mut self) -> RestartToken {
        self.timer.fired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_firing() {
        let mut scheduler = RestartScheduler::new(Duration::from_millis(200));

        for _ in 0..5 {
            scheduler.schedule();
            advance(Duration::from_millis(50)).await;
        }
        let last = scheduler.timer.pending().unwrap();
        assert_eq!(last.sequence(), 5);

        // 50ms have passed since the last call; 150ms remain.
        assert!(timeout(Duration::from_millis(149), scheduler.due()).await.is_err());
        let fired = scheduler.due().await;
        assert_eq!(fired, last);
        assert!(!scheduler.is_pending());

        // Nothing else was left pending.
        assert!(timeout(Duration::from_secs(5), scheduler.due()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_delay_after_most_recent_call() {
        let mut scheduler = RestartScheduler::new(Duration::from_millis(200));
        scheduler.schedule();
        advance(Duration::from_millis(150)).await;
        scheduler.schedule();
        let rescheduled_at = Instant::now();

        scheduler.due().await;
        assert!(Instant::now() - rescheduled_at >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_is_still_deferred() {
        let mut scheduler = RestartScheduler::new(Duration::ZERO);
        scheduler.schedule();
        assert!(scheduler.is_pending());
        scheduler.due().await;
        assert!(!scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_firing() {
        let mut scheduler = RestartScheduler::new(Duration::from_millis(10));
        scheduler.schedule();
        assert!(scheduler.cancel().is_some());
        assert!(timeout(Duration::from_secs(1), scheduler.due()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_is_clamped_not_overflowed() {
        let delay = crate::config::WatcherConfig::try_from(crate::config::WatcherOptions {
            restart_delay: 1e22,
            cwd: Some(std::path::PathBuf::from("/work")),
            ..crate::config::WatcherOptions::default()
        })
        .unwrap()
        .restart_delay();

        let mut scheduler = RestartScheduler::new(delay);
        let token = scheduler.schedule();
        assert!(token.deadline >= Instant::now() + FAR_FUTURE);
        assert!(timeout(Duration::from_secs(3600), scheduler.due()).await.is_err());
        assert!(scheduler.is_pending());

        let mut timer = SingleSlotTimer::new();
        timer.arm(Duration::MAX);
        assert!(timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_keeps_token() {
        let mut timer = SingleSlotTimer::new();
        timer.arm(Duration::from_millis(100));
        assert!(timeout(Duration::from_millis(10), timer.fired()).await.is_err());
        assert!(timer.is_pending());
        timer.fired().await;
        assert!(!timer.is_pending());
    }
}
