//! The push task keeps a load balancer discoverable by periodically publishing its address
//! through the configured seed [`Provider`].
//!
//! Every cycle sleeps for the configured period plus a random jitter so that a fleet of load
//! balancers booted at the same time doesn't hit the seed store in lockstep. After a failed
//! push the next cycle additionally waits `5s * consecutive_failures`. The backoff is linear and
//! deliberately has no ceiling. A successful push resets the failure counter.
//!
//! The task never terminates; it is spawned detached and lives as long as the process.
use std::{sync::Arc, time::Duration};

use rand::Rng;
use tracing::{event, instrument, Level};

use crate::{error::Result, resolver::IpResolver, seed::Provider};

/// Added to the next cycle's sleep once per consecutive failure
pub const BACKOFF_STEP: Duration = Duration::from_secs(5);

pub struct PushTask {
    provider: Arc<dyn Provider>,
    resolver: Arc<dyn IpResolver>,
    port: String,
    period: Duration,
    max_jitter: Duration,
    consecutive_failures: u32,
}

impl std::fmt::Debug for PushTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTask")
            .field("port", &self.port)
            .field("period", &self.period)
            .field("max_jitter", &self.max_jitter)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

#[derive(Debug, PartialEq)]
pub enum PushResult {
    Success,
    Failure,
}

impl PushTask {
    pub fn new(
        provider: Arc<dyn Provider>,
        resolver: Arc<dyn IpResolver>,
        port: impl Into<String>,
        period: Duration,
        max_jitter: Duration,
    ) -> Self {
        Self {
            provider,
            resolver,
            port: port.into(),
            period,
            max_jitter,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Backoff owed because of previous failures
    pub fn backoff(&self) -> Duration {
        BACKOFF_STEP * self.consecutive_failures
    }

    /// Uniformly random jitter in `[0, max_jitter)`
    pub fn random_jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }

        let max_ms = self.max_jitter.as_millis().max(1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }

    /// Total sleep before the next push: backoff, then the fixed period, then `jitter`.
    pub fn cycle_delay(&self, jitter: Duration) -> Duration {
        self.backoff() + self.period + jitter
    }

    /// Runs a single push and updates the failure counter.
    pub async fn do_push(&mut self) -> PushResult {
        match self.push().await {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    event!(
                        Level::INFO,
                        "seed push recovered after {} failure(s)",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                PushResult::Success
            }
            Err(err) => {
                self.consecutive_failures += 1;
                event!(
                    Level::WARN,
                    "failed to push seed ({} consecutive failure(s)): {}",
                    self.consecutive_failures,
                    err
                );
                PushResult::Failure
            }
        }
    }

    async fn push(&self) -> Result<()> {
        self.provider
            .push_seed(self.resolver.as_ref(), &self.port)
            .await
    }

    #[instrument(level = "debug")]
    pub async fn run(mut self) {
        loop {
            let delay = self.cycle_delay(self.random_jitter());
            event!(Level::DEBUG, "next seed push in {:?}", delay);
            tokio::time::sleep(delay).await;
            self.do_push().await;
        }
    }
}

/// Spawns the push loop detached from the caller.
pub fn start_push_task(task: PushTask) -> tokio::task::JoinHandle<()> {
    tokio::spawn(task.run())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{start_push_task, PushResult, PushTask, BACKOFF_STEP};
    use crate::{
        resolver::FixedIpResolver,
        seed::{
            mock::{MockProvider, MockProviderBuilder},
            Provider, Seed,
        },
        test_utils::fault::When,
    };

    fn task(provider: Arc<MockProvider>, max_jitter: Duration) -> PushTask {
        PushTask::new(
            provider,
            Arc::new(FixedIpResolver::new("10.0.0.7")),
            "9999",
            Duration::from_secs(30),
            max_jitter,
        )
    }

    #[tokio::test]
    async fn success_publishes_and_keeps_base_delay() {
        let provider = Arc::new(MockProviderBuilder::new().build());
        let mut task = task(provider.clone(), Duration::ZERO);

        assert_eq!(task.do_push().await, PushResult::Success);
        assert_eq!(task.consecutive_failures(), 0);
        assert_eq!(task.cycle_delay(Duration::ZERO), Duration::from_secs(30));
        assert_eq!(
            provider.fetch_seed().await.unwrap().seeds,
            vec![Seed::new("10.0.0.7", "9999")]
        );
    }

    #[tokio::test]
    async fn failures_grow_the_delay_linearly_and_success_resets() {
        let provider = Arc::new(
            MockProviderBuilder::new()
                .with_push_fault(When::FirstCalls(3))
                .build(),
        );
        let mut task = task(provider.clone(), Duration::ZERO);
        let base = task.cycle_delay(Duration::ZERO);

        for failures in 1..=3u32 {
            assert_eq!(task.do_push().await, PushResult::Failure);
            assert_eq!(task.consecutive_failures(), failures);
            assert_eq!(
                task.cycle_delay(Duration::ZERO),
                base + BACKOFF_STEP * failures
            );
        }

        assert_eq!(task.do_push().await, PushResult::Success);
        assert_eq!(task.consecutive_failures(), 0);
        assert_eq!(task.cycle_delay(Duration::ZERO), base);
        assert_eq!(provider.stats.push.calls(), 4);
    }

    #[tokio::test]
    async fn backoff_has_no_ceiling() {
        let provider = Arc::new(
            MockProviderBuilder::new()
                .with_push_fault(When::Always)
                .build(),
        );
        let mut task = task(provider, Duration::ZERO);
        for _ in 0..100 {
            task.do_push().await;
        }

        assert_eq!(task.backoff(), Duration::from_secs(500));
    }

    #[test]
    fn jitter_is_bounded() {
        let provider = Arc::new(MockProviderBuilder::new().build());
        let max_jitter = Duration::from_millis(250);
        let task = task(provider.clone(), max_jitter);
        for _ in 0..1000 {
            assert!(task.random_jitter() < max_jitter);
        }

        let no_jitter = super::PushTask::new(
            provider,
            Arc::new(FixedIpResolver::new("10.0.0.7")),
            "9999",
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(no_jitter.random_jitter(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_loop_keeps_pushing() {
        let provider = Arc::new(
            MockProviderBuilder::new()
                .with_push_fault(When::FirstCalls(1))
                .build(),
        );
        let handle = start_push_task(task(provider.clone(), Duration::ZERO));

        // first push after 30s fails, the second one waits 5s + 30s
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(provider.stats.push.calls(), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.stats.push.calls(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(provider.stats.push.calls(), 2);

        handle.abort();
    }
}
