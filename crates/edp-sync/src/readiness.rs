//! Bounded wait for a source driver to become ready.

use std::time::Duration;

use crate::driver::{CliDriver, SyncError, TaskLogger};

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(90);

/// Polls `driver.ready()` every 10 s for up to 90 s, logging a warning each
/// tick. Fails fast if the driver is closed while we wait.
pub async fn wait_readiness(
    driver: &dyn CliDriver,
    task_logger: &dyn TaskLogger,
) -> Result<(), SyncError> {
    if driver.ready().await.unwrap_or(false) {
        return Ok(());
    }

    let mut waited = Duration::ZERO;
    while waited < READINESS_TIMEOUT {
        if driver.is_closed() {
            return Err(SyncError::DriverClosed {
                driver_type: driver.driver_type().to_string(),
            });
        }

        if driver.ready().await.unwrap_or(false) {
            return Ok(());
        }

        task_logger.warn("waiting for source driver being ready..");
        tokio::time::sleep(POLL_INTERVAL).await;
        waited += POLL_INTERVAL;
    }

    if driver.ready().await.unwrap_or(false) {
        Ok(())
    } else {
        Err(SyncError::NotReady {
            driver_type: driver.driver_type().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    use edp_core::stream::CliDataConsumer;

    use crate::driver::CliTaskCloser;

    struct PollDriver {
        ready_after_polls: usize,
        polls: AtomicUsize,
        closed: AtomicBool,
    }

    impl PollDriver {
        fn new(ready_after_polls: usize) -> PollDriver {
            PollDriver {
                ready_after_polls,
                polls: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CliDriver for PollDriver {
        fn driver_type(&self) -> &str {
            "poll"
        }
        fn tap(&self) -> &str {
            "source-poll"
        }
        fn table_name_prefix(&self) -> &str {
            ""
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
        async fn ready(&self) -> anyhow::Result<bool> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(polls > self.ready_after_polls)
        }
        async fn load(
            &self,
            _state: Option<Value>,
            _task_logger: Arc<dyn TaskLogger>,
            _data_consumer: Arc<dyn CliDataConsumer>,
            _task_closer: Arc<dyn CliTaskCloser>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingLogger {
        warns: AtomicUsize,
    }

    impl TaskLogger for CountingLogger {
        fn debug(&self, _message: &str) {}
        fn info(&self, _message: &str) {}
        fn warn(&self, _message: &str) {
            self.warns.fetch_add(1, Ordering::SeqCst);
        }
        fn error(&self, _message: &str) {}
    }

    #[tokio::test(start_paused = true)]
    async fn ready_driver_returns_immediately() {
        let driver = PollDriver::new(0);
        let logger = CountingLogger::default();

        wait_readiness(&driver, &logger).await.unwrap();
        assert_eq!(logger.warns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_ready_after_a_few_polls() {
        let driver = PollDriver::new(3);
        let logger = CountingLogger::default();

        wait_readiness(&driver, &logger).await.unwrap();
        assert!(logger.warns.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out_with_not_ready() {
        let driver = PollDriver::new(usize::MAX);
        let logger = CountingLogger::default();

        let err = wait_readiness(&driver, &logger).await.unwrap_err();
        assert!(matches!(err, SyncError::NotReady { .. }));
        // one warning per 10 s tick inside the 90 s window
        assert_eq!(logger.warns.load(Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_driver_fails_fast() {
        let driver = PollDriver::new(usize::MAX);
        driver.closed.store(true, Ordering::SeqCst);
        let logger = CountingLogger::default();

        let err = wait_readiness(&driver, &logger).await.unwrap_err();
        assert!(matches!(err, SyncError::DriverClosed { .. }));
        assert_eq!(logger.warns.load(Ordering::SeqCst), 0);
    }
}
