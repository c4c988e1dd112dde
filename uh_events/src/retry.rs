//! ABOUTME: Retry logic with capped exponential backoff for event publishing
//! ABOUTME: Wraps any publisher and retries only when the broker is unavailable

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::publisher::{PublishError, Publisher};
use crate::Event;

/// Simple retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Retry wrapper for publishers
#[derive(Debug)]
pub struct RetryPublisher<P: Publisher> {
    inner: P,
    config: RetryConfig,
}

impl<P: Publisher> RetryPublisher<P> {
    pub fn new(inner: P) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    pub fn with_config(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: Publisher> Publisher for RetryPublisher<P> {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let mut attempt = 0;

        loop {
            match self.inner.publish(event).await {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(
                            publisher = self.inner.name(),
                            attempt = attempt + 1,
                            "Event published after retry"
                        );
                    }
                    return Ok(());
                }
                // Serialization failures will not get better on retry
                Err(e @ PublishError::Serialization(_)) => return Err(e),
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        warn!(
                            publisher = self.inner.name(),
                            attempts = attempt + 1,
                            error = %e,
                            "Event publish failed after all retry attempts"
                        );
                        return Err(e);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(
                        publisher = self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Event publish failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error a fixed number of times, then succeeds
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        serialization: bool,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                serialization: false,
            }
        }
    }

    #[async_trait]
    impl Publisher for Flaky {
        async fn publish(&self, _event: &Event) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.serialization {
                    let err = serde_json::from_str::<Event>("{").unwrap_err();
                    return Err(PublishError::Serialization(err));
                }
                return Err(PublishError::BrokerUnavailable("down".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        }
    }

    #[test]
    fn delay_is_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 300,
            multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn recovers_from_unavailable_broker() {
        let publisher = RetryPublisher::with_config(Flaky::new(2), fast_config(2));
        publisher
            .publish(&Event::user_created("Al", "al@x.com"))
            .await
            .unwrap();
        assert_eq!(publisher.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let publisher = RetryPublisher::with_config(Flaky::new(10), fast_config(2));
        let err = publisher
            .publish(&Event::user_created("Al", "al@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::BrokerUnavailable(_)));
        assert_eq!(publisher.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn serialization_errors_are_not_retried() {
        let mut flaky = Flaky::new(10);
        flaky.serialization = true;
        let publisher = RetryPublisher::with_config(flaky, fast_config(5));

        let err = publisher
            .publish(&Event::user_created("Al", "al@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Serialization(_)));
        assert_eq!(publisher.inner().calls.load(Ordering::SeqCst), 1);
    }
}
