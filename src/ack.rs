//! Acknowledgment delivery with bounded retries.

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sync_model::BatchAck;
use tracing::{info, warn};

/// Transport capability for delivering one acknowledgment to the batch
/// sender. The HTTP implementation lives with the transport layer.
#[async_trait]
pub trait AckTransport: Send + Sync {
    async fn send(&self, ack: &BatchAck) -> anyhow::Result<()>;
}

/// Delivers acks, retrying a configured number of times with a fixed
/// delay before giving up.
pub struct AckSender {
    transport: Arc<dyn AckTransport>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl AckSender {
    pub fn new(transport: Arc<dyn AckTransport>) -> Self {
        Self {
            transport,
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set the attempt budget (builder style).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the delay between attempts (builder style).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Send one ack, retrying transient failures.
    pub async fn send(&self, ack: &BatchAck) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(ack).await {
                Ok(()) => {
                    info!(batch_id = ack.batch_id, ok = ack.ok, attempt, "acknowledgment sent");
                    return Ok(());
                }
                Err(error) if attempt < self.max_attempts => {
                    warn!(
                        batch_id = ack.batch_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        "acknowledgment send failed, will retry: {error:#}"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(error) => {
                    return Err(error).with_context(|| {
                        format!(
                            "sending acknowledgment for batch {} failed after {} attempts",
                            ack.batch_id, attempt
                        )
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use sync_model::BatchStats;

    struct FlakyTransport {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl AckTransport for FlakyTransport {
        async fn send(&self, _ack: &BatchAck) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                anyhow::bail!("connection refused")
            }
        }
    }

    fn ack() -> BatchAck {
        BatchAck::ok(1, "node", BatchStats::default())
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let sender = AckSender::new(transport.clone())
            .with_max_attempts(5)
            .with_retry_delay(Duration::from_millis(1));
        sender.send(&ack()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        });
        let sender = AckSender::new(transport.clone())
            .with_max_attempts(2)
            .with_retry_delay(Duration::from_millis(1));
        assert!(sender.send(&ack()).await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
