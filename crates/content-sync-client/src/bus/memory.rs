use async_trait::async_trait;
use content_sync_core::{SignalEnvelope, SignalTransport, StoreError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// In-process transport for contexts sharing one runtime.
///
/// Clones share the same channel. Slow listeners that fall behind by more
/// than the capacity lose the oldest envelopes.
#[derive(Clone)]
pub struct MemoryTransport {
    sender: broadcast::Sender<SignalEnvelope>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalTransport for MemoryTransport {
    fn transport_name(&self) -> &'static str {
        "memory"
    }

    async fn broadcast(&self, envelope: &SignalEnvelope) -> Result<(), StoreError> {
        if self.sender.send(envelope.clone()).is_err() {
            debug!("No listeners for signal {}", envelope.nonce);
        }
        Ok(())
    }

    fn listen(&self) -> Result<mpsc::Receiver<SignalEnvelope>, StoreError> {
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(DEFAULT_CAPACITY);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Signal listener lagged, {} signals dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
