//! Background expiry of overdue validation requests

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ValidationGate;

/// Periodically expires pending requests past their deadline
///
/// Cancelling stops future sweeps only; requests already expired stay expired.
pub struct ExpirySweeper {
    gate: Arc<ValidationGate>,
    period: Duration,
    shutdown_token: CancellationToken,
}

impl ExpirySweeper {
    pub fn new(gate: Arc<ValidationGate>, period: Duration) -> Self {
        Self { gate, period, shutdown_token: CancellationToken::new() }
    }

    /// Handle that stops the sweeper when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        info!("Starting validation expiry sweeper every {:?}", self.period);
        let mut tick = interval(self.period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.gate.sweep_expired(Utc::now()) {
                        Ok(expired) if !expired.is_empty() => debug!("Sweep expired {:?}", expired),
                        Ok(_) => {}
                        // Retried on the next tick
                        Err(e) => warn!("Validation expiry sweep failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Stopping validation expiry sweeper");
                    break;
                }
            }
        }
    }
}
