//! Sends planned batches to every destination.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::relay::plan::Batch;

/// A configured destination channel ID.
pub type DestinationId = u64;

/// A live destination that accepts sends.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> String;

    /// Send one batch. The batch is shared with other destinations and must
    /// not be consumed.
    async fn send(&self, batch: &Batch) -> RelayResult<()>;
}

/// Resolves destination IDs to live sinks at dispatch time.
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    async fn resolve(&self, id: DestinationId) -> RelayResult<Arc<dyn Destination>>;
}

/// Outcome for one destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationOutcome {
    pub destination: DestinationId,
    pub resolved: bool,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<DestinationOutcome>,
}

impl DispatchReport {
    pub fn resolved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.resolved).count()
    }

    pub fn sent(&self) -> usize {
        self.outcomes.iter().map(|o| o.sent).sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.failed).sum()
    }
}

async fn send_with_timeout(
    destination: &dyn Destination,
    id: DestinationId,
    batch: &Batch,
    send_timeout: Duration,
) -> RelayResult<()> {
    match tokio::time::timeout(send_timeout, destination.send(batch)).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::send(
            id,
            format!("timed out after {}ms", send_timeout.as_millis()),
        )),
    }
}

async fn dispatch_one(
    resolver: &dyn DestinationResolver,
    id: DestinationId,
    batches: &[Batch],
    send_timeout: Duration,
) -> DestinationOutcome {
    let mut outcome = DestinationOutcome {
        destination: id,
        ..Default::default()
    };

    let destination = match resolver.resolve(id).await {
        Ok(destination) => destination,
        Err(e) => {
            warn!(error = %e, "Skipping destination");
            return outcome;
        }
    };
    outcome.resolved = true;

    for (index, batch) in batches.iter().enumerate() {
        match send_with_timeout(destination.as_ref(), id, batch, send_timeout).await {
            Ok(()) => {
                outcome.sent += 1;
                debug!(
                    destination = %destination.name(),
                    batch = index,
                    files = batch.files.len(),
                    embeds = batch.embeds.len(),
                    "Batch sent"
                );
            }
            Err(e) => {
                outcome.failed += 1;
                warn!(destination = %destination.name(), batch = index, error = %e, "Batch send failed");
            }
        }
    }

    outcome
}

/// Send every batch to every destination.
///
/// Destinations run concurrently; each destination receives its batches
/// strictly in order. Each send is bounded by `send_timeout`; resolution
/// failures, send failures and timeouts are logged and skipped.
pub async fn dispatch(
    resolver: &dyn DestinationResolver,
    destinations: &[DestinationId],
    batches: &[Batch],
    send_timeout: Duration,
) -> DispatchReport {
    if batches.is_empty() {
        return DispatchReport::default();
    }

    let outcomes = join_all(
        destinations
            .iter()
            .map(|&id| dispatch_one(resolver, id, batches, send_timeout)),
    )
    .await;

    DispatchReport { outcomes }
}
