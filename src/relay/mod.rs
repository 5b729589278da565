//! The relay core: normalize → fetch/build → plan → dispatch.
//!
//! A [`Relay`] is the single context value every relay operation runs
//! against. It is built at startup with a fetcher and a destination resolver
//! and owned by the dispatch loop, so the destination connection is only ever
//! used from that loop.

pub mod dispatch;
pub mod embed;
pub mod fetch;
pub mod normalize;
pub mod plan;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::relay::dispatch::{dispatch, DestinationId, DestinationResolver};
use crate::relay::embed::build_embeds;
use crate::relay::fetch::{fetch_all, AttachmentFetcher};
use crate::relay::normalize::NormalizedMessage;
use crate::relay::plan::{plan_batches, Limits};

/// A normalized message queued for the dispatch loop.
#[derive(Debug, Clone)]
pub struct RelayTask {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub message: NormalizedMessage,
}

impl RelayTask {
    pub fn new(message: NormalizedMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            message,
        }
    }
}

pub type RelaySender = mpsc::UnboundedSender<RelayTask>;
pub type RelayReceiver = mpsc::UnboundedReceiver<RelayTask>;

/// Summary of one relay operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub attachments_requested: usize,
    pub attachments_fetched: usize,
    pub embeds_requested: usize,
    pub embeds_built: usize,
    pub batches: usize,
    pub destinations_resolved: usize,
    pub sends_ok: usize,
    pub sends_failed: usize,
}

pub struct Relay {
    fetcher: Arc<dyn AttachmentFetcher>,
    resolver: Arc<dyn DestinationResolver>,
    destinations: Vec<DestinationId>,
    limits: Limits,
    send_timeout: Duration,
    include_header: bool,
}

impl Relay {
    pub fn new(
        fetcher: Arc<dyn AttachmentFetcher>,
        resolver: Arc<dyn DestinationResolver>,
        destinations: Vec<DestinationId>,
        limits: Limits,
        send_timeout: Duration,
        include_header: bool,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            destinations,
            limits,
            send_timeout,
            include_header,
        }
    }

    pub fn destinations(&self) -> &[DestinationId] {
        &self.destinations
    }

    /// Relay one message to every destination.
    ///
    /// Never fails: lost attachments, embeds, destinations and sends are
    /// logged and reflected in the report.
    pub async fn relay(&self, message: &NormalizedMessage) -> RelayReport {
        // Attachments are fetched once here, whatever the destination count.
        let (files, embeds) = tokio::join!(
            fetch_all(self.fetcher.as_ref(), &message.attachments),
            async { build_embeds(&message.embeds) },
        );

        let text = message.relay_text(self.include_header, files.len());
        let batches = plan_batches(&text, &files, &embeds, self.limits);
        let report = dispatch(
            self.resolver.as_ref(),
            &self.destinations,
            &batches,
            self.send_timeout,
        )
        .await;

        RelayReport {
            attachments_requested: message.attachments.len(),
            attachments_fetched: files.len(),
            embeds_requested: message.embeds.len(),
            embeds_built: embeds.len(),
            batches: batches.len(),
            destinations_resolved: report.resolved(),
            sends_ok: report.sent(),
            sends_failed: report.failed(),
        }
    }
}

/// Consume relay tasks until every sender is dropped.
///
/// Tasks are relayed one at a time in arrival order.
pub async fn run_dispatch_loop(relay: Relay, mut rx: RelayReceiver) {
    info!(
        destinations = relay.destinations().len(),
        "Dispatch loop started"
    );

    while let Some(task) = rx.recv().await {
        let report = relay.relay(&task.message).await;
        let queued_ms = (Utc::now() - task.received_at).num_milliseconds();

        if report.sends_failed > 0 || report.destinations_resolved < relay.destinations().len() {
            warn!(task = %task.id, ?report, queued_ms, "Relay completed with failures");
        } else {
            info!(
                task = %task.id,
                channel = %task.message.channel_name,
                attachments = report.attachments_fetched,
                embeds = report.embeds_built,
                batches = report.batches,
                destinations = report.destinations_resolved,
                sends = report.sends_ok,
                queued_ms,
                "Relay completed"
            );
        }
    }

    info!("Dispatch loop stopped");
}
