//! Per-target poll loop.
//!
//! One cycle walks `Polling -> Detailing -> Dispatching -> Cooldown` and then
//! starts over. Upstream and sink failures are absorbed by the retrying
//! clients, so the only way out of the loop is cancellation.
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::discord::SinkClient;
use crate::format::Formatter;
use crate::github::{format_since, Upstream};
use crate::model::{CommitSummary, NotificationPayload, WatchTarget};
use crate::retry::{cooldown, Cancelled};
use crate::watermark::{Clock, Watermark};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldowns {
    /// After each delivered notification.
    pub post: Duration,
    /// After each full cycle, including empty ones.
    pub cycle: Duration,
}

#[derive(Debug)]
enum Phase {
    Polling,
    Detailing(Vec<CommitSummary>),
    Dispatching(Vec<NotificationPayload>),
    Cooldown,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub delivered: usize,
}

pub struct WatchTask {
    target: WatchTarget,
    upstream: Upstream,
    sink: SinkClient,
    watermark: Watermark,
    formatter: Formatter,
    clock: Arc<dyn Clock>,
    cooldowns: Cooldowns,
    cancel: CancellationToken,
}

impl WatchTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: WatchTarget,
        upstream: Upstream,
        sink: SinkClient,
        watermark: Watermark,
        formatter: Formatter,
        clock: Arc<dyn Clock>,
        cooldowns: Cooldowns,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            upstream,
            sink,
            watermark,
            formatter,
            clock,
            cooldowns,
            cancel,
        }
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    /// Loop until cancelled.
    #[instrument(skip_all, fields(repo = %self.target.id))]
    pub async fn run(mut self) {
        info!(since = %format_since(self.watermark.get()), "watching");
        let mut cycles: u64 = 0;
        while let Ok(report) = self.run_cycle().await {
            cycles += 1;
            debug!(cycles, listed = report.listed, delivered = report.delivered, "cycle done");
        }
        info!(cycles, "watch stopped");
    }

    /// Drive one full cycle, from polling through the inter-cycle cooldown.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, Cancelled> {
        let mut report = CycleReport::default();
        let mut phase = Phase::Polling;
        loop {
            phase = match phase {
                Phase::Polling => {
                    let since = self.watermark.get();
                    debug!(since = %format_since(since), "checking {}", self.target.id);
                    let listed = self.upstream.list_since(&self.target.id, since).await?;
                    // Advance before processing so an interrupted batch is not replayed.
                    self.watermark.advance(self.clock.now());
                    report.listed = listed.len();
                    if listed.is_empty() {
                        Phase::Cooldown
                    } else {
                        info!(count = listed.len(), "new commits");
                        Phase::Detailing(listed)
                    }
                }
                Phase::Detailing(listed) => {
                    let mut payloads = Vec::with_capacity(listed.len());
                    for summary in &listed {
                        let detail = self.upstream.fetch_detail(&self.target.id, &summary.sha).await?;
                        payloads.push(self.formatter.format(&self.target.id, &detail));
                    }
                    Phase::Dispatching(payloads)
                }
                Phase::Dispatching(payloads) => {
                    for payload in &payloads {
                        self.sink.deliver(&self.target.webhook_url, payload).await?;
                        report.delivered += 1;
                        cooldown(&self.cancel, self.cooldowns.post).await?;
                    }
                    Phase::Cooldown
                }
                Phase::Cooldown => {
                    cooldown(&self.cancel, self.cooldowns.cycle).await?;
                    return Ok(report);
                }
            };
        }
    }
}
