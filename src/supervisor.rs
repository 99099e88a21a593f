use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::discord::{NotificationSink, SinkClient};
use crate::format::Formatter;
use crate::github::{CommitSource, Upstream};
use crate::model::WatchTarget;
use crate::retry::RetryPolicy;
use crate::watch::{Cooldowns, WatchTask};
use crate::watermark::{Clock, WatermarkStore};

/// Process-wide knobs shared by every watch task.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub cooldowns: Cooldowns,
    pub retry: RetryPolicy,
    pub truncate_at: usize,
    pub lookback: chrono::Duration,
}

impl Settings {
    pub fn from_config(cfg: &Config) -> Self {
        let t = &cfg.tuning;
        Self {
            cooldowns: Cooldowns {
                post: t.post_cooldown(),
                cycle: t.cycle_cooldown(),
            },
            retry: RetryPolicy::fixed(t.api_down_wait()),
            truncate_at: t.truncate_at,
            lookback: t.startup_offset(),
        }
    }
}

pub struct Supervisor {
    targets: Vec<WatchTarget>,
    source: Arc<dyn CommitSource>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl Supervisor {
    pub fn new(
        targets: Vec<WatchTarget>,
        source: Arc<dyn CommitSource>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self {
        Self {
            targets,
            source,
            sink,
            clock,
            settings,
        }
    }

    /// Build one task per target, each owning its own watermark and a child
    /// of `shutdown`.
    pub fn build_tasks(&self, shutdown: &CancellationToken) -> Result<Vec<WatchTask>> {
        let mut store = WatermarkStore::at_startup(self.clock.now(), self.settings.lookback);
        let formatter = Formatter::new(self.settings.truncate_at);
        let mut tasks = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let watermark = store.checkout(&target.id)?;
            let cancel = shutdown.child_token();
            tasks.push(WatchTask::new(
                target.clone(),
                Upstream::new(self.source.clone(), self.settings.retry, cancel.clone()),
                SinkClient::new(self.sink.clone(), self.settings.retry, cancel.clone()),
                watermark,
                formatter,
                self.clock.clone(),
                self.settings.cooldowns,
                cancel,
            ));
        }
        Ok(tasks)
    }

    /// Run every watch concurrently until `shutdown` fires, then wait for each
    /// task to stop.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let tasks = self.build_tasks(&shutdown)?;
        let mut set = JoinSet::new();
        for task in tasks {
            info!(repo = %task.target().id, "starting watch");
            set.spawn(task.run());
        }
        info!(count = set.len(), "all watches running");

        let mut stopped = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(()) => stopped += 1,
                Err(err) => error!(?err, "watch task aborted"),
            }
        }
        info!(stopped, "all watches stopped");
        Ok(())
    }
}
