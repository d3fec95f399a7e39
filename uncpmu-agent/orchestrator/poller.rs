// Periodic counter poller
// Reads every running counter often enough that no counter wraps twice
// between samples, then refreshes the exported gauges

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::prom::UncoreMetricExporter;
use crate::uncore::UncoreContext;

pub struct UncorePoller {
    context: Arc<UncoreContext>,
    exporter: Option<Arc<UncoreMetricExporter>>,
    interval: Duration,
}

impl UncorePoller {
    pub fn new(
        context: Arc<UncoreContext>,
        exporter: Option<Arc<UncoreMetricExporter>>,
        interval: Duration,
    ) -> Self {
        Self {
            context,
            exporter,
            interval,
        }
    }

    /// One poll: sample all counters, then publish
    pub async fn poll_once(&self) -> usize {
        let updated = self.context.update_all();

        if let Some(exporter) = &self.exporter {
            let exporter = Arc::clone(exporter);
            if let Err(e) = tokio::spawn(async move { exporter.collect().await }).await {
                tracing::error!("Collector task failed: {}", e);
            }
        }
        updated
    }

    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tracing::info!("Polling uncore counters every {:?}", self.interval);

        tokio::spawn(async move {
            self.poll_loop(cancel_token).await;
        })
    }

    async fn poll_loop(self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let updated = self.poll_once().await;
                    tracing::debug!("Poll read {} counters", updated);
                }
                _ = cancel_token.cancelled() => {
                    tracing::info!("Poller stopping");
                    break;
                }
            }
        }
    }
}
