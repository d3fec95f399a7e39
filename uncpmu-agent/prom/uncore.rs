use prometheus::{Gauge, Registry};
use std::sync::Arc;

use crate::error::Result;
use crate::uncore::{resolve_event, EventId, UncoreBox, UncoreContext};

const METRIC_NAME: &str = "uncpmu_event_count";

struct MonitoredEvent {
    uncore_box: Arc<UncoreBox>,
    id: EventId,
    scale: f64,
    gauge: Gauge,
}

/// Publishes the configured events of every selected package as gauges
pub struct UncoreMetricExporter {
    registry: Arc<Registry>,
    events: Vec<MonitoredEvent>,
}

impl UncoreMetricExporter {
    /// Program every configured event; events that cannot be scheduled are
    /// logged and skipped
    pub fn new(ctx: &UncoreContext) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let mut events = Vec::new();

        let packages: Vec<u32> = ctx
            .packages()
            .into_iter()
            .filter(|&p| ctx.config().wants_package(p))
            .collect();

        for spec in &ctx.config().events {
            for &package in &packages {
                match Self::program(ctx, &spec.pmu, &spec.event, package) {
                    Ok((uncore_box, id, scale)) => {
                        let opts = prometheus::Opts::new(METRIC_NAME, "Uncore event count")
                            .const_label("socket", package.to_string())
                            .const_label("pmu", spec.pmu.as_str())
                            .const_label("event", spec.event.as_str());
                        let gauge = Gauge::with_opts(opts)?;
                        registry.register(Box::new(gauge.clone()))?;
                        events.push(MonitoredEvent {
                            uncore_box,
                            id,
                            scale,
                            gauge,
                        });
                    }
                    Err(e) => tracing::warn!(
                        "Skipping {} {} on socket {}: {}",
                        spec.pmu,
                        spec.event,
                        package,
                        e
                    ),
                }
            }
        }

        tracing::info!("Monitoring {} uncore events", events.len());
        Ok(Self { registry, events })
    }

    fn program(
        ctx: &UncoreContext,
        pmu: &str,
        event: &str,
        package: u32,
    ) -> Result<(Arc<UncoreBox>, EventId, f64)> {
        let uncore_box = ctx.find_box(pmu, package)?;
        let (attr, desc) = resolve_event(uncore_box.ty(), event)?;
        let event = uncore_box.event_init(uncore_box.index(), attr)?;
        uncore_box.validate_group(std::slice::from_ref(&event))?;
        let id = uncore_box.add_event(event, true)?;
        Ok((uncore_box, id, desc.map_or(1.0, |d| d.scale_factor())))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Collect metrics once (called by the poller)
    pub async fn collect(&self) {
        for event in &self.events {
            match event.uncore_box.read_event(event.id) {
                Some(count) => event.gauge.set(count as f64 * event.scale),
                None => tracing::debug!("Event {:?} is gone", event.id),
            }
        }
    }

    /// Remove every programmed event from its box
    pub fn release(&self) {
        for event in &self.events {
            event.uncore_box.del_event(event.id);
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FixedTopology, MemoryRegisters, RegisterKey};
    use crate::config::{EngineConfig, EventSpec};
    use uncpmu_raw::Generation;

    fn context(events: Vec<EventSpec>, packages: Vec<u32>) -> (UncoreContext, Arc<MemoryRegisters>) {
        let regs = Arc::new(MemoryRegisters::new());
        let config = EngineConfig {
            events,
            packages,
            ..EngineConfig::default()
        };
        let ctx = UncoreContext::new(
            Generation::SandyBridgeEp,
            config,
            regs.clone(),
            Arc::new(FixedTopology::uniform(2, 2)),
        );
        (ctx, regs)
    }

    fn spec(pmu: &str, event: &str) -> EventSpec {
        EventSpec {
            pmu: pmu.to_string(),
            event: event.to_string(),
        }
    }

    #[tokio::test]
    async fn test_exporter_publishes_counts() {
        let (ctx, regs) = context(vec![spec("uncore_cbox_0", "event=0x34,umask=0x03")], vec![1]);
        ctx.init(&[]).unwrap();
        let exporter = UncoreMetricExporter::new(&ctx).unwrap();
        assert_eq!(exporter.len(), 1);

        let cbox = ctx.find_box("uncore_cbox_0", 1).unwrap();
        let id = cbox.event_ids()[0];
        let idx = cbox.event_status(id).unwrap().idx.unwrap();
        regs.set(
            RegisterKey::Msr {
                cpu: 2,
                msr: cbox.registers().perf_ctr(idx),
            },
            1234,
        );

        exporter.collect().await;
        let families = exporter.registry().gather();
        assert_eq!(families.len(), 1);
        let metric = &families[0].get_metric()[0];
        assert_eq!(metric.get_gauge().get_value(), 1234.0);

        exporter.release();
        assert_eq!(cbox.n_events(), 0);
    }

    #[tokio::test]
    async fn test_bad_events_are_skipped() {
        let (ctx, _) = context(
            vec![
                spec("uncore_nonexistent", "event=0x1"),
                spec("uncore_pcu", "bogus=1"),
                spec("uncore_pcu", "event=0x1"),
            ],
            vec![],
        );
        ctx.init(&[]).unwrap();
        let exporter = UncoreMetricExporter::new(&ctx).unwrap();
        // One good event on each of the two packages
        assert_eq!(exporter.len(), 2);
    }
}
