//!
//! Runs the prospectors, repeatedly or once
//!
use crate::config::Config;
use crate::prospector::{Prospector, RunReport};
use crate::sink::EventSink;
use crate::source::MetricSource;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the prospectors and the polling timer
pub struct Scheduler {
    period: Duration,
    prospectors: Vec<Arc<Prospector>>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("period", &self.period)
            .field("prospectors", &self.prospectors)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create one prospector per configured group, all sharing `source` and `sink`
    #[must_use]
    pub fn new(config: &Config, source: Arc<dyn MetricSource>, sink: Arc<dyn EventSink>) -> Self {
        let prospectors = config
            .groups
            .iter()
            .cloned()
            .map(|group| Arc::new(Prospector::new(group, source.clone(), sink.clone())))
            .collect();

        Self::from_parts(config.period.as_duration(), prospectors, sink)
    }

    /// Create a scheduler from already built prospectors. A zero `period` runs once.
    #[must_use]
    pub fn from_parts(
        period: Duration,
        prospectors: Vec<Arc<Prospector>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            period,
            prospectors,
            sink,
        }
    }

    /// Run until `stop` is cancelled, or, with a zero period, until every group ran once.
    ///
    /// The sink is closed before returning. Reports are only collected in one-shot mode.
    /// Group runs already in flight when `stop` fires are left to finish on their own.
    pub async fn run(self, stop: CancellationToken) -> Result<Vec<RunReport>> {
        let reports = if self.period.is_zero() {
            tracing::info!("Running {} groups once", self.prospectors.len());
            let handles = self.spawn_all();
            tokio::select! {
                reports = collect(handles) => reports,
                () = stop.cancelled() => {
                    tracing::info!("Stopped before all groups completed, runs in flight are detached");
                    Vec::new()
                }
            }
        } else {
            self.run_repeating(&stop).await;
            Vec::new()
        };

        self.sink.close().await?;
        Ok(reports)
    }

    /// Run every group concurrently and wait for all of them
    pub async fn run_once(&self) -> Vec<RunReport> {
        collect(self.spawn_all()).await
    }

    /// Spawn one run per group. Dropping a handle detaches the run, it is never aborted.
    fn spawn_all(&self) -> Vec<JoinHandle<RunReport>> {
        self.prospectors
            .iter()
            .map(|prospector| {
                let prospector = prospector.clone();
                tokio::spawn(async move { prospector.run().await })
            })
            .collect()
    }

    async fn run_repeating(&self, stop: &CancellationToken) {
        tracing::info!(
            "Polling {} groups every {:?}",
            self.prospectors.len(),
            self.period
        );
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    tracing::info!("Stop requested, no further polls");
                    break;
                }
                // earlier runs may still be in flight
                _ = ticker.tick() => drop(self.spawn_all()),
            }
        }
    }
}

async fn collect(handles: Vec<JoinHandle<RunReport>>) -> Vec<RunReport> {
    futures_util::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("Group run did not complete: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::Scheduler;
    use crate::config::{Config, GroupConfig, MetricSpec, Period};
    use crate::datapoint::{Datapoint, Statistic};
    use crate::prospector::test::StubSource;
    use crate::query::Query;
    use crate::sink::{ChannelSink, EventSink};
    use crate::source::MetricSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn config(period: Duration, groups: &[(&str, &str)]) -> Config {
        let group = |id: &str, metric: &str| GroupConfig {
            id: id.into(),
            metrics: vec![MetricSpec::new("AWS/EC2", metric).dimension("InstanceId", "i-123")],
        };
        Config {
            period: Period::new(period),
            region: "us-east-1".into(),
            endpoint: None,
            groups: groups.iter().map(|(id, metric)| group(id, metric)).collect(),
        }
    }

    const TWO_GROUPS: &[(&str, &str)] = &[("web", "CPUUtilization"), ("net", "NetworkIn")];

    fn source() -> Arc<StubSource> {
        let dp = Datapoint::new(chrono::Utc::now()).with(Statistic::Average, 1.0);
        Arc::new(
            StubSource::default()
                .with("CPUUtilization", vec![dp.clone()])
                .with("NetworkIn", vec![dp]),
        )
    }

    /// Takes `delay` for every fetch and counts how many fetches overlap
    struct SlowSource {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl MetricSource for SlowSource {
        async fn fetch(&self, _query: &Query) -> crate::Result<Vec<Datapoint>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                Datapoint::new(chrono::Utc::now()).with(Statistic::Average, 1.0)
            ])
        }
    }

    #[tokio::test]
    async fn one_shot() {
        let source = source();
        let (sink, mut rx) = ChannelSink::new();

        let scheduler = Scheduler::new(
            &config(Duration::ZERO, TWO_GROUPS),
            source.clone(),
            Arc::new(sink),
        );
        let reports = scheduler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.published == 1));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let mut groups = Vec::new();
        while let Some(event) = rx.recv().await {
            groups.push(event.get("group_id").cloned());
        }
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_waits_for_slow_groups() {
        let source = SlowSource::new(Duration::from_millis(300));
        let (sink, mut rx) = ChannelSink::new();

        let scheduler = Scheduler::new(
            &config(Duration::ZERO, TWO_GROUPS),
            source.clone(),
            Arc::new(sink),
        );
        let reports = scheduler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(source.completed.load(Ordering::SeqCst), 2);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 2);

        let mut events = 0;
        while rx.recv().await.is_some() {
            events += 1;
        }
        assert_eq!(events, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_leaves_fetches_running() {
        let source = SlowSource::new(Duration::from_millis(300));
        let (sink, mut rx) = ChannelSink::new();
        let sink = Arc::new(sink);

        let scheduler = Scheduler::new(
            &config(Duration::ZERO, TWO_GROUPS),
            source.clone(),
            sink.clone(),
        );
        let stop = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 2);
        stop.cancel();

        let reports = handle.await.unwrap().unwrap();
        assert_eq!(reports.len(), 0);
        assert_eq!(source.completed.load(Ordering::SeqCst), 0);
        assert!(sink.publish(crate::event::Event::default()).await.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(source.completed.load(Ordering::SeqCst), 2);
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);
        // the sink was closed before the fetches finished
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating() {
        let source = source();
        let (sink, mut rx) = ChannelSink::new();
        let sink = Arc::new(sink);

        let scheduler = Scheduler::new(
            &config(Duration::from_secs(10), TWO_GROUPS),
            source.clone(),
            sink.clone(),
        );
        let stop = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(stop.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);

        stop.cancel();
        let reports = handle.await.unwrap().unwrap();
        assert!(reports.is_empty());

        let mut events = 0;
        while rx.recv().await.is_some() {
            events += 1;
        }
        assert_eq!(events, 6);
        assert!(sink.publish(crate::event::Event::default()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_runs_overlap() {
        let source = SlowSource::new(Duration::from_secs(25));
        let (sink, _rx) = ChannelSink::new();

        let scheduler = Scheduler::new(
            &config(Duration::from_secs(10), &[("web", "CPUUtilization")]),
            source.clone(),
            Arc::new(sink),
        );
        let stop = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(stop.clone()));

        // ticks at 10s, 20s and 30s, none of their fetches has finished
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(source.completed.load(Ordering::SeqCst), 0);
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 3);
        assert!(source.max_in_flight.load(Ordering::SeqCst) >= 2);

        stop.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ticks_are_skipped() {
        let source = source();
        let (sink, _rx) = ChannelSink::new();

        let scheduler = Scheduler::new(
            &config(Duration::from_secs(10), &[("web", "CPUUtilization")]),
            source.clone(),
            Arc::new(sink),
        );
        let stop = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(stop.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        // the timer is stalled past the ticks at 10s, 20s and 30s
        tokio::time::advance(Duration::from_secs(34)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // next tick stays on the 10s grid
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        stop.cancel();
        handle.await.unwrap().unwrap();
    }
}
