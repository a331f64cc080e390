//! Poll loop driving a source and a publisher.

use tokio::time::Instant;

use std::{future::Future, time::Duration};

use cimetrics::{LabelSet, MetricDefinition};

use crate::{
    metrics::exporter_up,
    publish::Publisher,
    source::{PollError, Source},
};

/// State of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next cycle.
    Idle {
        /// Instant at which the next cycle starts.
        next_tick: Instant,
    },
    /// A cycle is in progress.
    Running {
        /// 1-based index of the cycle.
        cycle: u64,
    },
}

/// Outcome of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The snapshot was published.
    Published,
    /// The source is not configured; no fetch was attempted.
    Unconfigured,
    /// Polling the upstream failed; nothing was published.
    PollFailed,
    /// The snapshot was produced, but publishing it failed.
    PublishFailed,
}

/// Runs poll cycles at a fixed interval.
///
/// Cycles never overlap: the next cycle is scheduled `interval` after the previous one *completes*,
/// so a slow upstream delays subsequent cycles rather than piling them up. The first cycle
/// runs immediately. A failed cycle is logged and never stops the loop.
#[derive(Debug)]
pub struct Scheduler<S, P> {
    source: S,
    publisher: P,
    interval: Duration,
    up: MetricDefinition,
    state: SchedulerState,
    completed_cycles: u64,
}

impl<S: Source, P: Publisher> Scheduler<S, P> {
    /// Default interval between cycles.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    /// Creates a scheduler. The first cycle is due immediately.
    pub fn new(source: S, publisher: P, interval: Duration) -> Self {
        Self {
            source,
            publisher,
            interval,
            up: exporter_up(),
            state: SchedulerState::Idle {
                next_tick: Instant::now(),
            },
            completed_cycles: 0,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Returns the number of completed cycles.
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    /// Returns a reference to the publisher.
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Runs a single cycle regardless of the schedule: polls the source, then publishes the snapshot
    /// with `exporter_up = 1`. If polling fails, the publisher is notified instead.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let cycle = self.completed_cycles + 1;
        self.state = SchedulerState::Running { cycle };
        let started_at = Instant::now();

        let outcome = match self.source.poll().await {
            Ok(mut snapshot) => {
                match snapshot.set(&self.up, LabelSet::empty(), 1.0) {
                    Ok(()) => self.publish(cycle, &snapshot).await,
                    Err(err) => {
                        tracing::error!(cycle, %err, "Cannot record exporter status");
                        CycleOutcome::PublishFailed
                    }
                }
            }
            Err(err) => {
                let outcome = if let PollError::Unconfigured(reason) = &err {
                    tracing::warn!(cycle, reason, "Skipping poll cycle: source is not configured");
                    CycleOutcome::Unconfigured
                } else {
                    tracing::error!(cycle, %err, "Poll cycle failed");
                    CycleOutcome::PollFailed
                };
                if let Err(err) = self.publisher.mark_unavailable().await {
                    tracing::error!(cycle, %err, "Failed marking upstream as unavailable");
                }
                outcome
            }
        };

        let completed_at = Instant::now();
        let latency = completed_at - started_at;
        tracing::info!(
            cycle,
            ?outcome,
            latency_sec = latency.as_secs_f64(),
            "Finished poll cycle in {latency:?}"
        );
        self.completed_cycles = cycle;
        self.state = SchedulerState::Idle {
            next_tick: completed_at + self.interval,
        };
        outcome
    }

    async fn publish(&mut self, cycle: u64, snapshot: &cimetrics::Snapshot) -> CycleOutcome {
        match self.publisher.publish(snapshot).await {
            Ok(()) => CycleOutcome::Published,
            Err(err) => {
                tracing::error!(cycle, %err, "Failed publishing snapshot");
                CycleOutcome::PublishFailed
            }
        }
    }

    /// Runs cycles until `shutdown` resolves. A cycle in progress is completed before returning.
    pub async fn run(mut self, shutdown: impl Future<Output = ()> + Send) -> Self {
        tokio::pin!(shutdown);
        tracing::info!(interval = ?self.interval, "Starting poll loop");
        loop {
            let next_tick = match self.state {
                SchedulerState::Idle { next_tick } => next_tick,
                SchedulerState::Running { .. } => Instant::now(),
            };
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                () = tokio::time::sleep_until(next_tick) => {}
            }
            self.run_cycle().await;
        }
        tracing::info!(
            completed_cycles = self.completed_cycles,
            "Stop signal received, poll loop is shutting down"
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use reqwest::StatusCode;
    use tokio::sync::watch;
    use tracing::{Level, Subscriber};
    use tracing_capture::{CaptureLayer, SharedStorage};
    use tracing_subscriber::layer::SubscriberExt;

    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{
        fetch::FetchError,
        metrics::{quality_metric, EXPORTER_UP},
        publish::PublishFailure,
    };
    use cimetrics::{RegistryError, Snapshot};

    #[derive(Debug)]
    enum Step {
        Ok(f64),
        Fail,
        Unconfigured,
    }

    #[derive(Debug)]
    struct MockSource {
        steps: VecDeque<Step>,
        poll_duration: Duration,
        polled_at: Arc<Mutex<Vec<Instant>>>,
    }

    impl MockSource {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: steps.into_iter().collect(),
                poll_duration: Duration::ZERO,
                polled_at: Arc::default(),
            }
        }
    }

    impl Source for MockSource {
        fn definitions(&self) -> Vec<MetricDefinition> {
            vec![quality_metric("bugs").unwrap()]
        }

        async fn poll(&mut self) -> Result<Snapshot, PollError> {
            self.polled_at.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.poll_duration).await;
            match self.steps.pop_front().unwrap_or(Step::Ok(0.0)) {
                Step::Ok(value) => {
                    let bugs = quality_metric("bugs").unwrap();
                    let mut snapshot = Snapshot::new();
                    snapshot.set(&bugs, bugs.labels(["api"]).unwrap(), value)?;
                    Ok(snapshot)
                }
                Step::Fail => Err(PollError::Fetch(FetchError::Status {
                    url: "http://ci:8080/api/json".parse().unwrap(),
                    status: StatusCode::BAD_GATEWAY,
                })),
                Step::Unconfigured => Err(PollError::Unconfigured("token is not set")),
            }
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Published(Option<f64>, Option<f64>),
        Unavailable,
    }

    #[derive(Debug, Default)]
    struct MockPublisher {
        events: Vec<Event>,
        fail_next: bool,
    }

    impl Publisher for MockPublisher {
        async fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishFailure> {
            if std::mem::take(&mut self.fail_next) {
                return Err(RegistryError::UndeclaredMetric("test".to_owned()).into());
            }
            let bugs = quality_metric("bugs").unwrap();
            self.events.push(Event::Published(
                snapshot.get(EXPORTER_UP, &LabelSet::empty()),
                snapshot.get(bugs.name(), &bugs.labels(["api"]).unwrap()),
            ));
            Ok(())
        }

        async fn mark_unavailable(&mut self) -> Result<(), PublishFailure> {
            self.events.push(Event::Unavailable);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_cycle_does_not_stop_next_one() {
        let source = MockSource::new([Step::Fail, Step::Ok(3.0), Step::Unconfigured]);
        let mut scheduler = Scheduler::new(source, MockPublisher::default(), Duration::from_secs(1));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::PollFailed);
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Published);
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Unconfigured);
        assert_eq!(scheduler.completed_cycles(), 3);
        assert_eq!(
            scheduler.publisher().events,
            [
                Event::Unavailable,
                Event::Published(Some(1.0), Some(3.0)),
                Event::Unavailable,
            ]
        );
    }

    fn tracing_subscriber(storage: &SharedStorage) -> impl Subscriber {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .finish()
            .with(CaptureLayer::new(storage))
    }

    #[tokio::test]
    async fn cycle_failures_are_logged_by_severity() {
        let tracing_storage = SharedStorage::default();
        let _subscriber_guard =
            tracing::subscriber::set_default(tracing_subscriber(&tracing_storage));

        let source = MockSource::new([Step::Fail, Step::Unconfigured]);
        let mut scheduler = Scheduler::new(source, MockPublisher::default(), Duration::from_secs(1));
        scheduler.run_cycle().await;
        scheduler.run_cycle().await;

        let storage = tracing_storage.lock();
        let problems: Vec<_> = storage
            .all_events()
            .filter(|event| *event.metadata().level() <= Level::WARN)
            .collect();
        assert_eq!(problems.len(), 2);

        let fetch_error = &problems[0];
        assert_eq!(*fetch_error.metadata().level(), Level::ERROR);
        assert_eq!(fetch_error.message(), Some("Poll cycle failed"));
        assert!(fetch_error["err"]
            .as_debug_str()
            .unwrap()
            .contains("502 Bad Gateway"));

        let unconfigured = &problems[1];
        assert_eq!(*unconfigured.metadata().level(), Level::WARN);
        assert_eq!(unconfigured["reason"].as_str(), Some("token is not set"));
    }

    #[tokio::test]
    async fn failed_publish_does_not_affect_next_cycle() {
        let source = MockSource::new([Step::Ok(1.0), Step::Ok(2.0)]);
        let publisher = MockPublisher {
            fail_next: true,
            ..MockPublisher::default()
        };
        let mut scheduler = Scheduler::new(source, publisher, Duration::from_secs(1));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::PublishFailed);
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Published);
        assert_eq!(
            scheduler.publisher().events,
            [Event::Published(Some(1.0), Some(2.0))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn next_cycle_is_scheduled_from_completion() {
        let mut source = MockSource::new([]);
        source.poll_duration = Duration::from_secs(5);
        let polled_at = Arc::clone(&source.polled_at);
        let interval = Duration::from_secs(60);
        let mut scheduler = Scheduler::new(source, MockPublisher::default(), interval);

        let started_at = Instant::now();
        assert_matches!(scheduler.state(), SchedulerState::Idle { next_tick } if next_tick == started_at);
        scheduler.run_cycle().await;
        let SchedulerState::Idle { next_tick } = scheduler.state() else {
            panic!("unexpected state: {:?}", scheduler.state());
        };
        assert_eq!(next_tick, started_at + Duration::from_secs(65));

        let (stop_sender, mut stop_receiver) = watch::channel(());
        let scheduler_task = tokio::spawn(scheduler.run(async move {
            stop_receiver.changed().await.ok();
        }));
        // Cycles start at 65s and 130s after the start.
        tokio::time::sleep(Duration::from_secs(131)).await;
        stop_sender.send_replace(());
        let scheduler = scheduler_task.await.unwrap();
        assert_eq!(scheduler.completed_cycles(), 3);

        let polled_at: Vec<_> = polled_at
            .lock()
            .unwrap()
            .iter()
            .map(|&instant| instant - started_at)
            .collect();
        assert_eq!(
            polled_at,
            [
                Duration::ZERO,
                Duration::from_secs(65),
                Duration::from_secs(130)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_runs_immediately_and_loop_stops_on_shutdown() {
        let source = MockSource::new([Step::Ok(1.0)]);
        let polled_at = Arc::clone(&source.polled_at);
        let scheduler = Scheduler::new(source, MockPublisher::default(), Duration::from_secs(60));
        let started_at = Instant::now();

        let (stop_sender, mut stop_receiver) = watch::channel(());
        let scheduler_task = tokio::spawn(scheduler.run(async move {
            stop_receiver.changed().await.ok();
        }));
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_sender.send_replace(());
        let scheduler = scheduler_task.await.unwrap();

        assert_eq!(scheduler.completed_cycles(), 1);
        assert_eq!(*polled_at.lock().unwrap(), [started_at]);
        assert_eq!(
            scheduler.publisher().events,
            [Event::Published(Some(1.0), Some(1.0))]
        );
    }
}
