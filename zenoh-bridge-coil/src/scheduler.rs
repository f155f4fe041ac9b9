//! Periodic polling of signal groups.
//!
//! Every tick reads each group once, concurrently, and waits for all of them
//! before the tick ends. Each group is moved into its own task for the
//! duration of the read and handed back at the barrier, so per-signal state
//! needs no locking and consecutive ticks never overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::bus::{TopicPublisher, TopicScheme, TriggerPayload};
use crate::error::SchedulerError;
use crate::fieldbus::CoilReader;
use crate::group::{SignalGroup, decode_bits};

/// Default time between two tick starts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Groups polled.
    pub groups: usize,
    /// Groups whose read failed; their state is unchanged.
    pub failed_groups: usize,
    /// Triggers raised, published or not.
    pub triggers: usize,
}

struct GroupPoll {
    group: SignalGroup,
    failed: bool,
    triggers: usize,
}

/// Drives the poll ticks over a fixed set of groups.
pub struct PollScheduler<R, P> {
    groups: Vec<SignalGroup>,
    reader: Arc<R>,
    publisher: Arc<P>,
    payload: TriggerPayload,
    topics: TopicScheme,
    interval: Duration,
}

impl<R: CoilReader, P: TopicPublisher> PollScheduler<R, P> {
    pub fn new(groups: Vec<SignalGroup>, reader: Arc<R>, publisher: Arc<P>) -> Self {
        Self {
            groups,
            reader,
            publisher,
            payload: TriggerPayload::default(),
            topics: TopicScheme::default(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Choose what a trigger publishes.
    pub fn with_payload(mut self, payload: TriggerPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Publish under a key prefix.
    pub fn with_topics(mut self, topics: TopicScheme) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn groups(&self) -> &[SignalGroup] {
        &self.groups
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll every group once and wait for all of them.
    ///
    /// A failing group is logged and skipped. Only a worker that panics or
    /// is cancelled makes the tick fail, since that group's state is lost.
    pub async fn tick(&mut self) -> Result<TickReport, SchedulerError> {
        let groups = std::mem::take(&mut self.groups);
        let mut report = TickReport {
            groups: groups.len(),
            ..TickReport::default()
        };

        let mut workers = JoinSet::new();
        for (index, group) in groups.into_iter().enumerate() {
            let reader = Arc::clone(&self.reader);
            let publisher = Arc::clone(&self.publisher);
            let topics = self.topics.clone();
            let payload = self.payload;

            workers.spawn(async move {
                let polled = poll_group(group, &*reader, &*publisher, payload, &topics).await;
                (index, polled)
            });
        }

        let mut returned: Vec<Option<SignalGroup>> = (0..report.groups).map(|_| None).collect();
        let mut lost = 0;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, polled)) => {
                    report.failed_groups += usize::from(polled.failed);
                    report.triggers += polled.triggers;
                    returned[index] = Some(polled.group);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Group worker terminated abnormally");
                    lost += 1;
                }
            }
        }

        self.groups = returned.into_iter().flatten().collect();

        if lost > 0 {
            return Err(SchedulerError::WorkerLost { lost });
        }

        Ok(report)
    }

    /// Tick forever at the configured interval.
    ///
    /// A tick that overruns the interval delays the next one instead of
    /// causing a burst. Returns only when a tick fails.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            groups = self.groups.len(),
            signals = self.groups.iter().map(SignalGroup::len).sum::<usize>(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting poll scheduler"
        );

        loop {
            interval.tick().await;

            let report = self.tick().await?;
            if report.failed_groups > 0 {
                tracing::debug!(
                    failed = report.failed_groups,
                    groups = report.groups,
                    triggers = report.triggers,
                    "Tick finished with failed groups"
                );
            } else {
                tracing::trace!(
                    groups = report.groups,
                    triggers = report.triggers,
                    "Tick finished"
                );
            }
        }
    }
}

/// Read one group, update its signals and publish its triggers.
async fn poll_group<R: CoilReader, P: TopicPublisher>(
    mut group: SignalGroup,
    reader: &R,
    publisher: &P,
    payload: TriggerPayload,
    topics: &TopicScheme,
) -> GroupPoll {
    let bits = reader
        .read_bits(group.offset(), group.count())
        .await
        .and_then(|bytes| decode_bits(&bytes, group.len()));

    let bits = match bits {
        Ok(bits) => bits,
        Err(e) => {
            tracing::warn!(
                offset = group.offset(),
                count = group.count(),
                slugs = ?group.slugs(),
                error = %e,
                "Group read failed"
            );
            return GroupPoll {
                group,
                failed: true,
                triggers: 0,
            };
        }
    };

    let triggers = group.apply(&bits);

    for trigger in &triggers {
        let topic = topics.topic(&trigger.slug);
        match publisher
            .publish(&topic, payload.encode(trigger.edge).to_vec())
            .await
        {
            Ok(()) => tracing::debug!(
                topic = %topic,
                address = trigger.address,
                edge = ?trigger.edge,
                "Trigger published"
            ),
            Err(e) => tracing::warn!(
                slug = %trigger.slug,
                address = trigger.address,
                error = %e,
                "Trigger publish failed"
            ),
        }
    }

    GroupPoll {
        group,
        failed: false,
        triggers: triggers.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::build_groups;
    use crate::mock::{FakeFieldBus, RecordingPublisher};
    use crate::signal::{Polarity, Signal};

    fn signal(address: u16, polarity: Polarity) -> Signal {
        Signal::new(address, format!("input-{}", address), polarity, false)
    }

    fn scheduler(
        addresses: &[u16],
        bus: &Arc<FakeFieldBus>,
        publisher: &Arc<RecordingPublisher>,
    ) -> PollScheduler<FakeFieldBus, RecordingPublisher> {
        let signals = addresses
            .iter()
            .map(|&a| signal(a, Polarity::NormallyOpen))
            .collect();
        PollScheduler::new(build_groups(signals), bus.clone(), publisher.clone())
    }

    #[tokio::test]
    async fn test_one_read_per_group() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let mut scheduler = scheduler(&[0, 10, 1], &bus, &publisher);

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report, TickReport { groups: 2, failed_groups: 0, triggers: 0 });

        let mut reads = bus.reads();
        reads.sort_unstable();
        assert_eq!(reads, vec![(0, 2), (10, 1)]);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_published_once() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let mut scheduler = scheduler(&[3], &bus, &publisher);

        scheduler.tick().await.unwrap();
        bus.set(3, true);
        assert_eq!(scheduler.tick().await.unwrap().triggers, 1);
        assert_eq!(scheduler.tick().await.unwrap().triggers, 0);

        assert_eq!(
            publisher.published(),
            vec![("input-3".to_string(), b"trigger".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_ninth_bit_decoded() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let addresses: Vec<u16> = (0..9).collect();
        let mut scheduler = scheduler(&addresses, &bus, &publisher);

        bus.set(8, true);
        scheduler.tick().await.unwrap();

        assert_eq!(publisher.topics(), vec!["input-8"]);
        let signals = scheduler.groups()[0].signals();
        assert!(signals[8].current());
        assert!(signals[..8].iter().all(|s| !s.current()));
    }

    #[tokio::test]
    async fn test_failed_group_isolated() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let mut scheduler = scheduler(&[0, 1, 10], &bus, &publisher);

        bus.set(1, true);
        bus.set(10, true);
        bus.fail_reads_at(0);

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.failed_groups, 1);
        assert_eq!(publisher.topics(), vec!["input-10"]);
        assert!(!scheduler.groups()[0].signals()[1].current());

        bus.heal(0);
        publisher.clear();

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.failed_groups, 0);
        assert_eq!(publisher.topics(), vec!["input-1"]);
    }

    #[tokio::test]
    async fn test_short_reply_leaves_state() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let addresses: Vec<u16> = (0..9).collect();
        let mut scheduler = scheduler(&addresses, &bus, &publisher);

        bus.set(0, true);
        bus.short_reads_at(0);

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.failed_groups, 1);
        assert!(publisher.published().is_empty());
        assert!(!scheduler.groups()[0].signals()[0].current());
    }

    #[tokio::test]
    async fn test_publish_failure_not_rereported() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let mut scheduler = scheduler(&[5], &bus, &publisher);

        publisher.fail_topic("input-5");
        bus.set(5, true);

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.triggers, 1);
        assert!(scheduler.groups()[0].signals()[0].current());

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.triggers, 0);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_groups_read_concurrently() {
        let delay = Duration::from_millis(200);
        let bus = Arc::new(FakeFieldBus::new().with_read_delay(delay));
        let publisher = Arc::new(RecordingPublisher::new());
        let mut scheduler = scheduler(&[0, 10, 20], &bus, &publisher);

        bus.set(0, true);
        bus.set(10, true);
        bus.set(20, true);

        let started = std::time::Instant::now();
        let report = scheduler.tick().await.unwrap();
        let elapsed = started.elapsed();

        // Barrier: every group has been read and updated when the tick returns.
        assert_eq!(bus.reads().len(), 3);
        assert_eq!(report.triggers, 3);
        assert!(scheduler.groups().iter().all(|g| g.signals()[0].current()));
        assert!(elapsed < delay * 3, "groups were polled sequentially: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_group_order_kept() {
        let delay = Duration::from_millis(5);
        let bus = Arc::new(FakeFieldBus::new().with_read_delay(delay));
        let publisher = Arc::new(RecordingPublisher::new());
        let mut scheduler = scheduler(&[30, 20, 10, 0], &bus, &publisher);

        scheduler.tick().await.unwrap();
        scheduler.tick().await.unwrap();

        let offsets: Vec<u16> = scheduler.groups().iter().map(SignalGroup::offset).collect();
        assert_eq!(offsets, vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_worker_panic_fails_tick() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let mut scheduler = scheduler(&[0, 10], &bus, &publisher);

        bus.panic_reads_at(10);

        let result = scheduler.tick().await;
        assert!(matches!(result, Err(SchedulerError::WorkerLost { lost: 1 })));
        assert_eq!(scheduler.groups().len(), 1);
    }

    #[tokio::test]
    async fn test_state_payload_and_prefix() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let groups = build_groups(vec![
            signal(0, Polarity::NormallyOpen),
            signal(1, Polarity::NormallyClosed),
        ]);
        let mut scheduler = PollScheduler::new(groups, bus.clone(), publisher.clone())
            .with_payload(TriggerPayload::State)
            .with_topics(TopicScheme::new("plant"));

        bus.set(0, true);
        bus.set(1, true);
        scheduler.tick().await.unwrap();
        bus.set(1, false);
        scheduler.tick().await.unwrap();

        assert_eq!(
            publisher.published(),
            vec![
                ("plant/input-0".to_string(), b"ON".to_vec()),
                ("plant/input-1".to_string(), b"OFF".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_keeps_ticking() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let scheduler =
            scheduler(&[0], &bus, &publisher).with_interval(Duration::from_millis(10));

        let outcome = tokio::time::timeout(Duration::from_millis(100), scheduler.run()).await;

        assert!(outcome.is_err(), "run returned early: {:?}", outcome);
        assert!(bus.reads().len() > 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_lost_worker() {
        let bus = Arc::new(FakeFieldBus::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let scheduler =
            scheduler(&[0], &bus, &publisher).with_interval(Duration::from_millis(10));

        bus.panic_reads_at(0);

        let outcome = tokio::time::timeout(Duration::from_secs(5), scheduler.run()).await;
        assert!(matches!(
            outcome,
            Ok(Err(SchedulerError::WorkerLost { lost: 1 }))
        ));
    }
}
