//! Per-second input activity counting.
//!
//! The aggregator rotates a fixed-length bucket aligned to session
//! start (not calendar seconds). An event belongs to the bucket whose
//! half-open window `[k*len, (k+1)*len)` contains its timestamp, so an
//! event landing exactly on a boundary goes to the newer bucket and is
//! counted exactly once. Rotation is driven by event timestamps, which
//! keeps the accounting deterministic; windows that pass without any
//! input still yield all-zero snapshots so consecutive snapshots always
//! sum to the true event count of the span they cover.
//!
//! The live bucket is owned by the counter task alone. Everyone else
//! sees immutable [`BucketSnapshot`]s, via a watch channel (latest) or
//! the rotation stream.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, Subscription};
use crate::event::{Channel, InputEvent};

/// Counter settings.
#[derive(Clone, Debug)]
pub struct CounterSettings {
    /// Bucket window length in milliseconds.
    pub bucket_ms: u64,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self { bucket_ms: 1000 }
    }
}

/// Immutable view of one retired bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    /// Bucket ordinal since session start.
    pub index: u64,
    /// Window start, relative to session start.
    pub window_start: Duration,
    pub window_len: Duration,
    pub counts: HashMap<Channel, u64>,
    pub total: u64,
}

/// Rolling per-channel event counter.
///
/// Single-owner mutable state: only the component driving it calls
/// [`record`](Self::record), so an event straddling a rotation can
/// never be lost or double-counted.
pub struct CounterAggregator {
    bucket_len: Duration,
    current_index: u64,
    counts: HashMap<Channel, u64>,
    total: u64,
}

impl CounterAggregator {
    pub fn new(settings: CounterSettings) -> Self {
        let bucket_ms = if settings.bucket_ms == 0 {
            warn!("Bucket length of 0ms is invalid, falling back to 1000ms");
            1000
        } else {
            settings.bucket_ms
        };
        Self {
            bucket_len: Duration::from_millis(bucket_ms),
            current_index: 0,
            counts: HashMap::new(),
            total: 0,
        }
    }

    fn bucket_index(&self, timestamp: Duration) -> u64 {
        (timestamp.as_nanos() / self.bucket_len.as_nanos()) as u64
    }

    /// Count one event, returning any snapshots the rotation produced.
    ///
    /// The event is attributed to the bucket active at its
    /// `source_timestamp`, not at processing time. A jump across
    /// several windows retires each intermediate window as an all-zero
    /// snapshot.
    pub fn record(&mut self, event: &InputEvent) -> Vec<BucketSnapshot> {
        let index = self.bucket_index(event.timestamp);
        let mut retired = Vec::new();

        if index < self.current_index {
            // Timestamps are non-decreasing per session, so this only
            // happens on misuse; attribute to the live bucket rather
            // than lose the event.
            warn!(
                "Event timestamp {:?} predates current bucket {}, counting into it",
                event.timestamp, self.current_index
            );
        } else {
            while self.current_index < index {
                retired.push(self.rotate_to(self.current_index + 1));
            }
        }

        *self.counts.entry(event.channel).or_insert(0) += 1;
        self.total += 1;
        debug!(
            "Counted {:?} into bucket {} (bucket total {})",
            event.channel, self.current_index, self.total
        );
        retired
    }

    fn rotate_to(&mut self, next_index: u64) -> BucketSnapshot {
        let snapshot = BucketSnapshot {
            index: self.current_index,
            window_start: self.bucket_len * self.current_index as u32,
            window_len: self.bucket_len,
            counts: std::mem::take(&mut self.counts),
            total: std::mem::replace(&mut self.total, 0),
        };
        self.current_index = next_index;
        snapshot
    }

    /// Retire the live bucket immediately (end of session).
    pub fn flush(&mut self) -> BucketSnapshot {
        self.rotate_to(self.current_index + 1)
    }
}

/// Handle for the counter task.
pub struct CounterHandle {
    latest: watch::Receiver<Option<BucketSnapshot>>,
}

impl CounterHandle {
    /// Spawn a task draining a bus subscription into the aggregator.
    ///
    /// Returns the handle plus the stream of retired buckets. The
    /// watch side always holds the most recent snapshot for readers
    /// that only care about "now".
    pub fn spawn(
        subscription: Subscription,
        settings: CounterSettings,
    ) -> (Self, mpsc::Receiver<BucketSnapshot>) {
        let (latest_tx, latest_rx) = watch::channel(None);
        let (stream_tx, stream_rx) = mpsc::channel(64);

        info!(
            "Spawning counter task (bucket {}ms)",
            settings.bucket_ms
        );
        let aggregator = CounterAggregator::new(settings);
        tokio::spawn(async move {
            run_counter_loop(aggregator, subscription, latest_tx, stream_tx).await;
        });

        (Self { latest: latest_rx }, stream_rx)
    }

    /// Latest retired bucket, for read-only visualization.
    pub fn subscribe(&self) -> watch::Receiver<Option<BucketSnapshot>> {
        self.latest.clone()
    }
}

async fn run_counter_loop(
    mut aggregator: CounterAggregator,
    mut subscription: Subscription,
    latest_tx: watch::Sender<Option<BucketSnapshot>>,
    stream_tx: mpsc::Sender<BucketSnapshot>,
) {
    while let Some(message) = subscription.recv().await {
        match message {
            BusMessage::Input(event) => {
                for snapshot in aggregator.record(&event) {
                    emit(&latest_tx, &stream_tx, snapshot);
                }
            }
            BusMessage::Disconnected => {
                info!("Counter received disconnect, flushing live bucket");
                let snapshot = aggregator.flush();
                emit(&latest_tx, &stream_tx, snapshot);
                break;
            }
        }
    }
    debug!("Counter task finished");
}

fn emit(
    latest_tx: &watch::Sender<Option<BucketSnapshot>>,
    stream_tx: &mpsc::Sender<BucketSnapshot>,
    snapshot: BucketSnapshot,
) {
    latest_tx.send_replace(Some(snapshot.clone()));
    if let Err(err) = stream_tx.try_send(snapshot) {
        warn!("Bucket snapshot stream backed up, snapshot dropped: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    fn event(ms: u64, channel: Channel) -> InputEvent {
        InputEvent {
            timestamp: Duration::from_millis(ms),
            channel,
            value: 1.0,
        }
    }

    fn aggregator() -> CounterAggregator {
        CounterAggregator::new(CounterSettings::default())
    }

    #[test]
    fn events_land_in_their_timestamp_bucket() {
        let mut agg = aggregator();
        assert!(agg.record(&event(100, Channel::ButtonA)).is_empty());
        assert!(agg.record(&event(900, Channel::ButtonB)).is_empty());

        let retired = agg.record(&event(1100, Channel::ButtonA));
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].index, 0);
        assert_eq!(retired[0].total, 2);
        assert_eq!(retired[0].counts[&Channel::ButtonA], 1);
        assert_eq!(retired[0].counts[&Channel::ButtonB], 1);
    }

    #[test]
    fn boundary_event_goes_to_newer_bucket_once() {
        let mut agg = aggregator();
        agg.record(&event(500, Channel::ButtonA));

        // Exactly on the 1s boundary: belongs to bucket 1, not bucket 0.
        let retired = agg.record(&event(1000, Channel::ButtonA));
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].total, 1);

        let final_bucket = agg.flush();
        assert_eq!(final_bucket.index, 1);
        assert_eq!(final_bucket.total, 1);
    }

    #[test]
    fn idle_windows_emit_zero_snapshots() {
        let mut agg = aggregator();
        agg.record(&event(500, Channel::ButtonA));

        let retired = agg.record(&event(3200, Channel::ButtonB));
        let totals: Vec<(u64, u64)> = retired.iter().map(|s| (s.index, s.total)).collect();
        assert_eq!(totals, vec![(0, 1), (1, 0), (2, 0)]);
    }

    #[test]
    fn snapshots_sum_to_total_event_count() {
        let mut agg = aggregator();
        let timestamps = [0u64, 120, 990, 1000, 1001, 2500, 2999, 3000, 4800];

        let mut retired = Vec::new();
        for &ms in &timestamps {
            retired.extend(agg.record(&event(ms, Channel::ButtonA)));
        }
        retired.push(agg.flush());

        let sum: u64 = retired.iter().map(|s| s.total).sum();
        assert_eq!(sum, timestamps.len() as u64);

        // Windows are contiguous: every index up to the last appears once.
        let indices: Vec<u64> = retired.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn window_start_matches_index() {
        let mut agg = aggregator();
        agg.record(&event(2100, Channel::ButtonA));
        let snap = agg.flush();
        assert_eq!(snap.index, 2);
        assert_eq!(snap.window_start, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn counter_task_streams_rotations_and_flushes_on_disconnect() {
        let bus = EventBus::new();
        let sub = bus.subscribe("counter", 32);
        let (_handle, mut snapshots) = CounterHandle::spawn(sub, CounterSettings::default());

        bus.publish(BusMessage::Input(event(100, Channel::ButtonA)));
        bus.publish(BusMessage::Input(event(1500, Channel::ButtonB)));
        bus.publish(BusMessage::Disconnected);

        let first = snapshots.recv().await.expect("first rotation");
        assert_eq!(first.index, 0);
        assert_eq!(first.total, 1);

        let flushed = snapshots.recv().await.expect("flush on disconnect");
        assert_eq!(flushed.index, 1);
        assert_eq!(flushed.total, 1);
    }

    #[tokio::test]
    async fn watch_side_tracks_latest_snapshot() {
        let bus = EventBus::new();
        let sub = bus.subscribe("counter", 32);
        let (handle, mut snapshots) = CounterHandle::spawn(sub, CounterSettings::default());
        let latest = handle.subscribe();

        bus.publish(BusMessage::Input(event(100, Channel::ButtonA)));
        bus.publish(BusMessage::Input(event(1100, Channel::ButtonA)));

        let _ = snapshots.recv().await;
        let snapshot = latest.borrow().clone().expect("latest snapshot present");
        assert_eq!(snapshot.index, 0);
        assert_eq!(snapshot.total, 1);
    }
}
