// crates/core/src/bus.rs
//! Progress event bus with simulated network delivery.
//!
//! Publishing while the live-updates channel is not `Connected` drops the
//! event; there is no replay buffer. While connected, each event is either
//! lost (with `packet_loss_rate`) or delivered to a snapshot of the current
//! subscribers, each after its own random delay. Ordering across publishes
//! is not guaranteed.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::BusConfig;
use crate::rng::SharedRng;
use crate::subscribers::{invoke_isolated, SubscriberSet, Subscription};
use crate::timeline::Timeline;
use crate::types::{ConnectionState, JobProgressUpdate};

/// What happened to one published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Channel not connected; event discarded.
    Offline,
    /// Simulated packet loss.
    Lost,
    /// Deliveries scheduled for this many subscribers.
    Scheduled(usize),
}

/// Counters for published events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    pub published: u64,
    pub dropped_offline: u64,
    pub lost: u64,
}

pub struct ProgressEventBus {
    config: BusConfig,
    connection: watch::Receiver<ConnectionState>,
    rng: SharedRng,
    subscribers: SubscriberSet<JobProgressUpdate>,
    deliveries: Timeline,
    published: AtomicU64,
    dropped_offline: AtomicU64,
    lost: AtomicU64,
}

impl ProgressEventBus {
    /// `connection` gates delivery; it normally comes from
    /// [`crate::ConnectionManager::watch_state`].
    pub fn new(
        config: BusConfig,
        connection: watch::Receiver<ConnectionState>,
        rng: SharedRng,
    ) -> Self {
        Self {
            config,
            connection,
            rng,
            subscribers: SubscriberSet::new(),
            deliveries: Timeline::new(),
            published: AtomicU64::new(0),
            dropped_offline: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(JobProgressUpdate) + Send + Sync + 'static,
    {
        self.subscribers.add(callback)
    }

    /// Subscribe with an unbounded channel instead of a callback.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<JobProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |update| {
            // Receiver dropped means the consumer is gone; nothing to do.
            let _ = tx.send(update);
        });
        (subscription, rx)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.subscribers.remove(subscription)
    }

    pub fn unsubscribe_all(&self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&self, update: JobProgressUpdate) -> PublishOutcome {
        self.published.fetch_add(1, Ordering::Relaxed);

        let state = *self.connection.borrow();
        if state != ConnectionState::Connected {
            self.dropped_offline.fetch_add(1, Ordering::Relaxed);
            debug!(job_id = %update.job_id, %state, "live updates offline, progress update dropped");
            return PublishOutcome::Offline;
        }

        if self.rng.chance(self.config.packet_loss_rate) {
            self.lost.fetch_add(1, Ordering::Relaxed);
            warn!(job_id = %update.job_id, status = ?update.status, "simulated packet loss, progress update dropped");
            return PublishOutcome::Lost;
        }

        let callbacks = self.subscribers.snapshot();
        for callback in &callbacks {
            let delay = self.rng.delay(self.config.delivery_delay);
            let callback = callback.clone();
            self.deliveries.schedule(delay, move || {
                debug!(
                    job_id = %update.job_id,
                    status = ?update.status,
                    progress = update.progress,
                    delay_ms = delay.as_millis() as u64,
                    "progress update delivered"
                );
                invoke_isolated(&callback, update);
            });
        }
        debug!(
            job_id = %update.job_id,
            status = ?update.status,
            progress = update.progress,
            subscribers = callbacks.len(),
            "progress update scheduled"
        );
        PublishOutcome::Scheduled(callbacks.len())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            dropped_offline: self.dropped_offline.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }

    /// Cancel every delivery still in flight.
    pub fn shutdown(&self) {
        self.deliveries.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MillisRange;
    use crate::types::JobStatus;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn quiet_config() -> BusConfig {
        BusConfig {
            packet_loss_rate: 0.0,
            delivery_delay: MillisRange::new(50, 350),
        }
    }

    fn update(progress: u8) -> JobProgressUpdate {
        JobProgressUpdate {
            job_id: Uuid::new_v4(),
            status: JobStatus::Running,
            progress,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_offline_is_dropped() {
        let (_tx, rx) = watch::channel(ConnectionState::Disconnected);
        let bus = ProgressEventBus::new(quiet_config(), rx, SharedRng::seeded(1));
        let (_sub, mut events) = bus.subscribe_channel();

        assert_eq!(bus.publish(update(10)), PublishOutcome::Offline);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(bus.stats().dropped_offline, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_arrives_within_delay_window() {
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let bus = ProgressEventBus::new(quiet_config(), rx, SharedRng::seeded(2));
        let (_sub, mut events) = bus.subscribe_channel();

        let sent = update(33);
        assert_eq!(bus.publish(sent), PublishOutcome::Scheduled(1));

        tokio::time::sleep(Duration::from_millis(49)).await;
        assert!(events.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(302)).await;
        assert_eq!(events.try_recv().unwrap(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_packet_loss_delivers_nothing() {
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let config = BusConfig {
            packet_loss_rate: 1.0,
            ..quiet_config()
        };
        let bus = ProgressEventBus::new(config, rx, SharedRng::seeded(3));
        let (_sub, mut events) = bus.subscribe_channel();

        for p in 0..5 {
            assert_eq!(bus.publish(update(p)), PublishOutcome::Lost);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(bus.stats().lost, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_subscriber_does_not_block_others() {
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let bus = ProgressEventBus::new(quiet_config(), rx, SharedRng::seeded(4));
        bus.subscribe(|_| panic!("bad subscriber"));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(update(1)), PublishOutcome::Scheduled(2));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_after_publish_still_delivers_snapshot() {
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let bus = ProgressEventBus::new(quiet_config(), rx, SharedRng::seeded(5));
        let (sub, mut events) = bus.subscribe_channel();

        bus.publish(update(7));
        assert!(bus.unsubscribe(sub));
        bus.publish(update(8));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(events.try_recv().unwrap().progress, 7);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_follows_connection_state() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        let bus = ProgressEventBus::new(quiet_config(), rx, SharedRng::seeded(6));
        assert_eq!(bus.publish(update(1)), PublishOutcome::Offline);
        tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(bus.publish(update(2)), PublishOutcome::Scheduled(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_deliveries() {
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let bus = ProgressEventBus::new(quiet_config(), rx, SharedRng::seeded(7));
        let (_sub, mut events) = bus.subscribe_channel();
        bus.publish(update(9));
        bus.shutdown();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.try_recv().is_err());
    }

    /// Log sink shared between the subscriber and the assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_delivery_is_logged_at_debug() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let bus = ProgressEventBus::new(quiet_config(), rx, SharedRng::seeded(8));
        let (_first, _first_rx) = bus.subscribe_channel();
        let (_second, _second_rx) = bus.subscribe_channel();

        bus.publish(update(40));
        assert!(!logs.text().contains("progress update delivered"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let text = logs.text();
        assert_eq!(text.matches("progress update delivered").count(), 2);
        assert!(text.contains("status=Running"));
        assert!(text.contains("progress=40"));
    }
}
