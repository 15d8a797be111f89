// crates/core/src/connection.rs
//! Live-updates channel lifecycle and reconnection policy.
//!
//! [`ConnectionManager`] tracks `Disconnected -> Connecting -> Connected`
//! for a transport hidden behind [`Connector`]. Failed attempts and
//! unexpected link loss schedule a retry from the configured delay table
//! until `max_failed_attempts` consecutive failures are reached; after that
//! (or after a manual [`ConnectionManager::stop`]) retries halt and
//! [`ConnectionManager::is_manual_reconnect_needed`] reports `true`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, SimulatedLinkConfig};
use crate::error::TransportError;
use crate::rng::SharedRng;
use crate::subscribers::{SubscriberSet, Subscription};
use crate::timeline::Timeline;
use crate::types::ConnectionState;

/// Identity of one connect attempt and of the link it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Transport underneath the live-updates channel.
///
/// Every call names the attempt it belongs to, so tearing down a stale
/// attempt never touches a newer link.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish `link`. Raced against the configured connect timeout.
    async fn connect(&self, link: LinkId) -> Result<(), TransportError>;

    /// Resolve when the established `link` goes away unexpectedly.
    async fn closed(&self, link: LinkId) -> TransportError;

    /// Tear down `link` if `connect` left it open.
    async fn disconnect(&self, _link: LinkId) {}
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub retry_pending: bool,
    pub needs_manual_reconnect: bool,
}

#[derive(Default)]
struct Inner {
    failed_attempts: u32,
    /// Retries already scheduled since the last successful connect.
    retry_count: usize,
    manually_stopped: bool,
    /// Bumped by `stop` and `manual_reconnect` so in-flight attempts and
    /// link watchers from an older generation are ignored.
    epoch: u64,
    /// Source of fresh `LinkId`s.
    next_link: u64,
    /// Link currently reported as `Connected`.
    live: Option<LinkId>,
    retry: Option<Timeline>,
    link: Option<Timeline>,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    rng: SharedRng,
    state_tx: watch::Sender<ConnectionState>,
    observers: SubscriberSet<ConnectionState>,
    inner: Mutex<Inner>,
    timers: Timeline,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>, rng: SharedRng) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            connector,
            rng,
            state_tx,
            observers: SubscriberSet::new(),
            inner: Mutex::new(Inner::default()),
            timers: Timeline::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Mutex poisoned in connection manager, recovering");
            poisoned.into_inner()
        })
    }

    // -- State ----------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver that always holds the current state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn on_connection_state_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.observers.add(callback)
    }

    pub fn off_connection_state_changed(&self, subscription: Subscription) -> bool {
        self.observers.remove(subscription)
    }

    pub fn failed_attempts(&self) -> u32 {
        self.lock().failed_attempts
    }

    pub fn is_manual_reconnect_needed(&self) -> bool {
        let inner = self.lock();
        self.state() == ConnectionState::Disconnected
            && (inner.manually_stopped || inner.failed_attempts >= self.config.max_failed_attempts)
    }

    pub fn stats(&self) -> ConnectionStats {
        let inner = self.lock();
        let state = self.state();
        ConnectionStats {
            state,
            failed_attempts: inner.failed_attempts,
            max_failed_attempts: self.config.max_failed_attempts,
            retry_pending: inner.retry.is_some(),
            needs_manual_reconnect: state == ConnectionState::Disconnected
                && (inner.manually_stopped
                    || inner.failed_attempts >= self.config.max_failed_attempts),
        }
    }

    /// Update the state while `inner` is held; returns the state observers
    /// must hear about once the lock is released.
    fn transition(&self, next: ConnectionState) -> Option<ConnectionState> {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        changed.then_some(next)
    }

    fn announce(&self, change: Option<ConnectionState>) {
        if let Some(state) = change {
            self.observers.notify(state);
        }
    }

    // -- Commands -------------------------------------------------------------

    /// Connect unless already `Connected` or `Connecting`.
    ///
    /// A failure is returned to the caller and also feeds the automatic
    /// retry policy.
    pub async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let Some((epoch, link)) = self.begin_attempt(None) else {
            return Ok(());
        };
        self.run_attempt(epoch, link).await
    }

    /// Stop the channel. Auto-retry halts until `start` or `manual_reconnect`.
    pub async fn stop(&self) {
        let (live, change) = {
            let mut inner = self.lock();
            inner.manually_stopped = true;
            inner.epoch += 1;
            inner.retry_count = 0;
            cancel_timers(&mut inner);
            (inner.live.take(), self.transition(ConnectionState::Disconnected))
        };
        self.announce(change);
        self.observers.clear();
        if let Some(link) = live {
            self.connector.disconnect(link).await;
        }
        info!("live updates stopped");
    }

    /// Reset the failure counter, drop any stale link and connect again.
    pub async fn manual_reconnect(self: &Arc<Self>) -> Result<(), TransportError> {
        info!("manual reconnection initiated");
        let (live, change) = {
            let mut inner = self.lock();
            inner.failed_attempts = 0;
            inner.retry_count = 0;
            inner.manually_stopped = false;
            inner.epoch += 1;
            cancel_timers(&mut inner);
            (inner.live.take(), self.transition(ConnectionState::Disconnected))
        };
        self.announce(change);
        if let Some(link) = live {
            self.connector.disconnect(link).await;
        }
        self.start().await
    }

    /// Cancel retry and link timers without touching observers.
    pub fn shutdown(&self) {
        self.timers.cancel();
    }

    // -- Attempt machinery ----------------------------------------------------

    /// Move to `Connecting` if an attempt may begin. A scheduled retry passes
    /// the epoch it was scheduled in and is dropped if that generation ended.
    fn begin_attempt(&self, scheduled_in: Option<u64>) -> Option<(u64, LinkId)> {
        let (attempt, change) = {
            let mut inner = self.lock();
            match scheduled_in {
                Some(epoch) if epoch != inner.epoch || inner.manually_stopped => return None,
                Some(_) => {}
                None => inner.manually_stopped = false,
            }
            if self.state() != ConnectionState::Disconnected {
                return None;
            }
            if let Some(retry) = inner.retry.take() {
                retry.cancel();
            }
            inner.next_link += 1;
            let link = LinkId(inner.next_link);
            ((inner.epoch, link), self.transition(ConnectionState::Connecting))
        };
        self.announce(change);
        Some(attempt)
    }

    async fn run_attempt(self: &Arc<Self>, epoch: u64, link: LinkId) -> Result<(), TransportError> {
        let timeout = self.config.connect_timeout();
        debug!(%link, timeout_ms = timeout.as_millis() as u64, "connecting live updates");
        let result = match tokio::time::timeout(timeout, self.connector.connect(link)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        let connected = result.is_ok();
        let outcome = self.settle_attempt(epoch, link, result);
        if connected && outcome == Err(TransportError::Aborted) {
            self.connector.disconnect(link).await;
        }
        outcome
    }

    /// Record the result of the attempt on `link` started in `epoch`.
    fn settle_attempt(
        self: &Arc<Self>,
        epoch: u64,
        link: LinkId,
        result: Result<(), TransportError>,
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!(%link, "connection attempt superseded");
            return Err(TransportError::Aborted);
        }

        match result {
            Ok(()) => {
                inner.failed_attempts = 0;
                inner.retry_count = 0;
                inner.live = Some(link);
                let watcher = self.timers.child();
                inner.link = Some(watcher.clone());
                let change = self.transition(ConnectionState::Connected);
                drop(inner);

                info!(%link, "live updates connected");
                self.announce(change);
                self.watch_link(&watcher, epoch, link);
                Ok(())
            }
            Err(err) => {
                inner.failed_attempts += 1;
                let change = self.transition(ConnectionState::Disconnected);
                warn!(
                    attempt = inner.failed_attempts,
                    max_attempts = self.config.max_failed_attempts,
                    error = %err,
                    "live updates connection attempt failed"
                );
                self.schedule_retry(&mut inner, epoch);
                drop(inner);
                self.announce(change);
                Err(err)
            }
        }
    }

    fn watch_link(self: &Arc<Self>, watcher: &Timeline, epoch: u64, link: LinkId) {
        let connector = Arc::clone(&self.connector);
        let manager = Arc::downgrade(self);
        watcher.spawn(async move {
            let reason = connector.closed(link).await;
            if let Some(manager) = manager.upgrade() {
                manager.handle_link_lost(epoch, link, reason);
            }
        });
    }

    fn handle_link_lost(self: &Arc<Self>, epoch: u64, link: LinkId, reason: TransportError) {
        let change = {
            let mut inner = self.lock();
            if inner.epoch != epoch || inner.live != Some(link) {
                return;
            }
            inner.live = None;
            inner.link = None;
            inner.failed_attempts += 1;
            warn!(
                attempt = inner.failed_attempts,
                max_attempts = self.config.max_failed_attempts,
                error = %reason,
                %link,
                "live updates connection closed unexpectedly"
            );
            let change = self.transition(ConnectionState::Disconnected);
            self.schedule_retry(&mut inner, epoch);
            change
        };
        self.announce(change);
    }

    fn schedule_retry(self: &Arc<Self>, inner: &mut Inner, epoch: u64) {
        if inner.manually_stopped {
            debug!("manually stopped, not scheduling reconnect");
            return;
        }
        if inner.failed_attempts >= self.config.max_failed_attempts {
            warn!(
                failed_attempts = inner.failed_attempts,
                "automatic reconnect suspended, manual reconnect required"
            );
            return;
        }

        let mut delay = self.config.retry_delay(inner.retry_count);
        if self.config.retry_jitter_ms > 0 {
            delay += Duration::from_millis(
                self.rng
                    .uniform(0.0, self.config.retry_jitter_ms as f64)
                    .round() as u64,
            );
        }
        inner.retry_count += 1;
        info!(
            retry = inner.retry_count,
            delay_ms = delay.as_millis() as u64,
            "scheduling live updates reconnect"
        );

        let timer = self.timers.child();
        let manager: Weak<Self> = Arc::downgrade(self);
        timer.schedule(delay, move || {
            if let Some(manager) = manager.upgrade() {
                // Detached from the retry timer so `begin_attempt` may cancel
                // that timer without aborting this attempt.
                tokio::spawn(async move {
                    if let Some((epoch, link)) = manager.begin_attempt(Some(epoch)) {
                        if let Err(err) = manager.run_attempt(epoch, link).await {
                            debug!(error = %err, "automatic reconnect attempt failed");
                        }
                    }
                });
            }
        });
        if let Some(old) = inner.retry.replace(timer) {
            old.cancel();
        }
    }
}

fn cancel_timers(inner: &mut Inner) {
    if let Some(retry) = inner.retry.take() {
        retry.cancel();
    }
    if let Some(link) = inner.link.take() {
        link.cancel();
    }
}

// ============================================================================
// Simulated transport
// ============================================================================

/// In-process stand-in for a push-notification hub.
///
/// Handshakes take a random latency and fail with `failure_rate`. While
/// connected, a heartbeat drops the link with `heartbeat_drop_rate`. Each
/// open link owns its drop signal, so a wake-up meant for one link can
/// never reach another.
pub struct SimulatedConnector {
    config: SimulatedLinkConfig,
    rng: SharedRng,
    open: Mutex<HashMap<LinkId, Arc<Notify>>>,
}

impl SimulatedConnector {
    pub fn new(config: SimulatedLinkConfig, rng: SharedRng) -> Self {
        Self {
            config,
            rng,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn links(&self) -> MutexGuard<'_, HashMap<LinkId, Arc<Notify>>> {
        self.open.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Mutex poisoned in simulated connector, recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.links().is_empty()
    }

    /// Links currently open, oldest first.
    pub fn open_links(&self) -> Vec<LinkId> {
        let mut links: Vec<LinkId> = self.links().keys().copied().collect();
        links.sort();
        links
    }

    /// Force every open link to drop, as if the network went away.
    pub fn simulate_connection_loss(&self) {
        for signal in self.links().values() {
            signal.notify_one();
        }
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, link: LinkId) -> Result<(), TransportError> {
        tokio::time::sleep(self.rng.delay(self.config.handshake_latency)).await;
        if self.rng.chance(self.config.failure_rate) {
            return Err(TransportError::ConnectFailed(
                "simulated handshake failure".to_string(),
            ));
        }
        self.links().insert(link, Arc::new(Notify::new()));
        Ok(())
    }

    async fn closed(&self, link: LinkId) -> TransportError {
        let Some(signal) = self.links().get(&link).cloned() else {
            return TransportError::ConnectionLost("link not open".to_string());
        };
        let reason = if self.config.heartbeat_interval_ms == 0 || self.config.heartbeat_drop_rate <= 0.0 {
            signal.notified().await;
            "connection dropped"
        } else {
            let period = Duration::from_millis(self.config.heartbeat_interval_ms);
            let mut heartbeat =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = signal.notified() => break "connection dropped",
                    _ = heartbeat.tick() => {
                        if self.rng.chance(self.config.heartbeat_drop_rate) {
                            break "heartbeat lost";
                        }
                    }
                }
            }
        };
        self.links().remove(&link);
        TransportError::ConnectionLost(reason.to_string())
    }

    async fn disconnect(&self, link: LinkId) {
        self.links().remove(&link);
    }
}
