//! Multi-relay subscription coordinator.
//!
//! One task per relay connects, sends `REQ`, and forwards what the relay
//! returns into a shared channel. The [`Subscription`] consuming that
//! channel validates every event, drops ids it has already delivered, and
//! tracks which relays have sent end-of-stored-events.
//!
//! ```text
//!  relay A ─┐
//!  relay B ─┼─ mpsc (url, Event) ─► validate ─► dedup ─► (url, Event)
//!  relay C ─┘        watch {url: Pending|Eose|Failed} ─► settled()
//! ```
//!
//! Settlement never cancels the subscription: relays keep streaming live
//! events after EOSE, and events that arrive after the settlement deadline
//! are still delivered.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use braid_core::config::RelayConfig;
use braid_core::event::{Event, validate_event};
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, instrument, trace, warn};

use crate::connection::{Connector, RelayTransport, WsConnector};
use crate::error::RelayError;
use crate::message::{ClientMessage, Filter, RelayMessage};

/// How long `unsubscribe` waits for each relay task to wind down.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub relays: Vec<String>,
    /// Deadline for every relay to reach EOSE after `subscribe`.
    pub settle_timeout: Duration,
    /// Per-relay wait for an `OK` after publishing.
    pub publish_timeout: Duration,
}

impl CoordinatorConfig {
    #[must_use]
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            relays: config.urls.clone(),
            settle_timeout: Duration::from_millis(config.settle_timeout_ms),
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
        }
    }
}

impl From<&RelayConfig> for CoordinatorConfig {
    fn from(config: &RelayConfig) -> Self {
        Self::from_relay_config(config)
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Pending,
    Eose,
    Failed,
}

type StatusMap = BTreeMap<String, RelayState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettleReason {
    /// Every relay either sent EOSE or failed.
    AllEose,
    /// The settle deadline passed with relays still pending.
    Timeout,
    /// Every relay failed.
    NoRelayReachable,
}

/// Snapshot of where each relay stood when the subscription settled.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Settlement {
    pub reason: SettleReason,
    pub eose: Vec<String>,
    pub failed: Vec<String>,
    pub pending: Vec<String>,
}

impl Settlement {
    fn from_status(status: &StatusMap, deadline_passed: bool) -> Self {
        let mut eose = Vec::new();
        let mut failed = Vec::new();
        let mut pending = Vec::new();
        for (url, state) in status {
            match state {
                RelayState::Eose => eose.push(url.clone()),
                RelayState::Failed => failed.push(url.clone()),
                RelayState::Pending => pending.push(url.clone()),
            }
        }

        let reason = if !status.is_empty() && failed.len() == status.len() {
            SettleReason::NoRelayReachable
        } else if deadline_passed && !pending.is_empty() {
            SettleReason::Timeout
        } else {
            SettleReason::AllEose
        };

        Self {
            reason,
            eose,
            failed,
            pending,
        }
    }

    /// Results may be incomplete: not every relay reached EOSE.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() || !self.pending.is_empty()
    }

    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.eose.len() + self.failed.len() + self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Counters for the merged delivery path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// A live subscription across every configured relay.
///
/// Yields `(relay_url, event)` pairs, each event id at most once, only for
/// events that pass validation. Also a [`Stream`]. Dropping the
/// subscription signals every relay task to send `CLOSE` and disconnect.
pub struct Subscription {
    id: String,
    events: mpsc::UnboundedReceiver<(String, Event)>,
    status: watch::Receiver<StatusMap>,
    // Held so the status channel outlives the relay tasks.
    _status_tx: Arc<watch::Sender<StatusMap>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    seen: HashSet<String>,
    stats: DeliveryStats,
    deadline: Instant,
    closed: bool,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn stats(&self) -> DeliveryStats {
        self.stats
    }

    /// Next validated, not-yet-seen event. `None` once every relay task has
    /// ended and the buffer is drained.
    pub async fn recv(&mut self) -> Option<(String, Event)> {
        self.next().await
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&mut self) -> Option<(String, Event)> {
        while let Ok((url, event)) = self.events.try_recv() {
            if let Some(item) = self.admit(url, event) {
                return Some(item);
            }
        }
        None
    }

    /// Resolves once every relay has sent EOSE or failed, or when the
    /// settle deadline passes, whichever comes first.
    ///
    /// The returned future does not borrow the subscription, so it can be
    /// raced against [`Self::recv`].
    pub fn settled(&self) -> impl Future<Output = Settlement> + Send + 'static {
        let mut status = self.status.clone();
        let deadline = self.deadline;
        async move {
            let finished = tokio::time::timeout_at(
                deadline,
                status.wait_for(|map| map.values().all(|s| *s != RelayState::Pending)),
            )
            .await
            .is_ok_and(|waited| waited.is_ok());
            let snapshot = status.borrow().clone();
            Settlement::from_status(&snapshot, !finished)
        }
    }

    /// Send `CLOSE` to every relay, close the sockets, and wait for the
    /// relay tasks to finish. Calling it again is a no-op.
    pub async fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.shutdown.send(true);

        for mut handle in self.tasks.drain(..) {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "relay task ended abnormally"),
                Err(_) => {
                    warn!("relay task did not stop in time; aborting");
                    handle.abort();
                }
            }
        }
        self.events.close();
        debug!(subscription = %self.id, "unsubscribed");
    }

    /// The subscription as a `Stream` of `(relay_url, event)`.
    pub fn into_stream(self) -> impl Stream<Item = (String, Event)> + Send + Unpin {
        self
    }

    fn admit(&mut self, relay: String, event: Event) -> Option<(String, Event)> {
        if let Err(rejection) = validate_event(&event) {
            if rejection.is_forgery() {
                warn!(relay = %relay, event_id = %event.id, %rejection, "dropping forged event");
            } else {
                debug!(relay = %relay, event_id = %event.id, %rejection, "dropping invalid event");
            }
            self.stats.rejected += 1;
            return None;
        }

        if !self.seen.insert(event.id.clone()) {
            trace!(relay = %relay, event_id = %event.short_id(), "duplicate delivery");
            self.stats.duplicates += 1;
            return None;
        }

        self.stats.delivered += 1;
        Some((relay, event))
    }
}

impl Stream for Subscription {
    type Item = (String, Event);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some((url, event)) = ready!(self.events.poll_recv(cx)) else {
                return Poll::Ready(None);
            };
            if let Some(item) = self.admit(url, event) {
                return Poll::Ready(Some(item));
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.shutdown.send(true);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("relays", &self.status.borrow().len())
            .field("stats", &self.stats)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Result of a one-shot [`Coordinator::fetch`].
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub events: Vec<(String, Event)>,
    pub settlement: Settlement,
    pub stats: DeliveryStats,
}

/// Per-relay outcome of [`Coordinator::publish`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PublishReport {
    pub accepted: Vec<String>,
    /// `(relay, message)` for relays that answered `OK false`.
    pub rejected: Vec<(String, String)>,
    /// `(relay, reason)` for relays that could not be reached or never
    /// answered.
    pub unreachable: Vec<(String, String)>,
}

impl PublishReport {
    #[must_use]
    pub fn any_accepted(&self) -> bool {
        !self.accepted.is_empty()
    }
}

enum PublishOutcome {
    Accepted,
    Rejected(String),
    Unreachable(String),
}

pub struct Coordinator {
    config: CoordinatorConfig,
    connector: Arc<dyn Connector>,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: CoordinatorConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    /// Coordinator over real WebSocket connections.
    #[must_use]
    pub fn websocket(config: CoordinatorConfig) -> Self {
        Self::new(config, Arc::new(WsConnector::default()))
    }

    #[must_use]
    pub fn relays(&self) -> &[String] {
        &self.config.relays
    }

    /// Open `filters` on every configured relay.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoRelays`] if no relay is configured.
    #[instrument(skip_all, fields(relays = self.config.relays.len()))]
    pub fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription, RelayError> {
        let relays = unique_relays(&self.config.relays);
        if relays.is_empty() {
            return Err(RelayError::NoRelays);
        }

        let id = format!("braid-{:016x}", rand::random::<u64>());
        let initial: StatusMap = relays
            .iter()
            .map(|url| (url.clone(), RelayState::Pending))
            .collect();
        let (status_tx, status_rx) = watch::channel(initial);
        let status_tx = Arc::new(status_tx);
        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let filters = Arc::new(filters);
        let tasks = relays
            .into_iter()
            .map(|url| {
                let worker = RelayWorker {
                    url,
                    subscription_id: id.clone(),
                    filters: Arc::clone(&filters),
                    events: events_tx.clone(),
                    status: Arc::clone(&status_tx),
                };
                let connector = Arc::clone(&self.connector);
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(async move { worker.run(connector.as_ref(), shutdown).await })
            })
            .collect();

        info!(subscription = %id, "subscription opened");
        Ok(Subscription {
            id,
            events: events_rx,
            status: status_rx,
            _status_tx: status_tx,
            shutdown: shutdown_tx,
            tasks,
            seen: HashSet::new(),
            stats: DeliveryStats::default(),
            deadline: Instant::now() + self.config.settle_timeout,
            closed: false,
        })
    }

    /// Subscribe, collect everything delivered until settlement, then tear
    /// the subscription down.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoRelays`] with no relays configured and
    /// [`RelayError::NoRelayReachable`] when every relay failed.
    #[instrument(skip_all, fields(relays = self.config.relays.len()))]
    pub async fn fetch(&self, filters: Vec<Filter>) -> Result<FetchResult, RelayError> {
        let mut subscription = self.subscribe(filters)?;
        let settled = subscription.settled();
        tokio::pin!(settled);

        let mut events = Vec::new();
        let settlement = loop {
            tokio::select! {
                settlement = &mut settled => break settlement,
                item = subscription.recv() => match item {
                    Some(item) => events.push(item),
                    None => break subscription.settled().await,
                },
            }
        };
        while let Some(item) = subscription.try_recv() {
            events.push(item);
        }
        subscription.unsubscribe().await;

        if settlement.reason == SettleReason::NoRelayReachable {
            warn!(failed = ?settlement.failed, "could not reach any relay");
            return Err(RelayError::NoRelayReachable);
        }
        if settlement.is_partial() {
            warn!(
                reason = ?settlement.reason,
                failed = ?settlement.failed,
                pending = ?settlement.pending,
                "partial settlement; results may be incomplete"
            );
        }

        Ok(FetchResult {
            events,
            settlement,
            stats: subscription.stats(),
        })
    }

    /// Send `event` to every relay concurrently and collect their answers.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoRelays`] with no relays configured and
    /// [`RelayError::NoRelayReachable`] when no relay answered at all.
    #[instrument(skip_all, fields(event_id = %event.short_id()))]
    pub async fn publish(&self, event: &Event) -> Result<PublishReport, RelayError> {
        let relays = unique_relays(&self.config.relays);
        if relays.is_empty() {
            return Err(RelayError::NoRelays);
        }

        let outcomes = join_all(relays.iter().map(|url| self.publish_to(url, event))).await;

        let mut report = PublishReport::default();
        for (url, outcome) in relays.into_iter().zip(outcomes) {
            match outcome {
                PublishOutcome::Accepted => report.accepted.push(url),
                PublishOutcome::Rejected(message) => {
                    warn!(relay = %url, %message, "relay rejected event");
                    report.rejected.push((url, message));
                }
                PublishOutcome::Unreachable(reason) => {
                    warn!(relay = %url, %reason, "relay unreachable during publish");
                    report.unreachable.push((url, reason));
                }
            }
        }

        if report.accepted.is_empty() && report.rejected.is_empty() {
            return Err(RelayError::NoRelayReachable);
        }
        info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            unreachable = report.unreachable.len(),
            "event published"
        );
        Ok(report)
    }

    async fn publish_to(&self, url: &str, event: &Event) -> PublishOutcome {
        let waited = self.config.publish_timeout;
        match tokio::time::timeout(waited, self.exchange(url, event)).await {
            Ok(Ok((true, _))) => PublishOutcome::Accepted,
            Ok(Ok((false, message))) => PublishOutcome::Rejected(message),
            Ok(Err(e)) => PublishOutcome::Unreachable(e.to_string()),
            Err(_) => PublishOutcome::Unreachable(
                RelayError::Timeout {
                    url: url.to_string(),
                    waited,
                }
                .to_string(),
            ),
        }
    }

    async fn exchange(&self, url: &str, event: &Event) -> Result<(bool, String), RelayError> {
        let mut transport = self.connector.connect(url).await?;
        let answer = await_ok(transport.as_mut(), event).await;
        if let Err(e) = transport.close().await {
            debug!(relay = url, error = %e, "close after publish failed");
        }
        answer
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn await_ok(
    transport: &mut dyn RelayTransport,
    event: &Event,
) -> Result<(bool, String), RelayError> {
    transport
        .send(&ClientMessage::Event(Box::new(event.clone())))
        .await?;
    loop {
        match transport.recv().await {
            Ok(Some(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            })) if event_id.eq_ignore_ascii_case(&event.id) => return Ok((accepted, message)),
            Ok(Some(RelayMessage::Notice(notice))) => {
                debug!(relay = transport.url(), %notice, "relay notice");
            }
            Ok(Some(_)) | Err(RelayError::Codec(_)) => {}
            Ok(None) => return Err(RelayError::Closed(transport.url().to_string())),
            Err(e) => return Err(e),
        }
    }
}

/// Configured relays with duplicates removed, order kept.
fn unique_relays(relays: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    relays
        .iter()
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Relay task
// ---------------------------------------------------------------------------

struct RelayWorker {
    url: String,
    subscription_id: String,
    filters: Arc<Vec<Filter>>,
    events: mpsc::UnboundedSender<(String, Event)>,
    status: Arc<watch::Sender<StatusMap>>,
}

impl RelayWorker {
    async fn run(self, connector: &dyn Connector, mut shutdown: watch::Receiver<bool>) {
        let connected = tokio::select! {
            result = connector.connect(&self.url) => result,
            _ = shutdown.changed() => return,
        };
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                warn!(relay = %self.url, error = %e, "relay unreachable");
                self.settle(RelayState::Failed);
                return;
            }
        };

        let request = ClientMessage::Req {
            subscription_id: self.subscription_id.clone(),
            filters: self.filters.as_ref().clone(),
        };
        if let Err(e) = transport.send(&request).await {
            warn!(relay = %self.url, error = %e, "could not send subscription");
            self.settle(RelayState::Failed);
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    self.close(transport.as_mut()).await;
                    return;
                }
                frame = transport.recv() => {
                    if !self.handle(frame) {
                        self.settle(RelayState::Failed);
                        return;
                    }
                }
            }
        }
    }

    /// Returns `false` when the relay is done with this subscription.
    fn handle(&self, frame: Result<Option<RelayMessage>, RelayError>) -> bool {
        match frame {
            Ok(Some(RelayMessage::Event {
                subscription_id,
                event,
            })) if subscription_id == self.subscription_id => {
                // The receiver is gone once the subscription is dropped.
                self.events.send((self.url.clone(), *event)).is_ok()
            }
            Ok(Some(RelayMessage::Eose(subscription_id)))
                if subscription_id == self.subscription_id =>
            {
                debug!(relay = %self.url, "end of stored events");
                self.settle(RelayState::Eose);
                true
            }
            Ok(Some(RelayMessage::Closed {
                subscription_id,
                message,
            })) if subscription_id == self.subscription_id => {
                warn!(relay = %self.url, %message, "relay closed subscription");
                false
            }
            Ok(Some(RelayMessage::Notice(notice))) => {
                info!(relay = %self.url, %notice, "relay notice");
                true
            }
            Ok(Some(other)) => {
                trace!(relay = %self.url, frame = ?other, "ignoring frame");
                true
            }
            Ok(None) => {
                debug!(relay = %self.url, "relay closed connection");
                false
            }
            Err(RelayError::Codec(e)) => {
                debug!(relay = %self.url, error = %e, "skipping malformed frame");
                true
            }
            Err(e) => {
                warn!(relay = %self.url, error = %e, "relay connection lost");
                false
            }
        }
    }

    /// Moves this relay out of `Pending`. Later transitions are ignored, so
    /// a relay that disconnects after EOSE stays settled as EOSE.
    fn settle(&self, state: RelayState) {
        self.status.send_if_modified(|map| match map.get_mut(&self.url) {
            Some(current) if *current == RelayState::Pending => {
                *current = state;
                true
            }
            _ => false,
        });
    }

    async fn close(&self, transport: &mut dyn RelayTransport) {
        let close = ClientMessage::Close(self.subscription_id.clone());
        if let Err(e) = transport.send(&close).await {
            debug!(relay = %self.url, error = %e, "could not send CLOSE");
        }
        if let Err(e) = transport.close().await {
            debug!(relay = %self.url, error = %e, "could not close connection");
        }
    }
}
