//! Owner of the session's single physical channel.

use std::sync::Arc;
use std::time::Duration;

use parley_config::AppConfig;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::registry::{EventHandler, HandlerRegistry, SubscriptionId};
use super::retry::{Backoff, RetryDecision};
use super::state::{ConnectionState, ConnectionStateMachine};
use super::transport::{ChannelHandle, Connector, Credentials, TransportError, TransportFrame};
use crate::timers::{TimerFired, TimerKey, TimerSender, Timers};
use crate::types::{EventKind, InboundEvent, MessagingError, MessagingResult, OutboundEvent};

/// Result of one handshake, stamped with the attempt that produced it.
pub struct AttemptOutcome {
    generation: u64,
    result: Result<ChannelHandle, TransportError>,
}

/// Something the connection needs the session loop to act on.
pub enum ConnectionEvent {
    Frame(TransportFrame),
    Attempt(AttemptOutcome),
}

struct InFlight {
    generation: u64,
    task: AbortHandle,
}

/// Drives `Disconnected -> Connecting -> Connected`, reconnects with
/// backoff, and fans inbound events out to registered handlers.
///
/// Handshakes run on their own task so the session loop keeps serving
/// commands and timers while one is in flight. Their results come back
/// through [`next_event`] and are applied with [`on_attempt_finished`].
///
/// No other component holds the channel; they emit through [`send`] and
/// observe through [`on`].
///
/// [`next_event`]: ConnectionManager::next_event
/// [`on_attempt_finished`]: ConnectionManager::on_attempt_finished
/// [`send`]: ConnectionManager::send
/// [`on`]: ConnectionManager::on
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    machine: ConnectionStateMachine,
    credentials: Option<Credentials>,
    channel: Option<ChannelHandle>,
    registry: HandlerRegistry,
    backoff: Backoff,
    connect_timeout: Duration,
    timers: Timers,
    generation: u64,
    in_flight: Option<InFlight>,
    outcomes_tx: mpsc::UnboundedSender<AttemptOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<AttemptOutcome>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: &AppConfig, timer_tx: TimerSender) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            machine: ConnectionStateMachine::default(),
            credentials: None,
            channel: None,
            registry: HandlerRegistry::new(),
            backoff: Backoff::new(&config.reconnect),
            connect_timeout: config.session.connect_timeout(),
            timers: Timers::new(timer_tx),
            generation: 0,
            in_flight: None,
            outcomes_tx,
            outcomes_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// A session is active from `connect` until `disconnect`, including
    /// while waiting to reconnect.
    pub fn has_session(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.timers.is_armed(&TimerKey::Reconnect)
    }

    pub fn handshake_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a session with `credentials` and begin the first handshake.
    ///
    /// Returns `Connecting` once the attempt is under way; its outcome
    /// arrives through [`next_event`](Self::next_event). Transport faults are
    /// never errors here. Connecting while a session is active is a logic
    /// error.
    pub fn connect(&mut self, credentials: Credentials) -> MessagingResult<ConnectionState> {
        if self.has_session() {
            return Err(MessagingError::AlreadyConnected);
        }

        info!("starting session");
        self.credentials = Some(credentials);
        self.backoff.reset();
        Ok(self.establish())
    }

    fn establish(&mut self) -> ConnectionState {
        let Some(credentials) = self.credentials.clone() else {
            return self.state();
        };

        // Never build a second channel while the first is alive.
        self.channel = None;
        if let Err(error) = self.machine.begin_connect() {
            warn!(%error, "skipping connection attempt");
            return self.state();
        }

        self.generation += 1;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let connect_timeout = self.connect_timeout;
        let outcomes = self.outcomes_tx.clone();

        let task = tokio::spawn(async move {
            let result = tokio::time::timeout(connect_timeout, connector.open(&credentials))
                .await
                .unwrap_or(Err(TransportError::Timeout));
            let _ = outcomes.send(AttemptOutcome { generation, result });
        });

        debug!(generation, "handshake started");
        self.in_flight = Some(InFlight {
            generation,
            task: task.abort_handle(),
        });
        self.state()
    }

    /// Apply a finished handshake. Returns the resulting state, or `None`
    /// for an outcome of an attempt that was superseded or cancelled.
    pub fn on_attempt_finished(&mut self, outcome: AttemptOutcome) -> Option<ConnectionState> {
        match &self.in_flight {
            Some(in_flight) if in_flight.generation == outcome.generation => {
                self.in_flight = None;
            }
            _ => {
                debug!(generation = outcome.generation, "discarding stale handshake result");
                return None;
            }
        }

        match outcome.result {
            Ok(channel) => {
                if let Err(error) = self.machine.on_established() {
                    warn!(%error, "unexpected connection state");
                    return Some(self.state());
                }
                self.channel = Some(channel);
                self.backoff.reset();
                info!("channel established");
                self.registry.dispatch(&InboundEvent::Connect);
            }
            Err(error) => {
                if let Err(error) = self.machine.on_failed() {
                    warn!(%error, "unexpected connection state");
                }
                warn!(%error, attempt = self.backoff.attempts(), "failed to open channel");
                self.registry
                    .dispatch(&InboundEvent::error(error.to_string()));
                self.schedule_reconnect(Some(&error));
            }
        }

        Some(self.state())
    }

    fn schedule_reconnect(&mut self, cause: Option<&TransportError>) {
        if !self.has_session() {
            return;
        }

        match self.backoff.next(cause) {
            RetryDecision::RetryAfter(delay) => {
                info!(
                    attempt = self.backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.timers.arm(TimerKey::Reconnect, delay);
            }
            RetryDecision::Rejected => info!("handshake rejected; not retrying"),
            RetryDecision::Exhausted => {
                warn!(attempts = self.backoff.attempts(), "giving up on reconnecting")
            }
        }
    }

    /// Handle a fired reconnect timer. Returns the resulting state when an
    /// attempt was started.
    pub fn on_timer(&mut self, fired: &TimerFired) -> Option<ConnectionState> {
        if !self.timers.take_if_current(fired) {
            return None;
        }
        Some(self.establish())
    }

    /// Next frame from the live channel or the next finished handshake.
    /// Pends while neither exists.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        let channel = self.channel.as_mut();
        tokio::select! {
            Some(outcome) = self.outcomes_rx.recv() => ConnectionEvent::Attempt(outcome),
            frame = async move {
                match channel {
                    Some(channel) => channel.recv().await,
                    None => std::future::pending().await,
                }
            } => ConnectionEvent::Frame(frame),
        }
    }

    /// The live channel went away. Returns `false` if no channel was live.
    pub fn on_transport_lost(&mut self, reason: &str) -> bool {
        if self.machine.on_lost().is_err() {
            debug!(reason, "ignoring loss of a channel that is not connected");
            return false;
        }

        self.channel = None;
        warn!(reason, "channel lost");
        self.registry.dispatch(&InboundEvent::disconnected(reason));
        self.schedule_reconnect(None);
        true
    }

    /// Fire-and-forget emit. A no-op unless connected.
    pub fn send(&self, event: &OutboundEvent) -> bool {
        let name = event.event_type_name();
        let channel = match self.channel.as_ref() {
            Some(channel) if self.machine.is_connected() => channel,
            _ => {
                debug!(event = name, "not connected; dropping outbound event");
                return false;
            }
        };

        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, event = name, "failed to encode outbound event");
                return false;
            }
        };

        match channel.try_send(frame) {
            Ok(()) => {
                debug!(event = name, "sent");
                true
            }
            Err(error) => {
                warn!(%error, event = name, "dropping outbound event");
                false
            }
        }
    }

    /// End the session: cancel the pending reconnect and any handshake in
    /// flight, then drop the channel and every registered handler. Safe to
    /// call repeatedly.
    pub fn disconnect(&mut self) {
        self.timers.cancel_all();
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
            debug!(generation = in_flight.generation, "handshake cancelled");
        }
        self.channel = None;
        let previous = self.machine.reset();
        let had_session = self.credentials.take().is_some();
        self.backoff.reset();

        if previous == ConnectionState::Connected {
            self.registry
                .dispatch(&InboundEvent::disconnected("client disconnect"));
        }
        self.registry.clear();

        if had_session {
            info!(?previous, "session disconnected");
        }
    }

    pub fn on(&mut self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.registry.on(kind, handler)
    }

    pub fn off(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        self.registry.off(kind, id)
    }

    /// Deliver an inbound event to external subscribers
    pub fn dispatch(&mut self, event: &InboundEvent) -> usize {
        self.registry.dispatch(event)
    }
}
