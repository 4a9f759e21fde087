//! Connection lifecycle owner.
//!
//! Holds at most one live transport adapter, arbitrates manual and
//! automatic connects, owns the pending retry timer, and provides the single
//! teardown path shared by `disconnect`, reconfiguration, and `dispose`.
//!
//! Adapter events and timer expiries are funnelled through one queue and
//! applied by a single driver task. Caller operations and the driver mutate
//! the same `Core` under one mutex. Events produced by a step are appended to
//! an outbox and delivered to hooks, the broadcast dispatcher, and the status
//! watch after the lock is released, in the order they were produced.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tm_core::config::AppConfig;
use tm_core::constants::{self, close_code, close_reason};

use crate::backoff::BackoffPolicy;
use crate::error::ConnectionError;
use crate::events::{ChatMessage, CloseInfo, ConnectionEvent, ConnectionHooks, EventDispatcher};
use crate::state::{ConnectionState, ConnectionStatus, Effect, MachineEvent, StateMachine};
use crate::transport::{compose_url, redact, Transport, TransportEvent, TransportEventSink, TransportHandle};

/// Connection parameters. Replaced wholesale on reconfiguration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Target WebSocket address.
    pub address: String,
    /// Credential bound to the address as a query parameter.
    pub token: String,
    /// Consecutive reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay policy between attempts.
    pub backoff: BackoffPolicy,
    /// Connect on construction and whenever the target changes.
    pub auto_connect: bool,
}

impl ConnectionConfig {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            max_reconnect_attempts: constants::reconnect::MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            auto_connect: true,
        }
    }

    /// Build from the persisted application configuration.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            address: config.server.address.clone(),
            token: config.server.token.clone(),
            max_reconnect_attempts: config.reconnect.max_attempts,
            backoff: BackoffPolicy::from(&config.reconnect),
            auto_connect: config.reconnect.auto_connect,
        }
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.backoff.initial_delay = delay;
        self
    }

    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    pub fn with_reconnect_decay(mut self, decay: f64) -> Self {
        self.backoff.decay = decay;
        self
    }

    pub fn with_reconnect_jitter(mut self, jitter: Duration) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Both address and credential are present.
    pub fn has_target(&self) -> bool {
        !self.address.is_empty() && !self.token.is_empty()
    }

    fn same_target(&self, other: &Self) -> bool {
        self.address == other.address && self.token == other.token
    }
}

/// Inputs consumed by the driver task.
pub(crate) enum Input {
    Transport { adapter: u64, event: TransportEvent },
    RetryDue { ticket: u64 },
    SettleDue { ticket: u64 },
}

struct AdapterSlot {
    id: u64,
    handle: Box<dyn TransportHandle>,
}

/// Exists iff the status is `Reconnecting`.
struct PendingRetry {
    attempt: u32,
    ticket: u64,
    delay: Duration,
    timer: JoinHandle<()>,
}

/// Deferred connect after a teardown, so the old adapter's close can flush.
struct PendingSettle {
    ticket: u64,
    timer: JoinHandle<()>,
}

struct Core {
    config: ConnectionConfig,
    machine: StateMachine,
    adapter: Option<AdapterSlot>,
    retry: Option<PendingRetry>,
    settle: Option<PendingSettle>,
    auto_reconnect: bool,
    disposed: bool,
    adapters_opened: u64,
    next_ticket: u64,
    outbox: Vec<ConnectionEvent>,
    dispatching: bool,
}

impl Core {
    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            debug!(attempt = retry.attempt, "cancelling pending retry");
            retry.timer.abort();
        }
    }

    fn cancel_settle(&mut self) {
        if let Some(settle) = self.settle.take() {
            settle.timer.abort();
        }
    }

    fn set_status_event(&mut self) {
        self.outbox.push(ConnectionEvent::StatusChanged(self.machine.status()));
    }

    fn debug_check(&self) {
        let status = self.machine.status();
        debug_assert_eq!(
            self.retry.is_some(),
            matches!(status, ConnectionStatus::Reconnecting { .. }),
            "pending retry must exist exactly while reconnecting (status {status})"
        );
        debug_assert_eq!(
            self.adapter.is_some(),
            matches!(
                status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected | ConnectionStatus::Error
            ),
            "adapter liveness out of sync with status {status}"
        );
    }
}

struct Shared {
    core: Mutex<Core>,
    transport: Arc<dyn Transport>,
    hooks: ConnectionHooks,
    dispatcher: EventDispatcher,
    status_tx: watch::Sender<ConnectionStatus>,
    inputs: mpsc::UnboundedSender<Input>,
    runtime: Handle,
}

/// Owner of one resilient connection.
///
/// Must be created inside a Tokio runtime. All operations return
/// immediately; failures are recorded as the last error and, for sends,
/// reported through the boolean result. Call [`ConnectionManager::dispose`]
/// when done; dropping the owner disposes it as well.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create the owner. Connects immediately when `auto_connect` is set
    /// and both address and credential are present.
    pub fn new(
        config: ConnectionConfig,
        hooks: ConnectionHooks,
        transport: impl Transport,
    ) -> Self {
        let (inputs, input_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let auto_connect = config.auto_connect && config.has_target();

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                machine: StateMachine::new(config.max_reconnect_attempts),
                config,
                adapter: None,
                retry: None,
                settle: None,
                auto_reconnect: true,
                disposed: false,
                adapters_opened: 0,
                next_ticket: 0,
                outbox: Vec::new(),
                dispatching: false,
            }),
            transport: Arc::new(transport),
            hooks,
            dispatcher: EventDispatcher::default(),
            status_tx,
            inputs,
            runtime: Handle::current(),
        });

        let driver = shared.runtime.spawn(drive(Arc::downgrade(&shared), input_rx));
        let manager = Self { shared, driver };

        if auto_connect {
            manager.connect();
        }
        manager
    }

    /// Open a connection. No-op while an adapter is live or after dispose;
    /// rejected in `Failed` (use [`reconnect`](Self::reconnect)). Records
    /// an error and changes nothing when address or credential is missing.
    pub fn connect(&self) {
        {
            let mut core = self.shared.lock_core();
            self.shared.connect_locked(&mut core);
            core.debug_check();
        }
        self.shared.flush();
    }

    /// Disable automatic reconnection, cancel any pending retry, close the
    /// live adapter with code 1000, and move to `Disconnected`. Idempotent.
    pub fn disconnect(&self) {
        self.disconnect_with_reason(close_reason::CLIENT_DISCONNECT);
    }

    /// [`disconnect`](Self::disconnect) with a caller-chosen close reason.
    pub fn disconnect_with_reason(&self, reason: &str) {
        {
            let mut core = self.shared.lock_core();
            if core.disposed {
                return;
            }
            info!(reason, "disconnect requested");
            core.auto_reconnect = false;
            self.shared.teardown(&mut core, reason);
            core.debug_check();
        }
        self.shared.flush();
    }

    /// Disconnect, then re-enable automatic reconnection with a fresh
    /// attempt counter and connect after a short settle delay. Leaves
    /// `Failed`.
    pub fn reconnect(&self) {
        {
            let mut core = self.shared.lock_core();
            if core.disposed {
                warn!("reconnect ignored: connection owner disposed");
                return;
            }
            info!("manual reconnect requested");
            self.shared.teardown(&mut core, close_reason::CLIENT_DISCONNECT);
            core.auto_reconnect = true;
            core.machine.reset_attempts();
            self.shared.schedule_settle(&mut core);
            core.debug_check();
        }
        self.shared.flush();
    }

    /// Replace the configuration. When address or credential changed, the
    /// current adapter (if any) is closed with a distinguishing reason
    /// before a new one is scheduled, so two adapters never run at once.
    pub fn reconfigure(&self, config: ConnectionConfig) {
        {
            let mut core = self.shared.lock_core();
            if core.disposed {
                return;
            }
            let target_changed = !core.config.same_target(&config);
            if core.machine.set_max_attempts(config.max_reconnect_attempts) {
                core.set_status_event();
            }
            core.config = config;

            if target_changed {
                info!(address = %core.config.address, "connection target changed");
                self.shared.teardown(&mut core, close_reason::RECONFIGURED);
                if core.config.auto_connect && core.config.has_target() {
                    core.auto_reconnect = true;
                    self.shared.schedule_settle(&mut core);
                }
            }
            core.debug_check();
        }
        self.shared.flush();
    }

    /// Point the connection at a new address and credential.
    pub fn update_target(&self, address: impl Into<String>, token: impl Into<String>) {
        let mut config = self.config();
        config.address = address.into();
        config.token = token.into();
        self.reconfigure(config);
    }

    /// Serialize and send a payload. True only when connected and the
    /// transport accepted it; otherwise the reason is recorded as the last
    /// error and the status is left alone. Nothing is buffered.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(&text),
            Err(e) => {
                warn!(error = %e, "failed to serialize outgoing payload");
                self.shared.lock_core().machine.record_error(ConnectionError::SendFailed);
                false
            }
        }
    }

    /// Send a raw text payload as-is. Same gating as [`send_message`](Self::send_message).
    pub fn send_text(&self, text: &str) -> bool {
        let mut core = self.shared.lock_core();
        if core.machine.status() != ConnectionStatus::Connected {
            debug!(status = %core.machine.status(), "send rejected: not connected");
            core.machine.record_error(ConnectionError::NotConnected);
            return false;
        }
        let sent = core
            .adapter
            .as_ref()
            .map(|slot| slot.handle.send(text.to_string()))
            .unwrap_or(false);
        if !sent {
            warn!("transport refused outgoing payload");
            core.machine.record_error(ConnectionError::SendFailed);
        }
        sent
    }

    /// Tear down for good: no reconnection, timers cancelled, the live
    /// adapter closed with code 1000 and reason "Owner disposed". Later
    /// calls to any operation are ignored. Safe mid-reconnect-wait.
    pub fn dispose(&self) {
        {
            let mut core = self.shared.lock_core();
            if core.disposed {
                debug!("dispose called more than once");
                return;
            }
            core.disposed = true;
            core.auto_reconnect = false;
            core.cancel_retry();
            core.cancel_settle();
            if let Some(slot) = core.adapter.take() {
                info!(adapter = slot.id, "closing adapter: owner disposed");
                slot.handle.close(close_code::NORMAL, close_reason::OWNER_DISPOSED);
            }
            let _ = core.machine.apply(MachineEvent::Disconnect, false);
            core.outbox.clear();
        }
        self.driver.abort();
        self.shared.status_tx.send_replace(ConnectionStatus::Disconnected);
        info!("connection owner disposed");
    }

    // -- Observers --

    /// Full state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock_core().machine.state().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock_core().machine.status()
    }

    /// Observer-facing status string, e.g. "Reconnecting (1/5)".
    pub fn status_text(&self) -> String {
        self.status().to_string()
    }

    pub fn last_message(&self) -> Option<Value> {
        self.shared.lock_core().machine.state().last_message.clone()
    }

    /// The last message parsed as a chat payload, if it is one.
    pub fn last_chat_message(&self) -> Option<ChatMessage> {
        self.last_message().as_ref().and_then(ChatMessage::from_value)
    }

    pub fn last_error(&self) -> Option<ConnectionError> {
        self.shared.lock_core().machine.state().last_error.clone()
    }

    /// Reconnection attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.shared.lock_core().machine.attempt()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Connecting, or waiting to reconnect.
    pub fn is_connecting(&self) -> bool {
        self.status().is_connecting()
    }

    pub fn is_disconnected(&self) -> bool {
        self.status().is_disconnected()
    }

    /// `Error` or `Failed`.
    pub fn is_error(&self) -> bool {
        self.status().is_error()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock_core().disposed
    }

    /// Delay chosen for the pending retry, if one is scheduled.
    pub fn pending_retry_delay(&self) -> Option<Duration> {
        self.shared.lock_core().retry.as_ref().map(|r| r.delay)
    }

    /// Total adapters created by this owner.
    pub fn adapters_opened(&self) -> u64 {
        self.shared.lock_core().adapters_opened
    }

    pub fn config(&self) -> ConnectionConfig {
        self.shared.lock_core().config.clone()
    }

    /// Subscribe to every connection event.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.dispatcher.subscribe()
    }

    /// Watch status changes.
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect_locked(&self, core: &mut Core) {
        if core.disposed {
            warn!("connect ignored: connection owner disposed");
            return;
        }
        if let Some(slot) = &core.adapter {
            debug!(adapter = slot.id, status = %core.machine.status(), "connect ignored: adapter already live");
            return;
        }
        if core.machine.status() == ConnectionStatus::Failed {
            warn!("connect ignored: reconnection attempts exhausted, reconnect() required");
            return;
        }
        core.auto_reconnect = true;
        self.open_adapter(core, MachineEvent::Connect);
    }

    /// Validate the target, transition to `Connecting`, and create the adapter.
    fn open_adapter(&self, core: &mut Core, event: MachineEvent) {
        let url = if core.config.has_target() {
            compose_url(&core.config.address, &core.config.token)
        } else {
            Err(ConnectionError::MissingTarget)
        };
        let url = match url {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "cannot open connection");
                core.machine.record_error(err);
                if event == MachineEvent::RetryDue {
                    let _ = core.machine.apply(MachineEvent::Disconnect, false);
                    core.set_status_event();
                }
                return;
            }
        };

        if !core.machine.opens_on(event) {
            warn!(status = %core.machine.status(), %event, "connect rejected by state machine");
            return;
        }

        // Nothing is committed until the transport has handed back an adapter
        let id = core.adapters_opened + 1;
        info!(adapter = id, url = %redact(&url), attempt = core.machine.attempt(), "opening connection");
        let sink = TransportEventSink::new(id, self.inputs.clone(), self.runtime.clone());
        let handle = self.transport.open(&url, sink);
        core.adapters_opened = id;
        if let Err(e) = core.machine.apply(event, core.auto_reconnect) {
            warn!(error = %e, "connect rejected by state machine");
            handle.close(close_code::NORMAL, close_reason::CLIENT_DISCONNECT);
            return;
        }
        core.cancel_retry();
        core.cancel_settle();
        core.adapter = Some(AdapterSlot { id, handle });
        core.set_status_event();
    }

    /// Cancel timers, close and detach the live adapter with a clean code,
    /// and drive the machine to `Disconnected`.
    fn teardown(&self, core: &mut Core, reason: &str) {
        core.cancel_retry();
        core.cancel_settle();

        let closed = core.adapter.take().map(|slot| {
            info!(adapter = slot.id, reason, "closing adapter");
            slot.handle.close(close_code::NORMAL, reason);
        });

        let before = core.machine.status();
        let _ = core.machine.apply(MachineEvent::Disconnect, core.auto_reconnect);
        if before != ConnectionStatus::Disconnected {
            core.set_status_event();
        }
        if closed.is_some() {
            core.outbox
                .push(ConnectionEvent::Closed(CloseInfo::new(Some(close_code::NORMAL), reason)));
        }
    }

    fn schedule_retry(&self, core: &mut Core, attempt: u32) {
        let delay = core.config.backoff.delay(attempt);
        let ticket = core.ticket();
        let inputs = self.inputs.clone();
        let deadline = Instant::now() + delay;
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = inputs.send(Input::RetryDue { ticket });
        });
        warn!(
            "reconnection attempt {attempt}/{} in {:.1}s",
            core.machine.max_attempts(),
            delay.as_secs_f64()
        );
        core.retry = Some(PendingRetry { attempt, ticket, delay, timer });
    }

    fn schedule_settle(&self, core: &mut Core) {
        core.cancel_settle();
        let ticket = core.ticket();
        let inputs = self.inputs.clone();
        let deadline = Instant::now() + Duration::from_millis(constants::SETTLE_DELAY_MS);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = inputs.send(Input::SettleDue { ticket });
        });
        core.settle = Some(PendingSettle { ticket, timer });
    }

    fn handle_input(&self, input: Input) {
        let mut core = self.lock_core();
        if core.disposed {
            return;
        }
        match input {
            Input::Transport { adapter, event } => {
                if core.adapter.as_ref().map(|slot| slot.id) != Some(adapter) {
                    debug!(adapter, ?event, "ignoring event from superseded adapter");
                    return;
                }
                self.on_transport_event(&mut core, adapter, event);
            }
            Input::RetryDue { ticket } => match core.retry.take() {
                Some(retry) if retry.ticket == ticket => {
                    debug!(attempt = retry.attempt, "retry timer fired");
                    self.open_adapter(&mut core, MachineEvent::RetryDue);
                }
                other => {
                    core.retry = other;
                    debug!(ticket, "ignoring stale retry timer");
                }
            },
            Input::SettleDue { ticket } => match core.settle.take() {
                Some(settle) if settle.ticket == ticket => self.connect_locked(&mut core),
                other => core.settle = other,
            },
        }
        core.debug_check();
    }

    fn on_transport_event(&self, core: &mut Core, adapter: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if let Err(e) = core.machine.apply(MachineEvent::Opened, core.auto_reconnect) {
                    warn!(adapter, error = %e, "unexpected open");
                    return;
                }
                info!(adapter, "connected");
                core.set_status_event();
                core.outbox.push(ConnectionEvent::Opened);
            }
            TransportEvent::Message(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    core.machine.record_message(value.clone());
                    core.outbox.push(ConnectionEvent::Message(value));
                }
                Err(e) => {
                    warn!(adapter, error = %e, "failed to decode inbound frame");
                    let err = ConnectionError::Decode(e.to_string());
                    core.machine.record_error(err.clone());
                    core.outbox.push(ConnectionEvent::Error(err));
                }
            },
            TransportEvent::Errored(detail) => {
                if let Err(e) = core.machine.apply(MachineEvent::Errored, core.auto_reconnect) {
                    warn!(adapter, error = %e, "unexpected transport error");
                    return;
                }
                warn!(adapter, %detail, "transport error");
                let err = ConnectionError::Transport(detail);
                core.machine.record_error(err.clone());
                core.set_status_event();
                core.outbox.push(ConnectionEvent::Error(err));
            }
            TransportEvent::Closed { code, reason } => {
                // The adapter is finished; drop it without calling into it.
                core.adapter = None;
                let effect = match core.machine.apply(MachineEvent::Closed { code }, core.auto_reconnect) {
                    Ok(effect) => effect,
                    Err(e) => {
                        warn!(adapter, error = %e, "unexpected close");
                        return;
                    }
                };
                info!(adapter, ?code, %reason, status = %core.machine.status(), "connection closed");
                match effect {
                    Effect::ScheduleRetry { attempt } => self.schedule_retry(core, attempt),
                    Effect::GaveUp => error!(
                        max = core.machine.max_attempts(),
                        "maximum reconnection attempts reached"
                    ),
                    Effect::None => {}
                }
                core.set_status_event();
                core.outbox.push(ConnectionEvent::Closed(CloseInfo::new(code, reason)));
            }
        }
    }

    /// Deliver queued events outside the lock. Re-entrant calls (a hook
    /// calling back into the owner) only enqueue; the outer call drains.
    fn flush(&self) {
        {
            let mut core = self.lock_core();
            if core.dispatching {
                return;
            }
            core.dispatching = true;
        }
        loop {
            let batch = {
                let mut core = self.lock_core();
                if core.outbox.is_empty() {
                    core.dispatching = false;
                    return;
                }
                std::mem::take(&mut core.outbox)
            };
            for event in batch {
                self.deliver(event);
            }
        }
    }

    fn deliver(&self, event: ConnectionEvent) {
        if let ConnectionEvent::StatusChanged(status) = &event {
            self.status_tx.send_replace(*status);
        }
        self.hooks.invoke(&event);
        self.dispatcher.dispatch(event);
    }
}

async fn drive(shared: Weak<Shared>, mut inputs: mpsc::UnboundedReceiver<Input>) {
    while let Some(input) = inputs.recv().await {
        let Some(owner) = shared.upgrade() else {
            break;
        };
        owner.handle_input(input);
        owner.flush();
    }
}
