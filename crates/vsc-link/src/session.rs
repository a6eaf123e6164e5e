//! Transport session: one connection, one command in flight.
//!
//! `send` enqueues a `PendingCommand` on a FIFO channel owned by a single
//! dispatcher task. The dispatcher sleeps the throttle delay, installs the
//! command in the "current" slot, writes it, and waits for the notify pump
//! to complete the `ResponseBuffer` or for the class timeout to expire.
//! In-flight commands are never retried: resending while the adapter is
//! searching makes it abort with `STOPPED`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::ResponseBuffer;
use crate::config::SessionConfig;
use crate::error::{TransportError, TransportResult};
use crate::gatt::{SelectedCharacteristics, select_characteristics};
use crate::link::{BleLink, CommandTransport, LinkEvent};

/// Connection lifecycle, owned by the session and broadcast to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Discovering,
    Connected,
    Disconnecting,
}

/// Handle returned by [`TransportSession::on_state_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// A queued command awaiting its turn on the adapter.
struct PendingCommand {
    id: u64,
    command: String,
    enqueued_at: Instant,
    timeout: Duration,
    reply: oneshot::Sender<TransportResult<String>>,
}

/// The command currently on the wire.
struct InFlight {
    id: u64,
    done: oneshot::Sender<TransportResult<String>>,
}

struct LinkState {
    connection: ConnectionState,
    selected: Option<SelectedCharacteristics>,
}

struct Inner {
    link: Arc<dyn BleLink>,
    config: SessionConfig,
    state: Mutex<LinkState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    queue: Mutex<Option<mpsc::UnboundedSender<PendingCommand>>>,
    buffer: Mutex<ResponseBuffer>,
    current: Mutex<Option<InFlight>>,
    last_device: Mutex<Option<String>>,
    user_disconnect: AtomicBool,
    /// Bumped on every successful connection so a stale pump cannot tear
    /// down its successor.
    generation: AtomicU64,
    next_listener: AtomicU64,
    next_command: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serialized command/response session over a [`BleLink`].
///
/// Cheap to clone; clones share the same connection and queue.
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<Inner>,
}

impl TransportSession {
    pub fn new(link: Arc<dyn BleLink>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                link,
                config,
                state: Mutex::new(LinkState {
                    connection: ConnectionState::Disconnected,
                    selected: None,
                }),
                listeners: Mutex::new(Vec::new()),
                queue: Mutex::new(None),
                buffer: Mutex::new(ResponseBuffer::new()),
                current: Mutex::new(None),
                last_device: Mutex::new(None),
                user_disconnect: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                next_listener: AtomicU64::new(1),
                next_command: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.state).connection
    }

    /// The write/notify pair in use, while connected.
    pub fn selected_characteristics(&self) -> Option<SelectedCharacteristics> {
        lock(&self.inner.state).selected.clone()
    }

    /// Device id of the most recent `connect` call.
    pub fn last_device(&self) -> Option<String> {
        lock(&self.inner.last_device).clone()
    }

    /// Register a state-change listener.
    ///
    /// Listeners run synchronously on whichever task performs the
    /// transition (the caller of `connect`, the notify pump, or the
    /// reconnect task) and must not block.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Connect to `device_id`, select characteristics, and start the
    /// notify pump and command dispatcher.
    pub async fn connect(&self, device_id: &str) -> TransportResult<()> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(TransportError::Connection(format!(
                "session is {state:?}, disconnect first"
            )));
        }
        *lock(&self.inner.last_device) = Some(device_id.to_string());
        self.inner.user_disconnect.store(false, Ordering::SeqCst);
        establish(Arc::clone(&self.inner), device_id.to_string()).await
    }

    /// User-initiated disconnect: rejects queued commands and suppresses
    /// reconnection.
    pub async fn disconnect(&self) -> TransportResult<()> {
        self.inner.user_disconnect.store(true, Ordering::SeqCst);
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.inner.set_state(ConnectionState::Disconnecting);
        let result = self.inner.link.disconnect().await;
        self.inner.set_state(ConnectionState::Disconnected);
        info!("disconnected by user");
        result
    }

    /// Send one command and wait for the complete response text.
    ///
    /// Fails with `NotConnected`, `WriteFailed`, or `Timeout`.
    pub async fn send(&self, command: &str) -> TransportResult<String> {
        let command = command.trim().to_string();
        let (reply, response) = oneshot::channel();
        let pending = PendingCommand {
            id: self.inner.next_command.fetch_add(1, Ordering::Relaxed),
            timeout: self.inner.config.timeout_for(&command),
            command,
            enqueued_at: Instant::now(),
            reply,
        };

        {
            let queue = lock(&self.inner.queue);
            let tx = queue.as_ref().ok_or(TransportError::NotConnected)?;
            tx.send(pending).map_err(|_| TransportError::NotConnected)?;
        }

        response.await.unwrap_or(Err(TransportError::NotConnected))
    }
}

#[async_trait]
impl CommandTransport for TransportSession {
    async fn send(&self, command: &str) -> TransportResult<String> {
        TransportSession::send(self, command).await
    }
}

// ── Connection lifecycle ──────────────────────────────────────

/// Boxed so the reconnect task (spawned from the pump, which is spawned
/// from here) does not form a recursive future type.
fn establish(inner: Arc<Inner>, device_id: String) -> BoxFuture<'static, TransportResult<()>> {
    async move {
        inner.set_state(ConnectionState::Connecting);
        info!(device = %device_id, "connecting");

        let services = match inner.link.connect(&device_id).await {
            Ok(services) => services,
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        inner.set_state(ConnectionState::Discovering);
        let Some(chars) = select_characteristics(&services) else {
            warn!(device = %device_id, services = services.len(), "no usable characteristics");
            let _ = inner.link.disconnect().await;
            inner.set_state(ConnectionState::Disconnected);
            return Err(TransportError::NoUsableCharacteristics);
        };
        debug!(
            write = %chars.write_uuid,
            notify = %chars.notify_uuid,
            with_response = chars.write_with_response,
            "selected characteristics"
        );

        let events = match inner.link.open(&chars).await {
            Ok(events) => events,
            Err(e) => {
                let _ = inner.link.disconnect().await;
                inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&inner.buffer).clear();
        *lock(&inner.queue) = Some(tx);
        inner.enter_connected(chars.clone());

        tokio::spawn(pump(Arc::clone(&inner), events, generation));
        tokio::spawn(dispatch(Arc::clone(&inner), rx, chars, generation));
        Ok(())
    }
    .boxed()
}

fn spawn_reconnect(inner: Arc<Inner>) {
    let attempts = inner.config.max_reconnect_attempts;
    let Some(device_id) = lock(&inner.last_device).clone() else {
        return;
    };
    if attempts == 0 {
        return;
    }

    tokio::spawn(async move {
        for attempt in 1..=attempts {
            tokio::time::sleep(inner.config.reconnect_delay()).await;
            if inner.user_disconnect.load(Ordering::SeqCst) {
                info!("reconnection cancelled by user disconnect");
                return;
            }
            if lock(&inner.state).connection != ConnectionState::Disconnected {
                return;
            }
            match establish(Arc::clone(&inner), device_id.clone()).await {
                Ok(()) => {
                    info!(attempt, device = %device_id, "reconnected");
                    return;
                }
                Err(e) => warn!(attempt, max = attempts, error = %e, "reconnect failed"),
            }
        }
        warn!(device = %device_id, "giving up on reconnection");
    });
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = {
            let mut state = lock(&self.state);
            let previous = state.connection;
            state.connection = next;
            if next != ConnectionState::Connected {
                state.selected = None;
            }
            previous
        };
        if previous == next {
            return;
        }
        if previous == ConnectionState::Connected {
            self.drain();
        }
        info!(from = ?previous, to = ?next, "connection state changed");
        self.notify(next);
    }

    /// Characteristics and state are set under one lock so the session is
    /// never `Connected` without a selected pair.
    fn enter_connected(&self, chars: SelectedCharacteristics) {
        {
            let mut state = lock(&self.state);
            state.selected = Some(chars);
            state.connection = ConnectionState::Connected;
        }
        info!(to = ?ConnectionState::Connected, "connection state changed");
        self.notify(ConnectionState::Connected);
    }

    fn notify(&self, state: ConnectionState) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(state);
        }
    }

    /// True while `generation` is the live connection.
    fn is_live(&self, generation: u64) -> bool {
        lock(&self.state).connection == ConnectionState::Connected
            && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Clear the in-flight slot if it still holds command `id`.
    fn release(&self, id: u64) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|f| f.id == id) {
            current.take();
        }
    }

    /// Reject the in-flight command and close the queue; the dispatcher
    /// rejects whatever is still buffered in it.
    fn drain(&self) {
        lock(&self.queue).take();
        if let Some(in_flight) = lock(&self.current).take() {
            debug!(id = in_flight.id, "rejecting in-flight command");
            let _ = in_flight.done.send(Err(TransportError::NotConnected));
        }
        lock(&self.buffer).clear();
    }

    fn on_fragment(&self, fragment: &[u8]) {
        let mut buffer = lock(&self.buffer);
        buffer.append(fragment);
        let Some(text) = buffer.take_complete() else {
            return;
        };
        match lock(&self.current).take() {
            Some(in_flight) => {
                let _ = in_flight.done.send(Ok(text));
            }
            None => debug!(response = %text.escape_debug(), "discarding unsolicited response"),
        }
    }

    fn on_link_lost(self: &Arc<Self>, generation: u64) {
        if generation != self.generation.load(Ordering::SeqCst)
            || self.user_disconnect.load(Ordering::SeqCst)
        {
            return;
        }
        if lock(&self.state).connection != ConnectionState::Connected {
            return;
        }
        warn!("link lost unexpectedly");
        self.set_state(ConnectionState::Disconnected);
        spawn_reconnect(Arc::clone(self));
    }
}

// ── Background tasks ──────────────────────────────────────────

async fn pump(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<LinkEvent>, generation: u64) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Data(fragment) => inner.on_fragment(&fragment),
            LinkEvent::Disconnected => break,
        }
    }
    inner.on_link_lost(generation);
}

async fn dispatch(
    inner: Arc<Inner>,
    mut queue: mpsc::UnboundedReceiver<PendingCommand>,
    chars: SelectedCharacteristics,
    generation: u64,
) {
    while let Some(cmd) = queue.recv().await {
        if !inner.is_live(generation) {
            let _ = cmd.reply.send(Err(TransportError::NotConnected));
            continue;
        }
        tokio::time::sleep(inner.config.throttle()).await;

        debug!(
            id = cmd.id,
            command = %cmd.command,
            queued_ms = cmd.enqueued_at.elapsed().as_millis() as u64,
            "dispatching"
        );
        let result = execute(&inner, &chars, &cmd, generation).await;
        match &result {
            Ok(text) => debug!(id = cmd.id, response = %text.escape_debug(), "response"),
            Err(e) => debug!(id = cmd.id, command = %cmd.command, error = %e, "command failed"),
        }
        let _ = cmd.reply.send(result);
    }
}

async fn execute(
    inner: &Inner,
    chars: &SelectedCharacteristics,
    cmd: &PendingCommand,
    generation: u64,
) -> TransportResult<String> {
    let (done, completion) = oneshot::channel();
    {
        // Installed under the state lock: either the link is still up and a
        // later drain rejects this command, or it already dropped and the
        // command never reaches the wire.
        let state = lock(&inner.state);
        if state.connection != ConnectionState::Connected
            || inner.generation.load(Ordering::SeqCst) != generation
        {
            return Err(TransportError::NotConnected);
        }
        lock(&inner.buffer).clear();
        *lock(&inner.current) = Some(InFlight { id: cmd.id, done });
    }

    let mut bytes = cmd.command.clone().into_bytes();
    bytes.push(b'\r');
    if let Err(e) = inner.link.write(chars, &bytes).await {
        inner.release(cmd.id);
        return Err(TransportError::WriteFailed(e.to_string()));
    }

    match tokio::time::timeout(cmd.timeout, completion).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(TransportError::NotConnected),
        Err(_) => {
            inner.release(cmd.id);
            Err(TransportError::Timeout {
                command: cmd.command.clone(),
                timeout_ms: cmd.timeout.as_millis() as u64,
            })
        }
    }
}
