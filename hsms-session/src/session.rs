//! HSMS session
//!
//! One `HsmsSession` owns at most one connection (a "link") at a time. Each
//! link runs three tasks:
//! - a reader that frames and dispatches incoming messages,
//! - a writer that drains the outbound queue in FIFO order,
//! - an optional linktest heartbeat.
//!
//! All three share a cancellation token. Tearing a link down cancels the
//! token, fails every outstanding transaction and records the separation
//! time used for T5.

use crate::config::{ConnectionMode, HsmsConfig};
use crate::events::{ChannelEventListener, SessionEvent, SessionEventListener};
use crate::frame::{HsmsFrame, build_frame, encode_payload, read_frame};
use crate::header::{
    HsmsHeader, REJECT_PTYPE_NOT_SUPPORTED, REJECT_TRANSACTION_NOT_OPEN, SELECT_STATUS_ACTIVE,
    SELECT_STATUS_OK, SType,
};
use crate::state::ConnectionState;
use crate::statistics::SessionStatistics;
use bytes::Bytes;
use hsms_transport::{HsmsStream, TcpAcceptor, TcpSettings, TcpTransport, TransportLayer};
use secs_core::{SecsError, SecsMessage, SecsResult, Timer};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Session id carried by control messages
const CONTROL_SESSION_ID: u16 = 0xFFFF;

type ReplySender = oneshot::Sender<SecsResult<SecsMessage>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_connected() -> SecsError {
    SecsError::InvalidState("Session is not connected".to_string())
}

/// Answer to a control request
#[derive(Debug, Clone, Copy)]
struct ControlReply {
    stype: SType,
    status: u8,
}

/// How an outgoing data message is correlated
enum Outgoing {
    /// Fresh primary, no reply awaited
    Primary,
    /// Fresh primary whose reply is routed to the waiter
    Request(ReplySender),
    /// Secondary that already carries the request's system bytes
    Reply,
}

struct Link {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Bytes>,
}

struct SessionInner {
    config: HsmsConfig,
    device_id: AtomicU16,
    state: watch::Sender<ConnectionState>,
    system_bytes: AtomicU32,
    link: Mutex<Option<Link>>,
    next_link_id: AtomicU64,
    /// Serializes connect, attach and disconnect
    lifecycle: tokio::sync::Mutex<()>,
    /// Bumped on every entry into NOT-SELECTED so stale T7 timers expire quietly
    not_selected_epoch: AtomicU64,
    last_activity: Mutex<Instant>,
    separated_at: Mutex<Option<Instant>>,
    control_failures: AtomicU32,
    replies: Mutex<HashMap<u32, ReplySender>>,
    controls: Mutex<HashMap<u32, oneshot::Sender<ControlReply>>>,
    statistics: Mutex<SessionStatistics>,
    listeners: RwLock<Vec<Arc<dyn SessionEventListener>>>,
}

/// HSMS session handle
///
/// Cheap to clone; clones share the same connection. Call
/// [`disconnect`](Self::disconnect) to release the connection, dropping the
/// handles does not stop the background tasks of a live link.
#[derive(Clone)]
pub struct HsmsSession {
    inner: Arc<SessionInner>,
}

impl HsmsSession {
    pub fn new(config: HsmsConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                device_id: AtomicU16::new(config.device_id),
                config,
                state,
                system_bytes: AtomicU32::new(0),
                link: Mutex::new(None),
                next_link_id: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
                not_selected_epoch: AtomicU64::new(0),
                last_activity: Mutex::new(Instant::now()),
                separated_at: Mutex::new(None),
                control_failures: AtomicU32::new(0),
                replies: Mutex::new(HashMap::new()),
                controls: Mutex::new(HashMap::new()),
                statistics: Mutex::new(SessionStatistics::new()),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &HsmsConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_selected(&self) -> bool {
        self.state().is_selected()
    }

    /// Handle that does not keep the session alive
    ///
    /// Listeners that answer messages hold one of these to avoid a
    /// reference cycle through the listener list.
    pub fn downgrade(&self) -> WeakHsmsSession {
        WeakHsmsSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Session id stamped on outgoing primaries
    pub fn device_id(&self) -> u16 {
        self.inner.device_id()
    }

    pub fn statistics(&self) -> SessionStatistics {
        lock(&self.inner.statistics).clone()
    }

    /// Register a listener for state changes, received messages and timer expiries
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Subscribe to session events through a channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (listener, rx) = ChannelEventListener::new();
        self.add_listener(Arc::new(listener));
        rx
    }

    /// Connect actively over TCP and select the session
    ///
    /// An existing connection is closed first, and the call waits out T5
    /// since the previous separation.
    ///
    /// # Errors
    /// - `SecsError::Connect` if the address is invalid or TCP connect fails
    /// - `SecsError::Timeout(Timer::T6)` if Select.rsp does not arrive; the
    ///   connection stays NOT-SELECTED under T7 supervision
    /// - `SecsError::Rejected` if the peer refuses the selection
    pub async fn connect(&self, address: &str, port: u16, device_id: u16) -> SecsResult<()> {
        self.inner.device_id.store(device_id, Ordering::Relaxed);
        let settings = TcpSettings::with_timeout(address, port, self.inner.config.connect_timeout);
        self.connect_with(&TcpTransport::new(settings)).await
    }

    /// Connect actively through any transport and select the session
    ///
    /// # Errors
    /// Returns `SecsError::InvalidState` for a passive session
    pub async fn connect_with<T: TransportLayer>(&self, transport: &T) -> SecsResult<()> {
        self.inner.ensure_mode(ConnectionMode::Active)?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.close_current("reconnect").await;
        self.inner.wait_t5().await;

        log::info!("Connecting to {}", transport.endpoint());
        self.inner.set_state(ConnectionState::Connecting, 0);
        let stream = match transport.open().await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Connect to {} failed: {}", transport.endpoint(), e);
                self.inner.set_state(ConnectionState::Disconnected, 0);
                return Err(e);
            }
        };
        let link_id = self.inner.start_link(stream);
        self.inner.select(link_id).await
    }

    /// Run the active side over an already connected stream
    pub async fn connect_stream<S: HsmsStream>(&self, stream: S) -> SecsResult<()> {
        self.inner.ensure_mode(ConnectionMode::Active)?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.close_current("reconnect").await;
        self.inner.set_state(ConnectionState::Connecting, 0);
        let link_id = self.inner.start_link(stream);
        self.inner.select(link_id).await
    }

    /// Accept one passive connection and wait for the peer to select
    ///
    /// Returns once the TCP connection is up; use
    /// [`wait_selected`](Self::wait_selected) to wait for Select.req.
    pub async fn accept(&self, acceptor: &TcpAcceptor) -> SecsResult<SocketAddr> {
        self.inner.ensure_mode(ConnectionMode::Passive)?;
        let (stream, peer) = acceptor.accept().await?;
        self.attach(stream).await?;
        Ok(peer)
    }

    /// Run the passive side over an already connected stream
    ///
    /// # Errors
    /// Returns `SecsError::InvalidState` for an active session
    pub async fn attach<S: HsmsStream>(&self, stream: S) -> SecsResult<()> {
        self.inner.ensure_mode(ConnectionMode::Passive)?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.close_current("new connection attached").await;
        self.inner.start_link(stream);
        Ok(())
    }

    /// Wait until the session is selected
    ///
    /// # Errors
    /// Returns `SecsError::InvalidState` if the connection drops first
    pub async fn wait_selected(&self) -> SecsResult<()> {
        let mut rx = self.inner.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ConnectionState::Selected => return Ok(()),
                ConnectionState::Disconnected => {
                    return Err(SecsError::InvalidState(
                        "Connection closed before selection".to_string(),
                    ));
                }
                _ => {}
            }
            rx.changed().await.map_err(|_| not_connected())?;
        }
    }

    /// Wait until the current connection, if any, is gone
    pub async fn wait_disconnected(&self) {
        let mut rx = self.inner.state.subscribe();
        loop {
            if *rx.borrow_and_update() == ConnectionState::Disconnected {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Send a primary message without waiting for a reply
    ///
    /// Assigns the next system bytes and this session's device id, then
    /// enqueues the frame. Never waits for the socket.
    ///
    /// # Returns
    /// The system bytes assigned to the message
    ///
    /// # Errors
    /// Returns `SecsError::InvalidState` unless selected; nothing is enqueued
    pub fn send(&self, message: SecsMessage) -> SecsResult<u32> {
        self.inner.send_data(message, Outgoing::Primary)
    }

    /// Send the reply to `request`, echoing its system bytes and session id
    pub fn reply(&self, request: &SecsMessage, message: SecsMessage) -> SecsResult<()> {
        let message = message
            .with_system_bytes(request.system_bytes)
            .with_session_id(request.session_id);
        self.inner.send_data(message, Outgoing::Reply).map(|_| ())
    }

    /// Send a primary with the W-bit set and wait up to T3 for its reply
    ///
    /// # Errors
    /// - `SecsError::Timeout(Timer::T3)` if no reply arrives in time
    /// - `SecsError::Rejected` if the peer answers with Reject.req
    /// - `SecsError::InvalidState` if the connection closes while waiting
    pub async fn request(&self, mut message: SecsMessage) -> SecsResult<SecsMessage> {
        message.w_bit = true;
        let name = message.name();
        let (tx, rx) = oneshot::channel();
        let system_bytes = self.inner.send_data(message, Outgoing::Request(tx))?;

        match tokio::time::timeout(self.inner.config.t3, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(SecsError::InvalidState(format!(
                "Connection closed while waiting for the {} reply",
                name
            ))),
            Err(_) => {
                lock(&self.inner.replies).remove(&system_bytes);
                lock(&self.inner.statistics).t3_timeouts += 1;
                log::warn!("T3 expired waiting for the {} reply (sys=0x{:08X})", name, system_bytes);
                self.inner.emit(SessionEvent::TimerExpired(Timer::T3));
                Err(SecsError::Timeout(Timer::T3))
            }
        }
    }

    /// Run a Linktest transaction
    ///
    /// # Returns
    /// The round-trip time
    pub async fn linktest(&self) -> SecsResult<Duration> {
        let link_id = self.inner.current_link_id().ok_or_else(not_connected)?;
        self.inner.linktest(link_id).await
    }

    /// Deselect (when selected) and close the connection
    ///
    /// Idempotent and safe to call on a session that never connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.close_current("disconnect requested").await;
    }

    /// Send Separate.req and close the connection without a handshake
    pub async fn separate(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let Some(link_id) = self.inner.current_link_id() else {
            return;
        };
        let header = HsmsHeader::control(
            SType::SeparateReq,
            CONTROL_SESSION_ID,
            self.inner.next_system_bytes(),
        );
        self.inner.send_control(link_id, header);
        self.inner.teardown(link_id, "separate requested");
    }
}

/// Non-owning session handle, see [`HsmsSession::downgrade`]
#[derive(Clone)]
pub struct WeakHsmsSession {
    inner: Weak<SessionInner>,
}

impl WeakHsmsSession {
    pub fn upgrade(&self) -> Option<HsmsSession> {
        self.inner.upgrade().map(|inner| HsmsSession { inner })
    }
}

impl fmt::Debug for HsmsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmsSession")
            .field("state", &self.state())
            .field("device_id", &self.device_id())
            .finish()
    }
}

impl SessionInner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn device_id(&self) -> u16 {
        self.device_id.load(Ordering::Relaxed)
    }

    /// Next system bytes value; wraps at 32 bits
    fn next_system_bytes(&self) -> u32 {
        self.system_bytes.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn ensure_mode(&self, expected: ConnectionMode) -> SecsResult<()> {
        if self.config.mode == expected {
            return Ok(());
        }
        Err(SecsError::InvalidState(format!(
            "Session is configured {:?}, not {:?}",
            self.config.mode, expected
        )))
    }

    fn current_link_id(&self) -> Option<u64> {
        lock(&self.link).as_ref().map(|link| link.id)
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn emit(&self, event: SessionEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let mut closed = false;
        for listener in &listeners {
            if listener.is_closed() {
                closed = true;
                continue;
            }
            listener.on_event(event.clone());
        }
        if closed {
            self.listeners
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|listener| !listener.is_closed());
        }
    }

    fn set_state(self: &Arc<Self>, new: ConnectionState, link_id: u64) {
        let previous = self.state.send_replace(new);
        if previous == new {
            return;
        }
        log::info!("HSMS state {} -> {}", previous, new);
        if new == ConnectionState::NotSelected {
            self.start_t7(link_id);
        }
        self.emit(SessionEvent::StateChanged {
            previous,
            current: new,
        });
    }

    fn start_link<S: HsmsStream>(self: &Arc<Self>, stream: S) -> u64 {
        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let (outbound, rx) = mpsc::unbounded_channel();
        let (reader, writer) = tokio::io::split(stream);

        *lock(&self.link) = Some(Link {
            id,
            cancel: cancel.clone(),
            outbound,
        });
        self.touch();
        self.control_failures.store(0, Ordering::Relaxed);

        tokio::spawn(Arc::clone(self).write_loop(id, writer, rx, cancel.clone()));
        tokio::spawn(Arc::clone(self).read_loop(id, reader, cancel.clone()));
        if let Some(interval) = self.config.linktest_period() {
            tokio::spawn(Arc::clone(self).linktest_loop(id, interval, cancel));
        }

        self.set_state(ConnectionState::NotSelected, id);
        id
    }

    /// Close the link `link_id` if it is still the current one
    fn teardown(self: &Arc<Self>, link_id: u64, reason: &str) {
        let link = {
            let mut guard = lock(&self.link);
            if guard.as_ref().is_some_and(|link| link.id == link_id) {
                guard.take()
            } else {
                None
            }
        };
        let Some(link) = link else {
            return;
        };

        log::info!("Closing HSMS connection: {}", reason);
        link.cancel.cancel();
        drop(link);

        // dropping the senders fails every waiter
        lock(&self.replies).clear();
        lock(&self.controls).clear();
        *lock(&self.separated_at) = Some(Instant::now());
        self.control_failures.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Disconnected, link_id);
    }

    async fn close_current(self: &Arc<Self>, reason: &str) {
        let Some(link_id) = self.current_link_id() else {
            return;
        };
        if self.state().is_selected() {
            match self.control_transaction(link_id, SType::DeselectReq).await {
                Ok(reply) => log::info!("Deselected (status {})", reply.status),
                Err(e) => log::warn!("Deselect failed, closing anyway: {}", e),
            }
        }
        self.teardown(link_id, reason);
    }

    async fn wait_t5(&self) {
        let separated = *lock(&self.separated_at);
        if let Some(at) = separated {
            let elapsed = at.elapsed();
            if elapsed < self.config.t5 {
                let wait = self.config.t5 - elapsed;
                log::info!("Waiting {:?} for T5 before reconnecting", wait);
                tokio::time::sleep(wait).await;
            }
        }
    }

    fn start_t7(self: &Arc<Self>, link_id: u64) {
        let cancel = match lock(&self.link).as_ref() {
            Some(link) if link.id == link_id => link.cancel.clone(),
            _ => return,
        };
        let epoch = self.not_selected_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(self);
        let t7 = self.config.t7;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(t7) => {
                    let stale = inner.not_selected_epoch.load(Ordering::SeqCst) != epoch;
                    if stale || inner.state() != ConnectionState::NotSelected {
                        return;
                    }
                    log::warn!("T7 expired: not selected within {:?}", t7);
                    lock(&inner.statistics).t7_timeouts += 1;
                    inner.emit(SessionEvent::TimerExpired(Timer::T7));
                    inner.teardown(link_id, "T7 timeout");
                }
            }
        });
    }

    /// Select the link actively
    async fn select(self: &Arc<Self>, link_id: u64) -> SecsResult<()> {
        let reply = self.control_transaction(link_id, SType::SelectReq).await?;
        match reply.status {
            SELECT_STATUS_OK => Ok(()),
            SELECT_STATUS_ACTIVE => {
                log::info!("Peer reports the session is already selected");
                self.set_state(ConnectionState::Selected, link_id);
                Ok(())
            }
            status => {
                log::warn!("Select refused with status {}", status);
                self.teardown(link_id, "select refused");
                Err(SecsError::Rejected(status))
            }
        }
    }

    async fn linktest(self: &Arc<Self>, link_id: u64) -> SecsResult<Duration> {
        self.state().ensure_connected()?;
        let started = Instant::now();
        self.control_transaction(link_id, SType::LinktestReq).await?;
        lock(&self.statistics).linktests += 1;
        Ok(started.elapsed())
    }

    /// Send a control request and wait up to T6 for its response
    async fn control_transaction(self: &Arc<Self>, link_id: u64, stype: SType) -> SecsResult<ControlReply> {
        let system_bytes = self.next_system_bytes();
        let (tx, rx) = oneshot::channel();
        lock(&self.controls).insert(system_bytes, tx);

        let header = HsmsHeader::control(stype, CONTROL_SESSION_ID, system_bytes);
        if let Err(e) = self.enqueue(link_id, build_frame(&header, &[])) {
            lock(&self.controls).remove(&system_bytes);
            return Err(e);
        }
        log::debug!("{} sent (sys=0x{:08X})", stype.name(), system_bytes);

        match tokio::time::timeout(self.config.t6, rx).await {
            Ok(Ok(reply)) => {
                self.control_failures.store(0, Ordering::Relaxed);
                if reply.stype == SType::RejectReq {
                    return Err(SecsError::Rejected(reply.status));
                }
                Ok(reply)
            }
            Ok(Err(_)) => Err(SecsError::InvalidState(format!(
                "Connection closed during {}",
                stype.name()
            ))),
            Err(_) => {
                lock(&self.controls).remove(&system_bytes);
                lock(&self.statistics).t6_timeouts += 1;
                let failures = self.control_failures.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "T6 expired waiting for the {} response ({} consecutive)",
                    stype.name(),
                    failures
                );
                self.emit(SessionEvent::TimerExpired(Timer::T6));
                if failures > self.config.max_control_failures {
                    self.teardown(link_id, "control transactions keep timing out");
                }
                Err(SecsError::Timeout(Timer::T6))
            }
        }
    }

    fn enqueue(&self, link_id: u64, frame: Bytes) -> SecsResult<()> {
        let guard = lock(&self.link);
        match guard.as_ref() {
            Some(link) if link.id == link_id => link
                .outbound
                .send(frame)
                .map_err(|_| SecsError::InvalidState("Writer has stopped".to_string())),
            _ => Err(not_connected()),
        }
    }

    fn send_control(&self, link_id: u64, header: HsmsHeader) {
        if let Err(e) = self.enqueue(link_id, build_frame(&header, &[])) {
            log::debug!("Dropping {}: {}", header.stype.name(), e);
        }
    }

    /// Encode and enqueue a data message
    ///
    /// System bytes are assigned and the frame queued under the link lock,
    /// so queue order matches system bytes order.
    fn send_data(&self, mut message: SecsMessage, outgoing: Outgoing) -> SecsResult<u32> {
        self.state().ensure_selected()?;
        let payload = encode_payload(&message, self.config.max_message_length)?;

        let guard = lock(&self.link);
        let link = guard.as_ref().ok_or_else(not_connected)?;
        let (fresh, waiter) = match outgoing {
            Outgoing::Reply => (false, None),
            Outgoing::Primary => (true, None),
            Outgoing::Request(tx) => (true, Some(tx)),
        };
        if fresh {
            message.system_bytes = self.next_system_bytes();
            message.session_id = self.device_id();
        }
        let waiting = waiter.is_some();
        if let Some(tx) = waiter {
            lock(&self.replies).insert(message.system_bytes, tx);
        }

        let frame = build_frame(&HsmsHeader::data(&message), &payload);
        if link.outbound.send(frame).is_err() {
            if waiting {
                lock(&self.replies).remove(&message.system_bytes);
            }
            return Err(SecsError::InvalidState("Writer has stopped".to_string()));
        }
        drop(guard);

        lock(&self.statistics).data_messages_sent += 1;
        log::debug!("Sent {}", message);
        Ok(message.system_bytes)
    }

    async fn write_loop<S: HsmsStream>(
        self: Arc<Self>,
        link_id: u64,
        mut writer: WriteHalf<S>,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
        cancel: CancellationToken,
    ) {
        loop {
            // queued frames go out before a cancellation is honoured
            let frame = tokio::select! {
                biased;
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };
            let result = tokio::select! {
                biased;
                result = write_frame(&mut writer, &frame) => result,
                _ = cancel.cancelled() => break,
            };
            if let Err(e) = result {
                log::error!("HSMS write failed: {}", e);
                self.teardown(link_id, "write failure");
                break;
            }
            log::trace!("Frame out: {} bytes", frame.len());
            self.touch();
            lock(&self.statistics).frames_sent += 1;
        }
        let _ = writer.shutdown().await;
    }

    async fn read_loop<S: HsmsStream>(
        self: Arc<Self>,
        link_id: u64,
        mut reader: ReadHalf<S>,
        cancel: CancellationToken,
    ) {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = read_frame(&mut reader, self.config.t8, self.config.max_message_length) => result,
            };
            match result {
                Ok(Some(frame)) => self.handle_frame(link_id, frame),
                Ok(None) => {
                    self.teardown(link_id, "closed by peer");
                    return;
                }
                Err(e) => {
                    if matches!(e, SecsError::Timeout(Timer::T8)) {
                        lock(&self.statistics).t8_timeouts += 1;
                        self.emit(SessionEvent::TimerExpired(Timer::T8));
                    }
                    log::error!("HSMS read failed: {}", e);
                    self.teardown(link_id, "read failure");
                    return;
                }
            }
        }
    }

    async fn linktest_loop(self: Arc<Self>, link_id: u64, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let idle = lock(&self.last_activity).elapsed();
            if idle < interval {
                continue;
            }
            log::debug!("No traffic for {:?}, sending Linktest.req", idle);
            if let Err(e) = self.linktest(link_id).await {
                log::warn!("Linktest failed: {}", e);
            }
        }
    }

    fn handle_frame(self: &Arc<Self>, link_id: u64, frame: HsmsFrame) {
        if self.current_link_id() != Some(link_id) {
            return;
        }
        self.touch();
        lock(&self.statistics).frames_received += 1;

        let header = frame.header;
        if !header.has_valid_ptype() {
            log::warn!("Rejecting message with unsupported PType {}", header.ptype);
            self.send_control(link_id, HsmsHeader::reject(&header, REJECT_PTYPE_NOT_SUPPORTED));
            return;
        }
        if header.stype.is_control() {
            log::debug!("{} received (sys=0x{:08X})", header.stype.name(), header.system_bytes);
        }

        let respond = |stype: SType, status: u8| {
            HsmsHeader::control(stype, header.session_id, header.system_bytes).with_status(status)
        };

        match header.stype {
            SType::Data => self.handle_data(&frame),
            SType::SelectReq => {
                if self.state().is_selected() {
                    self.send_control(link_id, respond(SType::SelectRsp, SELECT_STATUS_ACTIVE));
                } else {
                    self.set_state(ConnectionState::Selected, link_id);
                    self.send_control(link_id, respond(SType::SelectRsp, SELECT_STATUS_OK));
                }
            }
            SType::DeselectReq => {
                self.set_state(ConnectionState::NotSelected, link_id);
                self.send_control(link_id, respond(SType::DeselectRsp, 0));
            }
            SType::LinktestReq => self.send_control(link_id, respond(SType::LinktestRsp, 0)),
            SType::SelectRsp | SType::DeselectRsp | SType::LinktestRsp => {
                let waiter = lock(&self.controls).remove(&header.system_bytes);
                let Some(tx) = waiter else {
                    log::warn!(
                        "{} does not answer an open transaction (sys=0x{:08X})",
                        header.stype.name(),
                        header.system_bytes
                    );
                    self.send_control(link_id, HsmsHeader::reject(&header, REJECT_TRANSACTION_NOT_OPEN));
                    return;
                };
                match (header.stype, header.status()) {
                    (SType::SelectRsp, SELECT_STATUS_OK) => self.set_state(ConnectionState::Selected, link_id),
                    (SType::DeselectRsp, 0) => self.set_state(ConnectionState::NotSelected, link_id),
                    _ => {}
                }
                let _ = tx.send(ControlReply {
                    stype: header.stype,
                    status: header.status(),
                });
            }
            SType::RejectReq => {
                lock(&self.statistics).rejects_received += 1;
                log::warn!(
                    "Reject.req received (sys=0x{:08X}, reason {})",
                    header.system_bytes,
                    header.status()
                );
                let control = lock(&self.controls).remove(&header.system_bytes);
                let reply = lock(&self.replies).remove(&header.system_bytes);
                if let Some(tx) = control {
                    let _ = tx.send(ControlReply {
                        stype: SType::RejectReq,
                        status: header.status(),
                    });
                } else if let Some(tx) = reply {
                    let _ = tx.send(Err(SecsError::Rejected(header.status())));
                }
            }
            SType::SeparateReq => self.teardown(link_id, "Separate.req received"),
        }
    }

    fn handle_data(&self, frame: &HsmsFrame) {
        let message = match frame.to_message() {
            Ok(message) => message,
            Err(e) => {
                lock(&self.statistics).decode_errors += 1;
                log::warn!(
                    "Dropping undecodable S{}F{} (sys=0x{:08X}): {}",
                    frame.header.stream(),
                    frame.header.function(),
                    frame.header.system_bytes,
                    e
                );
                return;
            }
        };
        lock(&self.statistics).data_messages_received += 1;
        if !self.state().is_selected() {
            log::warn!("{} received while {}", message.name(), self.state());
        }
        log::debug!("Received {}", message);

        let message = if message.is_primary() {
            message
        } else {
            let waiter = lock(&self.replies).remove(&message.system_bytes);
            match waiter {
                Some(tx) => {
                    // waiter gone after T3: hand the reply to listeners instead
                    let Err(Ok(message)) = tx.send(Ok(message)) else {
                        return;
                    };
                    message
                }
                None => message,
            }
        };
        self.emit(SessionEvent::MessageReceived(message));
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use secs_core::SecsItem;
    use std::collections::HashSet;
    use tokio::io::DuplexStream;

    const MAX: u32 = 1 << 24;

    fn s1f1() -> SecsMessage {
        SecsMessage::new(1, 1, true).unwrap()
    }

    fn s1f2() -> SecsMessage {
        SecsMessage::new(1, 2, false)
            .unwrap()
            .with_body(SecsItem::list(vec![SecsItem::ascii("EQ"), SecsItem::ascii("1.0")]))
    }

    async fn write_header(peer: &mut DuplexStream, header: HsmsHeader, payload: &[u8]) {
        peer.write_all(&build_frame(&header, payload)).await.unwrap();
    }

    async fn next_frame(peer: &mut DuplexStream) -> HsmsFrame {
        read_frame(peer, Duration::from_secs(5), MAX).await.unwrap().unwrap()
    }

    /// Passive session attached to a raw peer that has selected it
    async fn selected_passive(config: HsmsConfig) -> (HsmsSession, DuplexStream) {
        let (local, mut peer) = tokio::io::duplex(64 * 1024);
        let session = HsmsSession::new(config);
        session.attach(local).await.unwrap();

        write_header(&mut peer, HsmsHeader::control(SType::SelectReq, 0xFFFF, 1), &[]).await;
        let rsp = next_frame(&mut peer).await;
        assert_eq!(rsp.header.stype, SType::SelectRsp);
        assert_eq!(rsp.header.status(), SELECT_STATUS_OK);
        session.wait_selected().await.unwrap();
        (session, peer)
    }

    async fn session_pair() -> (HsmsSession, HsmsSession) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let host = HsmsSession::new(HsmsConfig::active(1));
        let equipment = HsmsSession::new(HsmsConfig::passive(1));
        equipment.attach(b).await.unwrap();
        host.connect_stream(a).await.unwrap();
        equipment.wait_selected().await.unwrap();
        (host, equipment)
    }

    async fn wait_disconnected(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = rx.recv().await {
            if event.is_disconnect() {
                return;
            }
        }
        panic!("event channel closed before disconnect");
    }

    #[tokio::test]
    async fn test_select_handshake_between_sessions() {
        let (host, equipment) = session_pair().await;
        assert_eq!(host.state(), ConnectionState::Selected);
        assert_eq!(equipment.state(), ConnectionState::Selected);
    }

    #[tokio::test]
    async fn test_control_replies_echo_system_bytes() {
        let (_session, mut peer) = selected_passive(HsmsConfig::passive(0)).await;

        write_header(&mut peer, HsmsHeader::control(SType::LinktestReq, 0xFFFF, 0x1234), &[]).await;
        let rsp = next_frame(&mut peer).await;
        assert_eq!(rsp.header.stype, SType::LinktestRsp);
        assert_eq!(rsp.header.system_bytes, 0x1234);

        write_header(&mut peer, HsmsHeader::control(SType::SelectReq, 0xFFFF, 0x99), &[]).await;
        let rsp = next_frame(&mut peer).await;
        assert_eq!(rsp.header.system_bytes, 0x99);
        assert_eq!(rsp.header.status(), SELECT_STATUS_ACTIVE);
    }

    #[tokio::test]
    async fn test_linktest_between_sessions() {
        let (host, equipment) = session_pair().await;
        host.linktest().await.unwrap();
        equipment.linktest().await.unwrap();
        assert_eq!(host.statistics().linktests, 1);
    }

    #[tokio::test]
    async fn test_request_reply_correlation() {
        let (host, equipment) = session_pair().await;
        let mut events = equipment.subscribe();

        let responder = tokio::spawn(async move {
            loop {
                if let Some(SessionEvent::MessageReceived(request)) = events.recv().await {
                    assert_eq!(request.name(), "S1F1");
                    assert!(request.w_bit);
                    equipment.reply(&request, s1f2()).unwrap();
                    return request.system_bytes;
                }
            }
        });

        let reply = host.request(s1f1()).await.unwrap();
        let request_system_bytes = responder.await.unwrap();
        assert_eq!(reply.name(), "S1F2");
        assert!(!reply.w_bit);
        assert_eq!(reply.system_bytes, request_system_bytes);
        assert_eq!(reply.body, s1f2().body);
    }

    #[tokio::test]
    async fn test_send_requires_selected_session() {
        let session = HsmsSession::new(HsmsConfig::default());
        assert!(matches!(session.send(s1f1()), Err(SecsError::InvalidState(_))));
        assert!(matches!(session.request(s1f1()).await, Err(SecsError::InvalidState(_))));
        assert!(session.linktest().await.is_err());

        let session = HsmsSession::new(HsmsConfig::passive(0));
        let (local, _peer) = tokio::io::duplex(1024);
        session.attach(local).await.unwrap();
        assert_eq!(session.state(), ConnectionState::NotSelected);
        assert!(matches!(session.send(s1f1()), Err(SecsError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_connection_mode_is_enforced() {
        let passive = HsmsSession::new(HsmsConfig::passive(1));
        let (local, _peer) = tokio::io::duplex(1024);
        assert!(matches!(passive.connect_stream(local).await, Err(SecsError::InvalidState(_))));
        assert_eq!(passive.state(), ConnectionState::Disconnected);

        let active = HsmsSession::new(HsmsConfig::active(1));
        let (local, _peer) = tokio::io::duplex(1024);
        assert!(matches!(active.attach(local).await, Err(SecsError::InvalidState(_))));
        assert_eq!(active.state(), ConnectionState::Disconnected);

        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(active.accept(&acceptor).await, Err(SecsError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_active_paths_report_the_same_states() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let equipment = HsmsSession::new(HsmsConfig::passive(1));
        equipment.attach(b).await.unwrap();

        let host = HsmsSession::new(HsmsConfig::active(1).with_linktest_interval(None));
        let mut events = host.subscribe();
        host.connect_stream(a).await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::StateChanged { current, .. } = event {
                states.push(current);
            }
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::NotSelected,
                ConnectionState::Selected
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let session = HsmsSession::new(HsmsConfig::default());
        let dropped = session.subscribe();
        let mut kept = session.subscribe();
        drop(dropped);

        session.inner.emit(SessionEvent::TimerExpired(Timer::T3));
        assert_eq!(kept.recv().await, Some(SessionEvent::TimerExpired(Timer::T3)));
        assert_eq!(session.inner.listeners.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_system_bytes_wrap_around() {
        let config = HsmsConfig::passive(3).with_linktest_interval(None);
        let (session, mut peer) = selected_passive(config).await;
        session.inner.system_bytes.store(u32::MAX, Ordering::Relaxed);

        assert_eq!(session.send(SecsMessage::new(6, 11, false).unwrap()).unwrap(), 0);
        assert_eq!(session.send(SecsMessage::new(6, 11, false).unwrap()).unwrap(), 1);
        assert_eq!(next_frame(&mut peer).await.header.system_bytes, 0);
        assert_eq!(next_frame(&mut peer).await.header.system_bytes, 1);
    }

    #[tokio::test]
    async fn test_concurrent_sends_keep_queue_order() {
        const N: u32 = 32;
        let (session, mut peer) = selected_passive(HsmsConfig::passive(7)).await;

        let mut tasks = Vec::new();
        for i in 0..N {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                let message = SecsMessage::new(6, 11, false).unwrap().with_body(SecsItem::u4(i));
                session.send(message).unwrap()
            }));
        }
        let mut assigned = HashSet::new();
        for task in tasks {
            assigned.insert(task.await.unwrap());
        }

        let mut last = 0;
        let mut bodies = HashSet::new();
        for _ in 0..N {
            let frame = next_frame(&mut peer).await;
            let message = frame.to_message().unwrap();
            assert_eq!(message.session_id, 7);
            assert!(message.system_bytes > last);
            last = message.system_bytes;
            assert!(assigned.contains(&message.system_bytes));
            bodies.insert(message.body.unwrap().first_unsigned().unwrap());
        }
        assert_eq!(bodies, (0..N as u64).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_decode_error_is_contained() {
        let (session, mut peer) = selected_passive(HsmsConfig::passive(0)).await;
        let mut events = session.subscribe();

        let broken = HsmsHeader::data(&s1f1().with_system_bytes(5));
        write_header(&mut peer, broken, &[0x41, 0x09, b'X']).await;
        write_header(&mut peer, HsmsHeader::data(&s1f1().with_system_bytes(6)), &[]).await;

        loop {
            if let Some(SessionEvent::MessageReceived(message)) = events.recv().await {
                assert_eq!(message.system_bytes, 6);
                break;
            }
        }
        assert_eq!(session.state(), ConnectionState::Selected);
        assert_eq!(session.statistics().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_corrupt_length_is_fatal() {
        let (session, mut peer) = selected_passive(HsmsConfig::passive(0)).await;
        let mut events = session.subscribe();

        peer.write_all(&[0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).await.unwrap();
        wait_disconnected(&mut events).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_deselect_and_separate_from_peer() {
        let (session, mut peer) = selected_passive(HsmsConfig::passive(0)).await;
        let mut events = session.subscribe();

        write_header(&mut peer, HsmsHeader::control(SType::DeselectReq, 0xFFFF, 40), &[]).await;
        let rsp = next_frame(&mut peer).await;
        assert_eq!(rsp.header.stype, SType::DeselectRsp);
        assert_eq!(rsp.header.system_bytes, 40);
        assert_eq!(session.state(), ConnectionState::NotSelected);

        write_header(&mut peer, HsmsHeader::control(SType::SeparateReq, 0xFFFF, 41), &[]).await;
        wait_disconnected(&mut events).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reject_fails_pending_request() {
        let (session, mut peer) = selected_passive(HsmsConfig::passive(0)).await;

        let requester = {
            let session = session.clone();
            tokio::spawn(async move { session.request(s1f1()).await })
        };
        let frame = next_frame(&mut peer).await;
        write_header(&mut peer, HsmsHeader::reject(&frame.header, 4), &[]).await;

        assert!(matches!(requester.await.unwrap(), Err(SecsError::Rejected(4))));
        assert_eq!(session.statistics().rejects_received, 1);
    }

    #[tokio::test]
    async fn test_unsupported_ptype_is_rejected() {
        let (_session, mut peer) = selected_passive(HsmsConfig::passive(0)).await;
        let header = HsmsHeader {
            ptype: 2,
            ..HsmsHeader::data(&s1f1().with_system_bytes(77))
        };
        write_header(&mut peer, header, &[]).await;

        let reject = next_frame(&mut peer).await;
        assert_eq!(reject.header.stype, SType::RejectReq);
        assert_eq!(reject.header.system_bytes, 77);
        assert_eq!(reject.header.status(), REJECT_PTYPE_NOT_SUPPORTED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_t3_reply_timeout() {
        let (session, _peer) = selected_passive(HsmsConfig::passive(0)).await;
        let result = session.request(s1f1()).await;
        assert!(matches!(result, Err(SecsError::Timeout(Timer::T3))));
        assert_eq!(session.statistics().t3_timeouts, 1);
        assert_eq!(session.state(), ConnectionState::Selected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_t6_select_timeout_keeps_connection() {
        let (local, _peer) = tokio::io::duplex(1024);
        let session = HsmsSession::new(HsmsConfig::active(0).with_t7(Duration::from_secs(60)));
        let result = session.connect_stream(local).await;
        assert!(matches!(result, Err(SecsError::Timeout(Timer::T6))));
        assert_eq!(session.state(), ConnectionState::NotSelected);
        assert_eq!(session.statistics().t6_timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_t6_expiries_tear_down_connection() {
        let config = HsmsConfig::passive(0).with_linktest_interval(None);
        let budget = config.max_control_failures;
        let (session, _peer) = selected_passive(config).await;

        for _ in 0..budget {
            assert!(matches!(session.linktest().await, Err(SecsError::Timeout(Timer::T6))));
            assert_eq!(session.state(), ConnectionState::Selected);
        }
        assert!(matches!(session.linktest().await, Err(SecsError::Timeout(Timer::T6))));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.statistics().t6_timeouts, u64::from(budget) + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_linktest_interval_disables_heartbeat() {
        let config = HsmsConfig::passive(0).with_linktest_interval(Some(Duration::ZERO));
        let (session, mut peer) = selected_passive(config).await;

        let requester = {
            let session = session.clone();
            tokio::spawn(async move { session.request(s1f1()).await })
        };
        let frame = next_frame(&mut peer).await;
        assert_eq!(frame.header.stype, SType::Data);
        assert!(matches!(requester.await.unwrap(), Err(SecsError::Timeout(Timer::T3))));

        // Select.rsp and the request, no Linktest.req
        assert_eq!(session.statistics().frames_sent, 2);
        assert_eq!(session.state(), ConnectionState::Selected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_t7_tears_down_unselected_connection() {
        let (local, _peer) = tokio::io::duplex(1024);
        let session = HsmsSession::new(HsmsConfig::passive(0));
        let mut events = session.subscribe();
        session.attach(local).await.unwrap();

        wait_disconnected(&mut events).await;
        assert_eq!(session.statistics().t7_timeouts, 1);
        assert!(session.wait_selected().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sends_linktest_when_idle() {
        let (_session, mut peer) = selected_passive(HsmsConfig::passive(0)).await;

        let started = Instant::now();
        let frame = next_frame(&mut peer).await;
        assert_eq!(frame.header.stype, SType::LinktestReq);
        assert!(started.elapsed() >= Duration::from_secs(29));

        write_header(
            &mut peer,
            HsmsHeader::control(SType::LinktestRsp, 0xFFFF, frame.header.system_bytes),
            &[],
        )
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_reconnect_waits_t5() {
        let never_connected = HsmsSession::new(HsmsConfig::default());
        never_connected.disconnect().await;
        never_connected.disconnect().await;

        let (host, _equipment) = session_pair().await;
        host.disconnect().await;
        host.disconnect().await;
        assert_eq!(host.state(), ConnectionState::Disconnected);

        let (a, b) = tokio::io::duplex(64 * 1024);
        let equipment = HsmsSession::new(HsmsConfig::passive(1));
        equipment.attach(b).await.unwrap();

        let started = Instant::now();
        host.connect_with(&StreamTransport::new(a)).await.unwrap();
        assert!(started.elapsed() >= host.config().t5);
        assert!(host.is_selected());
    }

    struct StreamTransport {
        stream: Mutex<Option<DuplexStream>>,
    }

    impl StreamTransport {
        fn new(stream: DuplexStream) -> Self {
            Self {
                stream: Mutex::new(Some(stream)),
            }
        }
    }

    #[async_trait::async_trait]
    impl TransportLayer for StreamTransport {
        type Stream = DuplexStream;

        async fn open(&self) -> SecsResult<DuplexStream> {
            lock(&self.stream)
                .take()
                .ok_or_else(|| SecsError::Connect("already opened".to_string()))
        }

        fn endpoint(&self) -> String {
            "duplex".to_string()
        }
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let session = HsmsSession::new(HsmsConfig::default());
        let result = session.connect("127.0.0.1", 0, 1).await;
        assert!(matches!(result, Err(SecsError::Connect(_))));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.device_id(), 1);
    }

    #[tokio::test]
    async fn test_wait_disconnected_after_peer_separates() {
        let (host, equipment) = session_pair().await;
        let waiting = tokio::spawn({
            let equipment = equipment.clone();
            async move { equipment.wait_disconnected().await }
        });
        host.separate().await;
        waiting.await.unwrap();
        assert_eq!(equipment.state(), ConnectionState::Disconnected);

        // returns at once when nothing is connected
        equipment.wait_disconnected().await;
    }

    #[test]
    fn test_weak_handle_does_not_keep_session_alive() {
        let session = HsmsSession::new(HsmsConfig::default());
        let weak = session.downgrade();
        assert!(weak.upgrade().is_some());
        drop(session);
        assert!(weak.upgrade().is_none());
    }
}
