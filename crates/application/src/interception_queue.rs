use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use domain::packet::entity::PacketInfo;
use domain::queue::entity::{OverflowVerdict, QueueConfig, QueueStats, SocketState};
use domain::queue::error::QueueError;
use domain::verdict::entity::BaseVerdict;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::queue_socket_port::{
    ErrorAction, PacketHandler, QueueSocket, QueueSocketFactory, RawPacket,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::packet::Packet;
use crate::recovery;
use crate::retry::{RetryPolicy, retry_transient_blocking};
use crate::verdict_engine::{PendingVerdicts, VerdictCounters};

/// Tuning knobs for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub channel_capacity: usize,
    pub overflow_verdict: OverflowVerdict,
    pub retry: RetryPolicy,
    pub reopen_backoff: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            overflow_verdict: OverflowVerdict::Accept,
            retry: RetryPolicy::default(),
            reopen_backoff: Duration::from_millis(100),
        }
    }
}

/// State shared between the queue handle, its packets, the reader-thread
/// callback and the recovery task.
pub struct QueueShared {
    pub(crate) config: QueueConfig,
    pub(crate) socket: ArcSwap<Arc<dyn QueueSocket>>,
    pub(crate) counters: VerdictCounters,
    pub(crate) pending: PendingVerdicts,
    pub(crate) retry: RetryPolicy,
    pub(crate) metrics: Arc<dyn MetricsPort>,
    state: AtomicU8,
    overflow: OverflowVerdict,
    packet_tx: mpsc::Sender<Packet>,
    restart_tx: mpsc::Sender<()>,
    reader: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for QueueShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueShared")
            .field("queue", &self.config.label())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl QueueShared {
    /// Build the shared state around an already-open socket. Returns the
    /// packet and restart receivers alongside.
    pub(crate) fn new(
        config: QueueConfig,
        socket: Arc<dyn QueueSocket>,
        options: &QueueOptions,
        metrics: Arc<dyn MetricsPort>,
    ) -> (Arc<Self>, mpsc::Receiver<Packet>, mpsc::Receiver<()>) {
        let (packet_tx, packet_rx) = mpsc::channel(options.channel_capacity.max(1));
        let (restart_tx, restart_rx) = mpsc::channel(1);
        let shared = Arc::new(Self {
            config,
            socket: ArcSwap::from_pointee(socket),
            counters: VerdictCounters::default(),
            pending: PendingVerdicts::default(),
            retry: options.retry,
            metrics,
            state: AtomicU8::new(SocketState::Live.to_u8()),
            overflow: options.overflow_verdict,
            packet_tx,
            restart_tx,
            reader: Mutex::new(None),
        });
        (shared, packet_rx, restart_rx)
    }

    pub(crate) fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SocketState) {
        self.state.store(state.to_u8(), Ordering::Release);
        self.metrics
            .set_queue_live(&self.config.label(), state == SocketState::Live);
    }

    /// Non-blocking restart request. Returns `false` when one is already
    /// pending; a single restart covers every failure seen before it.
    pub(crate) fn request_restart(&self) -> bool {
        self.restart_tx.try_send(()).is_ok()
    }

    /// Register the packet callback on `socket` with a fresh reader token
    /// derived from `parent`.
    pub(crate) fn attach(
        self: &Arc<Self>,
        socket: &Arc<dyn QueueSocket>,
        parent: &CancellationToken,
    ) -> Result<(), QueueError> {
        let token = parent.child_token();
        let handler = Arc::new(QueueHandler {
            shared: Arc::downgrade(self),
        });
        socket.register(handler, token.clone())?;
        let previous = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(token);
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(())
    }

    /// Stop the current reader and close the current socket. In-flight
    /// verdict calls against it fail with `QueueError::Closed`.
    pub(crate) fn teardown_socket(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.cancel();
        }
        if let Err(e) = self.socket.load().close() {
            tracing::warn!(queue_id = self.config.queue_id, error = %e, "closing queue socket failed");
        }
    }

    /// Kernel callback body. Runs on the socket's reader thread and never
    /// waits for a verdict.
    fn handle_packet(self: &Arc<Self>, raw: RawPacket<'_>) {
        let Some(id) = raw.id else {
            self.counters.record_error();
            tracing::debug!(queue_id = self.config.queue_id, "packet without id");
            return;
        };
        let Some(payload) = raw.payload else {
            self.counters.record_error();
            tracing::debug!(queue_id = self.config.queue_id, id, "packet without payload");
            return;
        };
        let info = match PacketInfo::parse(id, payload, self.config.direction) {
            Ok(info) => info,
            Err(e) => {
                self.counters.record_error();
                tracing::debug!(queue_id = self.config.queue_id, id, error = %e, "unparseable packet");
                return;
            }
        };

        self.counters.record_received();
        let packet = Packet::new(info, self.config.queue_id, Arc::downgrade(self));

        match self.packet_tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(packet) | TrySendError::Closed(packet)) => {
                self.counters.record_error();
                self.overflow_verdict(&packet);
            }
        }
    }

    /// Immediate verdict for a packet the channel could not take.
    fn overflow_verdict(&self, packet: &Packet) {
        if packet.claim().is_err() {
            return;
        }
        let mark = self.overflow.mark();
        let result = retry_transient_blocking(&self.retry, || {
            self.socket
                .load()
                .set_verdict_with_mark(packet.id, BaseVerdict::Accept, mark)
        });
        match result {
            Ok(()) => {
                self.counters.record_mark(mark);
                tracing::debug!(queue_id = self.config.queue_id, id = packet.id, %mark, "channel full, overflow verdict");
            }
            Err(e) => {
                let restart = self.request_restart();
                tracing::warn!(
                    queue_id = self.config.queue_id,
                    id = packet.id,
                    error = %e,
                    restart_requested = restart,
                    "overflow verdict failed"
                );
            }
        }
    }

    fn handle_read_error(&self, error: &QueueError) -> ErrorAction {
        if error.is_transient() {
            tracing::debug!(queue_id = self.config.queue_id, error = %error, "transient read error");
            return ErrorAction::Continue;
        }
        self.counters.record_error();
        let restart = self.request_restart();
        tracing::warn!(
            queue_id = self.config.queue_id,
            error = %error,
            restart_requested = restart,
            "queue reader failed"
        );
        ErrorAction::Stop
    }
}

/// Callback registered on each socket. Holds the queue weakly so the
/// socket never keeps its owner alive.
struct QueueHandler {
    shared: Weak<QueueShared>,
}

impl PacketHandler for QueueHandler {
    fn on_packet(&self, packet: RawPacket<'_>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_packet(packet);
        }
    }

    fn on_error(&self, error: &QueueError) -> ErrorAction {
        match self.shared.upgrade() {
            Some(shared) => shared.handle_read_error(error),
            None => ErrorAction::Stop,
        }
    }
}

/// One kernel interception queue: socket, packet channel and the recovery
/// task keeping the socket alive.
pub struct InterceptionQueue {
    shared: Arc<QueueShared>,
    packet_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    cancel: CancellationToken,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl InterceptionQueue {
    /// Open the kernel queue described by `config`, register the packet
    /// callback and start the recovery task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        factory: Arc<dyn QueueSocketFactory>,
        config: QueueConfig,
        options: QueueOptions,
        metrics: Arc<dyn MetricsPort>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>, QueueError> {
        let socket = factory.open(&config)?;
        let (shared, packet_rx, restart_rx) =
            QueueShared::new(config, Arc::clone(&socket), &options, metrics);

        let cancel = cancel.child_token();
        if let Err(e) = shared.attach(&socket, &cancel) {
            let _ = socket.close();
            return Err(e);
        }
        shared.set_state(SocketState::Live);

        let recovery = tokio::spawn(recovery::run(
            Arc::clone(&shared),
            factory,
            restart_rx,
            cancel.clone(),
            options.reopen_backoff,
        ));

        tracing::info!(
            queue_id = shared.config.queue_id,
            family = %shared.config.family,
            direction = %shared.config.direction,
            "interception queue opened"
        );

        Ok(Arc::new(Self {
            shared,
            packet_rx: Mutex::new(Some(packet_rx)),
            cancel,
            recovery: Mutex::new(Some(recovery)),
        }))
    }

    pub fn id(&self) -> u16 {
        self.shared.config.queue_id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn label(&self) -> String {
        self.shared.config.label()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.counters.snapshot()
    }

    pub fn state(&self) -> SocketState {
        self.shared.state()
    }

    /// Receive side of the packet channel. Handed out once; later calls
    /// return `None`.
    pub fn packet_channel(&self) -> Option<mpsc::Receiver<Packet>> {
        self.packet_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Ask the recovery task to replace the socket. Coalesced with any
    /// request already pending.
    pub fn request_restart(&self) -> bool {
        self.shared.request_restart()
    }

    /// Verdict calls currently inside the kernel binding.
    pub fn pending_verdicts(&self) -> usize {
        self.shared.pending.get()
    }

    pub async fn wait_for_pending(&self, timeout: Duration) -> bool {
        self.shared.pending.wait_idle(timeout).await
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<QueueShared> {
        &self.shared
    }

    /// Let in-flight verdicts finish against the live socket, then
    /// destroy the queue. Returns `false` when verdicts were still pending
    /// at `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let drained = self.wait_for_pending(timeout).await;
        self.destroy().await;
        drained
    }

    /// Stop recovery and close the current socket. Idempotent.
    pub async fn destroy(&self) {
        self.cancel.cancel();
        let recovery = self
            .recovery
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(recovery) = recovery {
            let _ = recovery.await;
        }
        if self.shared.state() != SocketState::Closed {
            self.shared.teardown_socket();
            self.shared.set_state(SocketState::Closed);
            tracing::info!(queue_id = self.id(), "interception queue destroyed");
        }
    }
}
