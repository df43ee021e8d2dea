use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use domain::common::entity::AddressFamily;
use domain::conntrack::entity::FlowTuple;
use domain::conntrack::error::ConnTrackError;
use domain::queue::entity::QueueConfig;
use domain::queue::error::QueueError;
use domain::verdict::entity::{BaseVerdict, Mark};
use tokio_util::sync::CancellationToken;

use crate::secondary::conntrack_port::ConnTrackPort;
use crate::secondary::metrics_port::{DecisionMetrics, EventMetrics, QueueMetrics};
use crate::secondary::queue_socket_port::{
    ErrorAction, PacketHandler, QueueSocket, QueueSocketFactory, RawPacket,
};

/// No-op implementation of all metrics sub-traits for use in tests.
///
/// All methods inherit the default no-op implementations from the sub-traits.
pub struct NoopMetrics;

impl QueueMetrics for NoopMetrics {}
impl DecisionMetrics for NoopMetrics {}
impl EventMetrics for NoopMetrics {}

type ErrorFn = fn() -> QueueError;

/// In-memory queue socket recording every verdict call.
///
/// Failures can be scripted one call at a time (`fail_next`) or for every
/// call (`fail_always`). A closed spy rejects verdicts with
/// `QueueError::Closed`.
#[derive(Default)]
pub struct SpySocket {
    verdicts: Mutex<Vec<(u32, BaseVerdict, Mark)>>,
    calls: AtomicUsize,
    scripted: Mutex<VecDeque<ErrorFn>>,
    always: Mutex<Option<ErrorFn>>,
    handler: Mutex<Option<(Arc<dyn PacketHandler>, CancellationToken)>>,
    closed: AtomicBool,
    on_register: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl SpySocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next verdict call with the error built by `err`.
    pub fn fail_next(&self, err: ErrorFn) {
        self.scripted.lock().unwrap().push_back(err);
    }

    pub fn fail_always(&self, err: ErrorFn) {
        *self.always.lock().unwrap() = Some(err);
    }

    /// Packets the reader delivers from inside `register`, before it
    /// returns.
    pub fn deliver_on_register(&self, id: u32, payload: &[u8]) {
        self.on_register.lock().unwrap().push((id, payload.to_vec()));
    }

    pub fn clear_failures(&self) {
        self.scripted.lock().unwrap().clear();
        *self.always.lock().unwrap() = None;
    }

    /// Number of `set_verdict_with_mark` invocations, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successfully delivered verdicts as `(id, mark)`.
    pub fn verdicts(&self) -> Vec<(u32, Mark)> {
        self.verdicts
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, mark)| (*id, *mark))
            .collect()
    }

    pub fn base_verdicts(&self) -> Vec<BaseVerdict> {
        self.verdicts.lock().unwrap().iter().map(|v| v.1).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    /// Reader token handed over by `register`.
    pub fn reader_token(&self) -> Option<CancellationToken> {
        self.handler.lock().unwrap().as_ref().map(|(_, t)| t.clone())
    }

    /// Feed one packet through the registered handler, as the reader
    /// thread would.
    pub fn deliver(&self, id: Option<u32>, payload: Option<&[u8]>) {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .as_ref()
            .map(|(h, _)| Arc::clone(h))
            .expect("no handler registered");
        handler.on_packet(RawPacket { id, payload });
    }

    /// Report a receive error to the registered handler.
    pub fn deliver_error(&self, err: &QueueError) -> ErrorAction {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .as_ref()
            .map(|(h, _)| Arc::clone(h))
            .expect("no handler registered");
        handler.on_error(err)
    }
}

impl QueueSocket for SpySocket {
    fn register(
        &self,
        handler: Arc<dyn PacketHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        *self.handler.lock().unwrap() = Some((Arc::clone(&handler), cancel));
        let early = std::mem::take(&mut *self.on_register.lock().unwrap());
        for (id, payload) in &early {
            handler.on_packet(RawPacket {
                id: Some(*id),
                payload: Some(payload),
            });
        }
        Ok(())
    }

    fn set_verdict_with_mark(
        &self,
        id: u32,
        verdict: BaseVerdict,
        mark: Mark,
    ) -> Result<(), QueueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        if let Some(err) = self.scripted.lock().unwrap().pop_front() {
            return Err(err());
        }
        if let Some(err) = *self.always.lock().unwrap() {
            return Err(err());
        }
        self.verdicts.lock().unwrap().push((id, verdict, mark));
        Ok(())
    }

    fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some((_, token)) = self.handler.lock().unwrap().as_ref() {
            token.cancel();
        }
        Ok(())
    }
}

/// Factory handing out `SpySocket`s and remembering each of them.
#[derive(Default)]
pub struct SpyFactory {
    sockets: Mutex<Vec<Arc<SpySocket>>>,
    opens: AtomicUsize,
    failing_opens: AtomicUsize,
    configs: Mutex<Vec<QueueConfig>>,
    early_packets: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl SpyFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` open attempts fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    /// The next socket opened delivers this packet while its handler is
    /// being registered.
    pub fn deliver_on_next_register(&self, id: u32, payload: &[u8]) {
        self.early_packets.lock().unwrap().push((id, payload.to_vec()));
    }

    /// Open attempts, failed ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn sockets(&self) -> Vec<Arc<SpySocket>> {
        self.sockets.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Arc<SpySocket> {
        self.sockets
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no socket opened")
    }

    pub fn configs(&self) -> Vec<QueueConfig> {
        self.configs.lock().unwrap().clone()
    }
}

impl QueueSocketFactory for SpyFactory {
    fn open(&self, config: &QueueConfig) -> Result<Arc<dyn QueueSocket>, QueueError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().unwrap().push(config.clone());
        let failing = self.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(QueueError::Open {
                queue_id: config.queue_id,
                reason: "scripted failure".to_string(),
            });
        }
        let socket = SpySocket::new();
        for (id, payload) in std::mem::take(&mut *self.early_packets.lock().unwrap()) {
            socket.deliver_on_register(id, &payload);
        }
        self.sockets.lock().unwrap().push(Arc::clone(&socket));
        Ok(socket)
    }
}

/// Conntrack table stand-in: counts per `(family, mark)` and a failure
/// switch per family.
#[derive(Default)]
pub struct SpyConnTrack {
    entries: Mutex<HashMap<(AddressFamily, u32), u64>>,
    failing: Mutex<Vec<AddressFamily>>,
    deleted_flows: Mutex<Vec<FlowTuple>>,
    calls: Mutex<Vec<(AddressFamily, Mark)>>,
}

impl SpyConnTrack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, family: AddressFamily, mark: Mark, count: u64) {
        *self
            .entries
            .lock()
            .unwrap()
            .entry((family, mark.value()))
            .or_default() += count;
    }

    pub fn fail_family(&self, family: AddressFamily) {
        self.failing.lock().unwrap().push(family);
    }

    pub fn calls(&self) -> Vec<(AddressFamily, Mark)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn deleted_flows(&self) -> Vec<FlowTuple> {
        self.deleted_flows.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> u64 {
        self.entries.lock().unwrap().values().sum()
    }
}

impl ConnTrackPort for SpyConnTrack {
    fn delete_by_mark(&self, family: AddressFamily, mark: Mark) -> Result<u64, ConnTrackError> {
        self.calls.lock().unwrap().push((family, mark));
        if self.failing.lock().unwrap().contains(&family) {
            return Err(ConnTrackError::Netlink { errno: 1 });
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .remove(&(family, mark.value()))
            .unwrap_or(0))
    }

    fn delete_flow(&self, tuple: &FlowTuple) -> Result<(), ConnTrackError> {
        self.deleted_flows.lock().unwrap().push(*tuple);
        Ok(())
    }
}
