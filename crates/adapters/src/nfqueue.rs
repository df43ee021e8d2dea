//! `NFQUEUE` binding over a netfilter netlink socket.
//!
//! Each open socket owns one reader thread, started by `register`, that
//! turns kernel packet messages into handler callbacks. Verdicts are sent
//! from whatever thread the caller runs on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use domain::queue::entity::QueueConfig;
use domain::queue::error::QueueError;
use domain::verdict::entity::{BaseVerdict, Mark};
use ports::secondary::queue_socket_port::{
    ErrorAction, PacketHandler, QueueSocket, QueueSocketFactory, RawPacket,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::netlink::{
    Message, MessageBuilder, NLM_F_ACK, NLM_F_REQUEST, NetlinkError, NetlinkSocket, RECV_BUF_LEN,
    messages, nfnl_msg_type,
};

const NFNL_SUBSYS_QUEUE: u8 = 3;

const NFQNL_MSG_PACKET: u8 = 0;
const NFQNL_MSG_VERDICT: u8 = 1;
const NFQNL_MSG_CONFIG: u8 = 2;

const NFQNL_CFG_CMD_BIND: u8 = 1;
const NFQNL_CFG_CMD_UNBIND: u8 = 2;

const NFQA_PACKET_HDR: u16 = 1;
const NFQA_VERDICT_HDR: u16 = 2;
const NFQA_MARK: u16 = 3;
const NFQA_PAYLOAD: u16 = 10;

const NFQA_CFG_CMD: u16 = 1;
const NFQA_CFG_PARAMS: u16 = 2;
const NFQA_CFG_QUEUE_MAXLEN: u16 = 3;

const NFQNL_COPY_PACKET: u8 = 2;

/// Kernel receive buffer requested for queue sockets.
const SOCKET_RECV_BUFFER: usize = 4 * 1024 * 1024;

// ── Wire messages ──────────────────────────────────────────────────

fn config_cmd(cmd: u8, family: u8) -> [u8; 4] {
    // nfqnl_msg_config_cmd: command, pad, pf (network order)
    let pf = u16::from(family).to_be_bytes();
    [cmd, 0, pf[0], pf[1]]
}

/// Bind request carrying copy mode and queue length in the same message,
/// so the queue is fully configured by the time the kernel acknowledges.
pub fn bind_request(config: &QueueConfig) -> MessageBuilder {
    let family = config.family.to_af();
    let mut params = [0u8; 5];
    params[..4].copy_from_slice(&config.max_packet_len.to_be_bytes());
    params[4] = NFQNL_COPY_PACKET;

    let mut msg = MessageBuilder::new(
        nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_CONFIG),
        NLM_F_REQUEST | NLM_F_ACK,
        family,
        config.queue_id,
    );
    msg.attr(NFQA_CFG_CMD, &config_cmd(NFQNL_CFG_CMD_BIND, family))
        .attr(NFQA_CFG_PARAMS, &params)
        .attr_be32(NFQA_CFG_QUEUE_MAXLEN, config.max_queue_len);
    msg
}

pub fn unbind_request(config: &QueueConfig) -> MessageBuilder {
    let family = config.family.to_af();
    let mut msg = MessageBuilder::new(
        nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_CONFIG),
        NLM_F_REQUEST,
        family,
        config.queue_id,
    );
    msg.attr(NFQA_CFG_CMD, &config_cmd(NFQNL_CFG_CMD_UNBIND, family));
    msg
}

pub fn verdict_request(queue_id: u16, id: u32, verdict: BaseVerdict, mark: Mark) -> MessageBuilder {
    let mut hdr = [0u8; 8];
    hdr[..4].copy_from_slice(&verdict.value().to_be_bytes());
    hdr[4..].copy_from_slice(&id.to_be_bytes());

    let mut msg = MessageBuilder::new(
        nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_VERDICT),
        NLM_F_REQUEST,
        0,
        queue_id,
    );
    msg.attr(NFQA_VERDICT_HDR, &hdr)
        .attr_be32(NFQA_MARK, mark.value());
    msg
}

/// Packet id and payload of a packet message. Missing or unreadable
/// attributes come back as `None`.
pub fn parse_packet<'a>(msg: &Message<'a>) -> RawPacket<'a> {
    let mut packet = RawPacket {
        id: None,
        payload: None,
    };
    let Ok(attrs) = msg.nf_attrs() else {
        return packet;
    };
    for attr in attrs.map_while(Result::ok) {
        match attr.kind {
            // nfqnl_msg_packet_hdr: packet_id (be32), hw_protocol, hook
            NFQA_PACKET_HDR => packet.id = attr.be32().ok(),
            NFQA_PAYLOAD => packet.payload = Some(attr.data),
            _ => {}
        }
    }
    packet
}

fn is_packet(msg: &Message<'_>) -> bool {
    msg.nf_subsys() == NFNL_SUBSYS_QUEUE && msg.nf_kind() == NFQNL_MSG_PACKET
}

// ── Socket ─────────────────────────────────────────────────────────

struct Inner {
    nl: NetlinkSocket,
    config: QueueConfig,
    closed: AtomicBool,
    registered: AtomicBool,
    /// Datagrams received while waiting for the bind ACK.
    backlog: Mutex<Vec<Vec<u8>>>,
}

/// One bound kernel queue.
pub struct NfQueueSocket {
    inner: Arc<Inner>,
}

impl NfQueueSocket {
    pub fn open(config: &QueueConfig) -> Result<Self, QueueError> {
        let open_err = |e: NetlinkError| QueueError::Open {
            queue_id: config.queue_id,
            reason: e.to_string(),
        };

        let nl = NetlinkSocket::open().map_err(open_err)?;
        if let Err(e) = nl.set_recv_buffer_size(SOCKET_RECV_BUFFER) {
            warn!(queue_id = config.queue_id, error = %e, "could not size receive buffer");
        }
        nl.set_timeouts(Some(config.read_timeout), Some(config.write_timeout))
            .map_err(open_err)?;
        let backlog = nl.request_ack(bind_request(config)).map_err(open_err)?;

        info!(
            queue_id = config.queue_id,
            family = %config.family,
            direction = %config.direction,
            "queue bound"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                nl,
                config: config.clone(),
                closed: AtomicBool::new(false),
                registered: AtomicBool::new(false),
                backlog: Mutex::new(backlog),
            }),
        })
    }
}

impl QueueSocket for NfQueueSocket {
    fn register(
        &self,
        handler: Arc<dyn PacketHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        if self.inner.registered.swap(true, Ordering::AcqRel) {
            return Err(QueueError::Open {
                queue_id: self.inner.config.queue_id,
                reason: "handler already registered".to_string(),
            });
        }
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name(format!("nfq-{}", self.inner.config.queue_id))
            .spawn(move || inner.read_loop(handler.as_ref(), &cancel))?;
        Ok(())
    }

    fn set_verdict_with_mark(
        &self,
        id: u32,
        verdict: BaseVerdict,
        mark: Mark,
    ) -> Result<(), QueueError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let msg = verdict_request(self.inner.config.queue_id, id, verdict, mark);
        self.inner.nl.send(&msg.finish(self.inner.nl.next_seq()))?;
        Ok(())
    }

    fn close(&self) -> Result<(), QueueError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let msg = unbind_request(&self.inner.config);
        self.inner.nl.send(&msg.finish(self.inner.nl.next_seq()))?;
        debug!(queue_id = self.inner.config.queue_id, "queue unbound");
        Ok(())
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Runs on the reader thread until cancelled, closed, or the handler
    /// asks to stop. The read timeout bounds how long a stop takes.
    fn read_loop(&self, handler: &dyn PacketHandler, cancel: &CancellationToken) {
        let queue_id = self.config.queue_id;
        let backlog = std::mem::take(
            &mut *self
                .backlog
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for datagram in &backlog {
            if self.dispatch(datagram, handler) == ErrorAction::Stop {
                return;
            }
        }

        let mut buf = vec![0u8; RECV_BUF_LEN];
        while !cancel.is_cancelled() && !self.is_closed() {
            match self.nl.recv(&mut buf) {
                Ok(n) => {
                    if self.dispatch(&buf[..n], handler) == ErrorAction::Stop {
                        break;
                    }
                }
                Err(e) => {
                    let err = QueueError::from(e);
                    if err.is_timeout() {
                        continue;
                    }
                    if cancel.is_cancelled() || self.is_closed() {
                        break;
                    }
                    if handler.on_error(&err) == ErrorAction::Stop {
                        break;
                    }
                }
            }
        }
        debug!(queue_id, "queue reader stopped");
    }

    fn dispatch(&self, datagram: &[u8], handler: &dyn PacketHandler) -> ErrorAction {
        for msg in messages(datagram) {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => return handler.on_error(&e.into()),
            };
            if is_packet(&msg) {
                handler.on_packet(parse_packet(&msg));
                continue;
            }
            // Verdicts are sent without ACK; only failures come back.
            if let Some(errno) = msg.error_code().filter(|e| *e != 0) {
                warn!(
                    queue_id = self.config.queue_id,
                    errno,
                    seq = msg.header.seq,
                    "kernel rejected a queue request"
                );
            }
        }
        ErrorAction::Continue
    }
}

/// Opens [`NfQueueSocket`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NfQueueFactory;

impl QueueSocketFactory for NfQueueFactory {
    fn open(&self, config: &QueueConfig) -> Result<Arc<dyn QueueSocket>, QueueError> {
        Ok(Arc::new(NfQueueSocket::open(config)?))
    }
}
