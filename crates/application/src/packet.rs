use std::ops::Deref;
use std::sync::Weak;
use std::sync::atomic::{AtomicU8, Ordering};

use domain::packet::entity::PacketInfo;
use domain::verdict::entity::{Mark, Verdict};
use domain::verdict::error::VerdictError;
use domain::verdict::resolver::resolve_mark;

use crate::interception_queue::QueueShared;

const PENDING: u8 = 0;
const SET: u8 = 1;

/// One intercepted packet awaiting its verdict.
///
/// Exactly one verdict call succeeds; later calls fail with
/// `VerdictError::AlreadySet` without touching the kernel. The packet only
/// holds a weak reference to its queue, so an outstanding packet never
/// keeps a destroyed queue alive.
#[derive(Debug)]
pub struct Packet {
    info: PacketInfo,
    queue_id: u16,
    state: AtomicU8,
    queue: Weak<QueueShared>,
}

impl Packet {
    pub(crate) fn new(info: PacketInfo, queue_id: u16, queue: Weak<QueueShared>) -> Self {
        Self {
            info,
            queue_id,
            state: AtomicU8::new(PENDING),
            queue,
        }
    }

    pub fn info(&self) -> &PacketInfo {
        &self.info
    }

    pub fn queue_id(&self) -> u16 {
        self.queue_id
    }

    pub fn is_decided(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }

    /// Claim the single verdict slot. Used by the overflow path, which
    /// delivers its verdict synchronously outside the engine.
    pub(crate) fn claim(&self) -> Result<(), VerdictError> {
        self.state
            .compare_exchange(PENDING, SET, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| VerdictError::AlreadySet)
    }

    /// Issue `verdict` for this packet. Returns the mark actually sent,
    /// after protocol and destination downgrades.
    pub async fn set_verdict(&self, verdict: Verdict) -> Result<Mark, VerdictError> {
        self.claim()?;
        let queue = self.queue.upgrade().ok_or(VerdictError::QueueGone {
            queue_id: self.queue_id,
        })?;
        let mark = resolve_mark(verdict, &self.info);
        queue.deliver_verdict(self.info.id, mark).await?;
        Ok(mark)
    }

    pub async fn accept(&self) -> Result<Mark, VerdictError> {
        self.set_verdict(Verdict::Accept).await
    }

    pub async fn block(&self) -> Result<Mark, VerdictError> {
        self.set_verdict(Verdict::Block).await
    }

    pub async fn drop(&self) -> Result<Mark, VerdictError> {
        self.set_verdict(Verdict::Drop).await
    }

    pub async fn permanent_accept(&self) -> Result<Mark, VerdictError> {
        self.set_verdict(Verdict::PermanentAccept).await
    }

    pub async fn permanent_block(&self) -> Result<Mark, VerdictError> {
        self.set_verdict(Verdict::PermanentBlock).await
    }

    pub async fn permanent_drop(&self) -> Result<Mark, VerdictError> {
        self.set_verdict(Verdict::PermanentDrop).await
    }
}

impl Deref for Packet {
    type Target = PacketInfo;

    fn deref(&self) -> &PacketInfo {
        &self.info
    }
}
