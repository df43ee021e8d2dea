use std::sync::Arc;

use domain::queue::entity::QueueConfig;
use domain::queue::error::QueueError;
use domain::verdict::entity::{BaseVerdict, Mark};
use tokio_util::sync::CancellationToken;

/// One packet as handed over by the kernel binding.
///
/// Either field may be absent on a malformed message; the handler decides
/// what to do with it.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub id: Option<u32>,
    pub payload: Option<&'a [u8]>,
}

/// What the reader should do after a receive error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Stop,
}

/// Callbacks invoked on the socket's reader thread.
///
/// `on_packet` runs synchronously in the kernel delivery path and must
/// return quickly.
pub trait PacketHandler: Send + Sync {
    fn on_packet(&self, packet: RawPacket<'_>);

    fn on_error(&self, error: &QueueError) -> ErrorAction;
}

/// Secondary port for one open kernel queue handle.
pub trait QueueSocket: Send + Sync {
    /// Start delivering packets to `handler` until `cancel` fires or the
    /// socket is closed.
    fn register(
        &self,
        handler: Arc<dyn PacketHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError>;

    /// Reinject packet `id` with `verdict`, tagging it with `mark`.
    fn set_verdict_with_mark(
        &self,
        id: u32,
        verdict: BaseVerdict,
        mark: Mark,
    ) -> Result<(), QueueError>;

    /// Unbind and release the handle. Later verdict calls fail with
    /// `QueueError::Closed`.
    fn close(&self) -> Result<(), QueueError>;
}

/// Opens queue handles; called at startup and by the recovery loop.
pub trait QueueSocketFactory: Send + Sync {
    fn open(&self, config: &QueueConfig) -> Result<Arc<dyn QueueSocket>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_socket_ports_are_object_safe() {
        fn _socket(s: &dyn QueueSocket) {
            let _ = s.close();
        }
        fn _factory(f: &dyn QueueSocketFactory, cfg: &QueueConfig) {
            let _ = f.open(cfg);
        }
        fn _handler(h: &dyn PacketHandler) {
            h.on_packet(RawPacket {
                id: None,
                payload: None,
            });
        }
    }
}
