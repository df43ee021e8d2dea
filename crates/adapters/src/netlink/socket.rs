use std::io::Read;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::{Message, MessageBuilder, NETLINK_NETFILTER, NetlinkError, messages};

/// Receive buffer for one datagram; dumps and copied packets fit.
pub const RECV_BUF_LEN: usize = 64 * 1024;

/// A `NETLINK_NETFILTER` socket talking to the kernel.
///
/// Unbound and unconnected: the kernel autobinds a port id on first
/// send and a zero-length destination addresses the kernel, so no raw
/// `sockaddr_nl` handling is needed. Sends are safe from any thread.
#[derive(Debug)]
pub struct NetlinkSocket {
    socket: Socket,
    seq: AtomicU32,
}

impl NetlinkSocket {
    pub fn open() -> Result<Self, NetlinkError> {
        let socket = Socket::new(
            Domain::from(libc::AF_NETLINK),
            Type::RAW,
            Some(Protocol::from(NETLINK_NETFILTER)),
        )?;
        Ok(Self {
            socket,
            seq: AtomicU32::new(1),
        })
    }

    pub fn set_timeouts(
        &self,
        read: Option<Duration>,
        write: Option<Duration>,
    ) -> Result<(), NetlinkError> {
        self.socket.set_read_timeout(read)?;
        self.socket.set_write_timeout(write)?;
        Ok(())
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), NetlinkError> {
        self.socket.set_recv_buffer_size(size)?;
        Ok(())
    }

    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn send(&self, msg: &[u8]) -> Result<(), NetlinkError> {
        let sent = self.socket.send(msg)?;
        if sent != msg.len() {
            return Err(NetlinkError::Malformed(format!(
                "short send: {sent} of {} bytes",
                msg.len()
            )));
        }
        Ok(())
    }

    /// Receive one datagram into `buf`, returning its length.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, NetlinkError> {
        Ok((&self.socket).read(buf)?)
    }

    /// Send `msg` with a fresh sequence number and wait for its ACK.
    ///
    /// Datagrams that are not part of the reply (packets the kernel
    /// starts delivering before acknowledging a bind) are returned so the
    /// caller can process them.
    pub fn request_ack(&self, msg: MessageBuilder) -> Result<Vec<Vec<u8>>, NetlinkError> {
        let seq = self.next_seq();
        self.send(&msg.finish(seq))?;

        let mut backlog = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let n = self.recv(&mut buf)?;
            let datagram = &buf[..n];
            let mut unrelated = false;
            let mut reply = None;
            for msg in messages(datagram) {
                let msg = msg?;
                if msg.header.seq != seq {
                    unrelated = true;
                    continue;
                }
                match msg.error_code() {
                    Some(0) => reply = Some(Ok(())),
                    Some(errno) => reply = Some(Err(NetlinkError::Errno { errno })),
                    None => {}
                }
            }
            if unrelated {
                backlog.push(datagram.to_vec());
            }
            if let Some(reply) = reply {
                return reply.map(|()| backlog);
            }
        }
    }

    /// Send a dump request and hand every reply message to `on_message`
    /// until `NLMSG_DONE`.
    pub fn dump(
        &self,
        msg: MessageBuilder,
        mut on_message: impl FnMut(&Message<'_>) -> Result<(), NetlinkError>,
    ) -> Result<(), NetlinkError> {
        let seq = self.next_seq();
        self.send(&msg.finish(seq))?;

        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let n = self.recv(&mut buf)?;
            for msg in messages(&buf[..n]) {
                let msg = msg?;
                if msg.header.seq != seq {
                    continue;
                }
                if msg.is_done() {
                    return Ok(());
                }
                match msg.error_code() {
                    Some(0) => return Ok(()),
                    Some(errno) => return Err(NetlinkError::Errno { errno }),
                    None => on_message(&msg)?,
                }
            }
        }
    }
}
