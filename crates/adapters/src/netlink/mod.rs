//! Netlink framing for the netfilter subsystems (nfqueue, ctnetlink).
//!
//! Header fields are host order; nfnetlink payload attributes are big
//! endian, so the typed accessors on [`Attr`] read network order.

mod socket;

pub use socket::{NetlinkSocket, RECV_BUF_LEN};

use domain::conntrack::error::ConnTrackError;
use domain::queue::error::QueueError;
use thiserror::Error;

pub const NETLINK_NETFILTER: i32 = 12;

pub const NLMSG_HDRLEN: usize = 16;
pub const NFGENMSG_LEN: usize = 4;
const NLA_HDRLEN: usize = 4;

pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;

pub const NLM_F_REQUEST: u16 = 0x1;
pub const NLM_F_ACK: u16 = 0x4;
pub const NLM_F_DUMP: u16 = 0x300;

pub const NLA_F_NESTED: u16 = 0x8000;
const NLA_TYPE_MASK: u16 = 0x3fff;

/// Round `len` up to the 4-byte netlink alignment.
pub const fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// `nlmsg_type` of an nfnetlink message: subsystem in the high byte.
pub fn nfnl_msg_type(subsys: u8, msg: u8) -> u16 {
    (u16::from(subsys) << 8) | u16::from(msg)
}

#[derive(Debug, Error)]
pub enum NetlinkError {
    #[error("netlink socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("netlink error {errno}")]
    Errno { errno: i32 },

    #[error("malformed netlink message: {0}")]
    Malformed(String),
}

impl From<NetlinkError> for QueueError {
    fn from(err: NetlinkError) -> Self {
        match err {
            NetlinkError::Io(e) => Self::Io(e),
            NetlinkError::Errno { errno } => Self::Netlink { errno },
            NetlinkError::Malformed(m) => Self::Malformed(m),
        }
    }
}

impl From<NetlinkError> for ConnTrackError {
    fn from(err: NetlinkError) -> Self {
        match err {
            NetlinkError::Io(e) => Self::Io(e),
            NetlinkError::Errno { errno } => Self::from_errno(errno),
            NetlinkError::Malformed(m) => Self::Malformed(m),
        }
    }
}

fn malformed(what: impl Into<String>) -> NetlinkError {
    NetlinkError::Malformed(what.into())
}

// ── Header ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHeader {
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl NlMsgHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, NetlinkError> {
        if buf.len() < NLMSG_HDRLEN {
            return Err(malformed(format!(
                "header needs {NLMSG_HDRLEN} bytes, got {}",
                buf.len()
            )));
        }
        Ok(Self {
            len: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            msg_type: u16::from_ne_bytes([buf[4], buf[5]]),
            flags: u16::from_ne_bytes([buf[6], buf[7]]),
            seq: u32::from_ne_bytes([buf[8], buf[9], buf[10], buf[11]]),
            pid: u32::from_ne_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Builds one nfnetlink request: header, `nfgenmsg`, then attributes.
#[derive(Debug)]
pub struct MessageBuilder {
    buf: Vec<u8>,
    nests: Vec<usize>,
}

impl MessageBuilder {
    pub fn new(msg_type: u16, flags: u16, family: u8, res_id: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&msg_type.to_ne_bytes());
        buf.extend_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        // nfgenmsg: family, version, res_id (network order)
        buf.push(family);
        buf.push(0);
        buf.extend_from_slice(&res_id.to_be_bytes());
        Self {
            buf,
            nests: Vec::new(),
        }
    }

    pub fn attr(&mut self, kind: u16, data: &[u8]) -> &mut Self {
        let len = u16::try_from(NLA_HDRLEN + data.len()).unwrap_or(u16::MAX);
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(data);
        self.pad();
        self
    }

    pub fn attr_u8(&mut self, kind: u16, value: u8) -> &mut Self {
        self.attr(kind, &[value])
    }

    pub fn attr_be16(&mut self, kind: u16, value: u16) -> &mut Self {
        self.attr(kind, &value.to_be_bytes())
    }

    pub fn attr_be32(&mut self, kind: u16, value: u32) -> &mut Self {
        self.attr(kind, &value.to_be_bytes())
    }

    /// Open a nested attribute; close it with [`end_nested`](Self::end_nested).
    pub fn begin_nested(&mut self, kind: u16) -> &mut Self {
        self.nests.push(self.buf.len());
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf.extend_from_slice(&(kind | NLA_F_NESTED).to_ne_bytes());
        self
    }

    pub fn end_nested(&mut self) -> &mut Self {
        if let Some(start) = self.nests.pop() {
            let len = u16::try_from(self.buf.len() - start).unwrap_or(u16::MAX);
            self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
        }
        self
    }

    /// Patch length and sequence number and return the wire bytes.
    /// Unclosed nests are closed.
    pub fn finish(mut self, seq: u32) -> Vec<u8> {
        while !self.nests.is_empty() {
            self.end_nested();
        }
        let len = u32::try_from(self.buf.len()).unwrap_or(u32::MAX);
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
        self.buf
    }

    fn pad(&mut self) {
        self.buf.resize(align(self.buf.len()), 0);
    }
}

// ── Parsing ────────────────────────────────────────────────────────

/// One message inside a received datagram.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub header: NlMsgHeader,
    /// Bytes after the netlink header, bounded by `nlmsg_len`.
    pub payload: &'a [u8],
}

impl<'a> Message<'a> {
    pub fn is_error(&self) -> bool {
        self.header.msg_type == NLMSG_ERROR
    }

    pub fn is_done(&self) -> bool {
        self.header.msg_type == NLMSG_DONE
    }

    /// Positive errno of an `NLMSG_ERROR`; `Some(0)` is an ACK.
    pub fn error_code(&self) -> Option<i32> {
        if !self.is_error() {
            return None;
        }
        let raw = self.payload.get(..4)?;
        Some(i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]).wrapping_neg())
    }

    /// Message kind within the nfnetlink subsystem (low byte of the type).
    pub fn nf_kind(&self) -> u8 {
        self.header.msg_type.to_be_bytes()[1]
    }

    pub fn nf_subsys(&self) -> u8 {
        self.header.msg_type.to_be_bytes()[0]
    }

    /// Attributes following the `nfgenmsg` header.
    pub fn nf_attrs(&self) -> Result<Attrs<'a>, NetlinkError> {
        let attrs = self
            .payload
            .get(NFGENMSG_LEN..)
            .ok_or_else(|| malformed("payload shorter than nfgenmsg"))?;
        Ok(Attrs::new(attrs))
    }
}

/// Iterate over the messages of one datagram. Stops after the first
/// framing error.
pub fn messages(buf: &[u8]) -> Messages<'_> {
    Messages { buf }
}

pub struct Messages<'a> {
    buf: &'a [u8],
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<Message<'a>, NetlinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let header = match NlMsgHeader::parse(self.buf) {
            Ok(h) => h,
            Err(e) => {
                self.buf = &[];
                return Some(Err(e));
            }
        };
        let len = header.len as usize;
        if len < NLMSG_HDRLEN || len > self.buf.len() {
            let remaining = self.buf.len();
            self.buf = &[];
            return Some(Err(malformed(format!(
                "message length {len} outside 16..={remaining}"
            ))));
        }
        let payload = &self.buf[NLMSG_HDRLEN..len];
        self.buf = self.buf.get(align(len)..).unwrap_or(&[]);
        Some(Ok(Message { header, payload }))
    }
}

/// One attribute; `kind` has the nested and byte-order flags stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr<'a> {
    pub kind: u16,
    pub data: &'a [u8],
}

impl<'a> Attr<'a> {
    pub fn nested(&self) -> Attrs<'a> {
        Attrs::new(self.data)
    }

    pub fn u8(&self) -> Result<u8, NetlinkError> {
        self.data
            .first()
            .copied()
            .ok_or_else(|| self.too_short(1))
    }

    pub fn be16(&self) -> Result<u16, NetlinkError> {
        match self.data {
            [a, b, ..] => Ok(u16::from_be_bytes([*a, *b])),
            _ => Err(self.too_short(2)),
        }
    }

    pub fn be32(&self) -> Result<u32, NetlinkError> {
        match self.data {
            [a, b, c, d, ..] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => Err(self.too_short(4)),
        }
    }

    fn too_short(&self, want: usize) -> NetlinkError {
        malformed(format!(
            "attribute {} needs {want} bytes, got {}",
            self.kind,
            self.data.len()
        ))
    }
}

#[derive(Debug, Clone)]
pub struct Attrs<'a> {
    buf: &'a [u8],
}

impl<'a> Attrs<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// First attribute of `kind`, skipping malformed tails.
    pub fn get(self, kind: u16) -> Option<Attr<'a>> {
        self.map_while(Result::ok).find(|a| a.kind == kind)
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = Result<Attr<'a>, NetlinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < NLA_HDRLEN {
            // Trailing padding shorter than a header is not an attribute.
            self.buf = &[];
            return None;
        }
        let len = usize::from(u16::from_ne_bytes([self.buf[0], self.buf[1]]));
        let kind = u16::from_ne_bytes([self.buf[2], self.buf[3]]) & NLA_TYPE_MASK;
        if len < NLA_HDRLEN || len > self.buf.len() {
            let remaining = self.buf.len();
            self.buf = &[];
            return Some(Err(malformed(format!(
                "attribute {kind} length {len} outside 4..={remaining}"
            ))));
        }
        let data = &self.buf[NLA_HDRLEN..len];
        self.buf = self.buf.get(align(len)..).unwrap_or(&[]);
        Some(Ok(Attr { kind, data }))
    }
}
