use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::common::entity::Direction;

/// Typed event delivered by an out-of-process producer (kernel probes,
/// samplers). The dispatcher merges these with the packet channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    Bandwidth(BandwidthSample),
    Connection(ConnectionEvent),
    Exec(ExecEvent),
}

impl MonitorEvent {
    /// Metric label for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bandwidth(_) => "bandwidth",
            Self::Connection(_) => "connection",
            Self::Exec(_) => "exec",
        }
    }
}

/// Byte counters accumulated since the previous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BandwidthSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// A socket-level connection observed by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub pid: u32,
    pub direction: Direction,
}

impl ConnectionEvent {
    /// Identity used to deduplicate repeated observations of one flow.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            protocol: self.protocol,
            direction: self.direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub direction: Direction,
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} [{}]",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

/// A process `execve` observed by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEvent {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    pub filename: String,
    pub argv: Vec<String>,
    pub comm: String,
}
