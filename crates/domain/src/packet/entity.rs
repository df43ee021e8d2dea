use std::net::IpAddr;
use std::time::SystemTime;

use crate::common::entity::{Direction, Protocol};

use super::error::PacketError;
use super::parser::parse_ip_header;
use super::scope::IpScope;

/// Immutable parsed view of one intercepted datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    /// Kernel-assigned identifier, echoed back in the verdict.
    pub id: u32,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub direction: Direction,
    pub timestamp: SystemTime,
}

impl PacketInfo {
    /// Build from a kernel id and raw payload.
    pub fn parse(id: u32, payload: &[u8], direction: Direction) -> Result<Self, PacketError> {
        let hdr = parse_ip_header(payload)?;
        Ok(Self {
            id,
            src_ip: hdr.src_ip,
            dst_ip: hdr.dst_ip,
            src_port: hdr.src_port,
            dst_port: hdr.dst_port,
            protocol: hdr.protocol,
            direction,
            timestamp: SystemTime::now(),
        })
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from_u8(self.protocol)
    }

    pub fn is_icmp(&self) -> bool {
        self.protocol().is_icmp()
    }

    pub fn is_igmp(&self) -> bool {
        self.protocol() == Protocol::Igmp
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol() == Protocol::Tcp
    }

    pub fn is_udp(&self) -> bool {
        self.protocol() == Protocol::Udp
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// The remote end of the flow from this host's point of view.
    pub fn remote_ip(&self) -> IpAddr {
        match self.direction {
            Direction::Inbound => self.src_ip,
            Direction::Outbound => self.dst_ip,
        }
    }
}

impl std::fmt::Display for PacketInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}):{} {} {}({}):{} (proto: {}, id: {})",
            self.src_ip,
            IpScope::of(&self.src_ip),
            self.src_port,
            self.direction.symbol(),
            self.dst_ip,
            IpScope::of(&self.dst_ip),
            self.dst_port,
            self.protocol(),
            self.id
        )
    }
}
