use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::common::entity::{AddressFamily, Protocol};
use crate::packet::entity::PacketInfo;
use crate::verdict::entity::Mark;

use super::error::ConnTrackError;

/// Original-direction 5-tuple of one tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowTuple {
    pub family: AddressFamily,
    pub protocol: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowTuple {
    pub fn new(
        protocol: u8,
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
    ) -> Result<Self, ConnTrackError> {
        let family = match (src_ip, dst_ip) {
            (IpAddr::V4(_), IpAddr::V4(_)) => AddressFamily::Ipv4,
            (IpAddr::V6(_), IpAddr::V6(_)) => AddressFamily::Ipv6,
            _ => return Err(ConnTrackError::FamilyMismatch),
        };
        Ok(Self {
            family,
            protocol,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        })
    }

    /// Tuple of the flow `packet` belongs to, as seen in its own direction.
    pub fn from_packet(packet: &PacketInfo) -> Result<Self, ConnTrackError> {
        Self::new(
            packet.protocol,
            packet.src_ip,
            packet.src_port,
            packet.dst_ip,
            packet.dst_port,
        )
    }

    /// Whether the tuple carries transport ports the kernel can match on.
    pub fn has_ports(&self) -> bool {
        Protocol::from_u8(self.protocol).has_ports()
    }
}

impl std::fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            Protocol::from_u8(self.protocol),
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port
        )
    }
}

/// Result of flushing the entries carrying one permanent mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub family: AddressFamily,
    pub mark: Mark,
    pub removed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity::Direction;
    use std::time::SystemTime;

    #[test]
    fn tuple_from_packet_keeps_direction_order() {
        let pkt = PacketInfo {
            id: 3,
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port: 443,
            dst_port: 51820,
            protocol: 6,
            direction: Direction::Outbound,
            timestamp: SystemTime::now(),
        };
        let tuple = FlowTuple::from_packet(&pkt).unwrap();
        assert_eq!(tuple.family, AddressFamily::Ipv4);
        assert_eq!(tuple.src_port, 443);
        assert!(tuple.has_ports());
        assert_eq!(tuple.to_string(), "TCP 10.0.0.1:443 -> 10.0.0.2:51820");
    }

    #[test]
    fn mixed_families_rejected() {
        let err = FlowTuple::new(
            17,
            "10.0.0.1".parse().unwrap(),
            1,
            "::1".parse().unwrap(),
            2,
        );
        assert!(matches!(err, Err(ConnTrackError::FamilyMismatch)));
    }

    #[test]
    fn icmp_tuple_has_no_ports() {
        let tuple = FlowTuple::new(
            58,
            "fe80::1".parse().unwrap(),
            0,
            "ff02::1".parse().unwrap(),
            0,
        )
        .unwrap();
        assert_eq!(tuple.family, AddressFamily::Ipv6);
        assert!(!tuple.has_ports());
    }
}
