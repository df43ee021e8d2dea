//! Minimal IP header extraction for intercepted datagrams.
//!
//! Only the fields needed for a policy decision are read: protocol,
//! addresses and, when present, the first two 16-bit words of the
//! transport header (source/destination port for TCP, UDP, UDP-Lite).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::error::PacketError;

/// Shortest payload that can carry an IPv4 header.
pub const MIN_IP_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;

const IPV4_PORTS_END: usize = 24;
const IPV6_PORTS_END: usize = 44;

/// Header fields extracted from a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub version: u8,
    pub protocol: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Parse the network header of `payload`.
///
/// Ports stay at zero when the payload ends before the transport header.
/// The port words are read at the fixed offset following a minimal IPv4
/// header or the fixed IPv6 header; options and extension headers are not
/// walked.
pub fn parse_ip_header(payload: &[u8]) -> Result<IpHeader, PacketError> {
    if payload.len() < MIN_IP_HEADER_LEN {
        return Err(PacketError::TooShort {
            len: payload.len(),
            min: MIN_IP_HEADER_LEN,
        });
    }

    match payload[0] >> 4 {
        4 => Ok(parse_v4(payload)),
        6 => parse_v6(payload),
        other => Err(PacketError::UnsupportedVersion(other)),
    }
}

fn parse_v4(payload: &[u8]) -> IpHeader {
    let src = Ipv4Addr::new(payload[12], payload[13], payload[14], payload[15]);
    let dst = Ipv4Addr::new(payload[16], payload[17], payload[18], payload[19]);
    let (src_port, dst_port) = read_ports(payload, MIN_IP_HEADER_LEN, IPV4_PORTS_END);

    IpHeader {
        version: 4,
        protocol: payload[9],
        src_ip: IpAddr::V4(src),
        dst_ip: IpAddr::V4(dst),
        src_port,
        dst_port,
    }
}

fn parse_v6(payload: &[u8]) -> Result<IpHeader, PacketError> {
    if payload.len() < IPV6_HEADER_LEN {
        return Err(PacketError::TooShort {
            len: payload.len(),
            min: IPV6_HEADER_LEN,
        });
    }

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&payload[8..24]);
    dst.copy_from_slice(&payload[24..40]);
    let (src_port, dst_port) = read_ports(payload, IPV6_HEADER_LEN, IPV6_PORTS_END);

    Ok(IpHeader {
        version: 6,
        protocol: payload[6],
        src_ip: IpAddr::V6(Ipv6Addr::from(src)),
        dst_ip: IpAddr::V6(Ipv6Addr::from(dst)),
        src_port,
        dst_port,
    })
}

fn read_ports(payload: &[u8], start: usize, end: usize) -> (u16, u16) {
    if payload.len() < end {
        return (0, 0);
    }
    let src = u16::from_be_bytes([payload[start], payload[start + 1]]);
    let dst = u16::from_be_bytes([payload[start + 2], payload[start + 3]]);
    (src, dst)
}
