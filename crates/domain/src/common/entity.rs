use serde::{Deserialize, Serialize};

// ── IP protocol numbers ────────────────────────────────────────────

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_IGMP: u8 = 2;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMPV6: u8 = 58;
pub const PROTO_UDPLITE: u8 = 136;

/// IP protocol carried by an intercepted datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Icmp,
    Igmp,
    Tcp,
    Udp,
    IcmpV6,
    UdpLite,
    Other(u8),
}

impl Protocol {
    pub fn from_u8(n: u8) -> Self {
        match n {
            PROTO_ICMP => Self::Icmp,
            PROTO_IGMP => Self::Igmp,
            PROTO_TCP => Self::Tcp,
            PROTO_UDP => Self::Udp,
            PROTO_ICMPV6 => Self::IcmpV6,
            PROTO_UDPLITE => Self::UdpLite,
            other => Self::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Icmp => PROTO_ICMP,
            Self::Igmp => PROTO_IGMP,
            Self::Tcp => PROTO_TCP,
            Self::Udp => PROTO_UDP,
            Self::IcmpV6 => PROTO_ICMPV6,
            Self::UdpLite => PROTO_UDPLITE,
            Self::Other(n) => n,
        }
    }

    /// ICMP and ICMPv6 cannot carry a reject response from the rule layer.
    pub fn is_icmp(self) -> bool {
        matches!(self, Self::Icmp | Self::IcmpV6)
    }

    /// Whether the transport header starts with a source/destination port pair.
    pub fn has_ports(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp | Self::UdpLite)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Icmp => f.write_str("ICMP"),
            Self::Igmp => f.write_str("IGMP"),
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
            Self::IcmpV6 => f.write_str("ICMPv6"),
            Self::UdpLite => f.write_str("UDPLite"),
            Self::Other(n) => write!(f, "{n}"),
        }
    }
}

// ── Address family ─────────────────────────────────────────────────

/// Address family a queue is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Kernel `AF_*` constant.
    pub fn to_af(self) -> u8 {
        match self {
            Self::Ipv4 => 2,
            Self::Ipv6 => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Direction ──────────────────────────────────────────────────────

/// Traffic direction, fixed by the queue that received the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Inbound => "↙",
            Self::Outbound => "↗",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_roundtrip_known_numbers() {
        for n in [1u8, 2, 6, 17, 58, 136, 47] {
            assert_eq!(Protocol::from_u8(n).to_u8(), n);
        }
    }

    #[test]
    fn only_icmp_variants_are_icmp() {
        assert!(Protocol::Icmp.is_icmp());
        assert!(Protocol::IcmpV6.is_icmp());
        assert!(!Protocol::Tcp.is_icmp());
        assert!(Protocol::from_u8(58).is_icmp());
    }

    #[test]
    fn protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
        assert_eq!(Protocol::UdpLite.to_string(), "UDPLite");
        assert_eq!(Protocol::Other(47).to_string(), "47");
    }

    #[test]
    fn address_family_kernel_constants() {
        assert_eq!(AddressFamily::Ipv4.to_af(), 2);
        assert_eq!(AddressFamily::Ipv6.to_af(), 10);
    }

    #[test]
    fn direction_symbols_differ() {
        assert_ne!(Direction::Inbound.symbol(), Direction::Outbound.symbol());
        assert_eq!(Direction::Outbound.as_str(), "outbound");
    }
}
