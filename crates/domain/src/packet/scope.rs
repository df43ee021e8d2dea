use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Coarse reachability class of an address, used in packet summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpScope {
    Loopback,
    LinkLocal,
    Private,
    Multicast,
    Unspecified,
    Global,
}

impl IpScope {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::of_v4(*v4),
            IpAddr::V6(v6) => Self::of_v6(*v6),
        }
    }

    fn of_v4(ip: Ipv4Addr) -> Self {
        if ip.is_loopback() {
            Self::Loopback
        } else if ip.is_unspecified() {
            Self::Unspecified
        } else if ip.is_link_local() {
            Self::LinkLocal
        } else if ip.is_private() {
            Self::Private
        } else if ip.is_multicast() || ip.is_broadcast() {
            Self::Multicast
        } else {
            Self::Global
        }
    }

    fn of_v6(ip: Ipv6Addr) -> Self {
        if let Some(v4) = ip.to_ipv4_mapped() {
            return Self::of_v4(v4);
        }
        let first = ip.segments()[0];
        if ip.is_loopback() {
            Self::Loopback
        } else if ip.is_unspecified() {
            Self::Unspecified
        } else if ip.is_multicast() {
            Self::Multicast
        } else if first & 0xffc0 == 0xfe80 {
            Self::LinkLocal
        } else if first & 0xfe00 == 0xfc00 {
            Self::Private
        } else {
            Self::Global
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loopback => "loopback",
            Self::LinkLocal => "link-local",
            Self::Private => "private",
            Self::Multicast => "multicast",
            Self::Unspecified => "unspecified",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for IpScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
