#![forbid(unsafe_code)]

pub mod conntrack;
pub mod firewall;
pub mod http;
pub mod netlink;
pub mod nfqueue;
