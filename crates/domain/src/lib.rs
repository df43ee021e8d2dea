#![forbid(unsafe_code)]

pub mod common;
pub mod conntrack;
pub mod event;
pub mod firewall;
pub mod packet;
pub mod queue;
pub mod verdict;
