use crate::common::entity::Direction;
use crate::packet::entity::PacketInfo;

use super::entity::{Mark, Verdict};

/// Map a caller's verdict to the mark actually sent to the kernel.
///
/// Two downgrades apply:
/// - block on ICMP / ICMPv6 becomes drop (no reject response exists for them)
/// - permanent accept of outbound loopback traffic becomes a transient accept
pub fn resolve_mark(verdict: Verdict, packet: &PacketInfo) -> Mark {
    match verdict {
        Verdict::Accept => Mark::Accept,
        Verdict::Drop => Mark::Drop,
        Verdict::PermanentDrop => Mark::DropAlways,
        Verdict::Block if packet.is_icmp() => Mark::Drop,
        Verdict::Block => Mark::Block,
        Verdict::PermanentBlock if packet.is_icmp() => Mark::DropAlways,
        Verdict::PermanentBlock => Mark::BlockAlways,
        Verdict::PermanentAccept
            if packet.direction == Direction::Outbound
                && packet.dst_ip.to_canonical().is_loopback() =>
        {
            Mark::Accept
        }
        Verdict::PermanentAccept => Mark::AcceptAlways,
    }
}
