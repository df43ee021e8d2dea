#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::common::entity::Direction;
use domain::packet::entity::PacketInfo;
use domain::packet::parser::parse_ip_header;
use domain::verdict::entity::Verdict;
use domain::verdict::resolver::resolve_mark;

// Kernel-delivered payloads are untrusted: header parsing and mark
// resolution must return, never panic.
fuzz_target!(|data: &[u8]| {
    let _ = parse_ip_header(data);

    for direction in [Direction::Inbound, Direction::Outbound] {
        if let Ok(info) = PacketInfo::parse(1, data, direction) {
            let _ = info.to_string();
            for verdict in [
                Verdict::Block,
                Verdict::PermanentAccept,
                Verdict::PermanentBlock,
            ] {
                let _ = resolve_mark(verdict, &info);
            }
        }
    }
});
