#![no_main]

use libfuzzer_sys::fuzz_target;

use adapters::netlink::{Attrs, messages};
use adapters::nfqueue::parse_packet;

fn walk(attrs: Attrs<'_>, depth: usize) {
    for attr in attrs.map_while(Result::ok) {
        let _ = attr.u8();
        let _ = attr.be16();
        let _ = attr.be32();
        if depth < 4 {
            walk(attr.nested(), depth + 1);
        }
    }
}

// Netlink replies come straight off the socket; framing, attribute
// walking and packet extraction must tolerate any byte sequence.
fuzz_target!(|data: &[u8]| {
    for msg in messages(data).take(64) {
        let Ok(msg) = msg else { break };
        let _ = msg.error_code();
        let _ = parse_packet(&msg);
        if let Ok(attrs) = msg.nf_attrs() {
            walk(attrs, 0);
        }
    }
});
