use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use domain::common::entity::AddressFamily;
use domain::conntrack::entity::FlowTuple;
use domain::conntrack::error::ConnTrackError;
use domain::verdict::entity::Mark;
use ports::secondary::conntrack_port::ConnTrackPort;
use tracing::{debug, warn};

use crate::netlink::{
    Message, MessageBuilder, NLA_F_NESTED, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NetlinkSocket,
    nfnl_msg_type,
};

const NFNL_SUBSYS_CTNETLINK: u8 = 1;

const IPCTNL_MSG_CT_NEW: u8 = 0;
const IPCTNL_MSG_CT_GET: u8 = 1;
const IPCTNL_MSG_CT_DELETE: u8 = 2;

const CTA_TUPLE_ORIG: u16 = 1;
const CTA_MARK: u16 = 8;
const CTA_MARK_MASK: u16 = 21;

const CTA_TUPLE_IP: u16 = 1;
const CTA_TUPLE_PROTO: u16 = 2;

const CTA_IP_V4_SRC: u16 = 1;
const CTA_IP_V4_DST: u16 = 2;
const CTA_IP_V6_SRC: u16 = 3;
const CTA_IP_V6_DST: u16 = 4;

const CTA_PROTO_NUM: u16 = 1;
const CTA_PROTO_SRC_PORT: u16 = 2;
const CTA_PROTO_DST_PORT: u16 = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Dump request for the entries of `family` carrying `mark`. Kernels
/// that ignore the mark filter return everything, so replies are
/// filtered again by [`marked_tuple`].
fn dump_request(family: AddressFamily, mark: Mark) -> MessageBuilder {
    let mut msg = MessageBuilder::new(
        nfnl_msg_type(NFNL_SUBSYS_CTNETLINK, IPCTNL_MSG_CT_GET),
        NLM_F_REQUEST | NLM_F_DUMP,
        family.to_af(),
        0,
    );
    msg.attr_be32(CTA_MARK, mark.value())
        .attr_be32(CTA_MARK_MASK, u32::MAX);
    msg
}

/// Original tuple, still encoded, of a dumped entry whose mark matches.
fn marked_tuple(msg: &Message<'_>, mark: Mark) -> Option<Vec<u8>> {
    if msg.nf_subsys() != NFNL_SUBSYS_CTNETLINK || msg.nf_kind() != IPCTNL_MSG_CT_NEW {
        return None;
    }
    let attrs = msg.nf_attrs().ok()?;
    let entry_mark = attrs.clone().get(CTA_MARK)?.be32().ok()?;
    if entry_mark != mark.value() {
        return None;
    }
    attrs.get(CTA_TUPLE_ORIG).map(|a| a.data.to_vec())
}

fn delete_encoded_request(family: AddressFamily, tuple: &[u8]) -> MessageBuilder {
    let mut msg = MessageBuilder::new(
        nfnl_msg_type(NFNL_SUBSYS_CTNETLINK, IPCTNL_MSG_CT_DELETE),
        NLM_F_REQUEST | NLM_F_ACK,
        family.to_af(),
        0,
    );
    msg.attr(CTA_TUPLE_ORIG | NLA_F_NESTED, tuple);
    msg
}

fn delete_flow_request(tuple: &FlowTuple) -> MessageBuilder {
    let mut msg = MessageBuilder::new(
        nfnl_msg_type(NFNL_SUBSYS_CTNETLINK, IPCTNL_MSG_CT_DELETE),
        NLM_F_REQUEST | NLM_F_ACK,
        tuple.family.to_af(),
        0,
    );
    msg.begin_nested(CTA_TUPLE_ORIG).begin_nested(CTA_TUPLE_IP);
    match (tuple.src_ip, tuple.dst_ip) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            msg.attr(CTA_IP_V4_SRC, &src.octets())
                .attr(CTA_IP_V4_DST, &dst.octets());
        }
        (src, dst) => {
            msg.attr(CTA_IP_V6_SRC, &v6_octets(src))
                .attr(CTA_IP_V6_DST, &v6_octets(dst));
        }
    }
    msg.end_nested()
        .begin_nested(CTA_TUPLE_PROTO)
        .attr_u8(CTA_PROTO_NUM, tuple.protocol);
    if tuple.has_ports() {
        msg.attr_be16(CTA_PROTO_SRC_PORT, tuple.src_port)
            .attr_be16(CTA_PROTO_DST_PORT, tuple.dst_port);
    }
    msg.end_nested().end_nested();
    msg
}

fn v6_octets(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V6(v6) => v6.octets(),
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
    }
}

/// Connection-tracking table access over ctnetlink.
///
/// Requests are serialized on one socket: each waits for its own reply.
pub struct NetlinkConnTrack {
    socket: Mutex<NetlinkSocket>,
}

impl NetlinkConnTrack {
    pub fn open() -> Result<Self, ConnTrackError> {
        let socket = NetlinkSocket::open()?;
        socket.set_timeouts(Some(REQUEST_TIMEOUT), Some(REQUEST_TIMEOUT))?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

impl ConnTrackPort for NetlinkConnTrack {
    fn delete_by_mark(&self, family: AddressFamily, mark: Mark) -> Result<u64, ConnTrackError> {
        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tuples = Vec::new();
        socket.dump(dump_request(family, mark), |msg| {
            if let Some(tuple) = marked_tuple(msg, mark) {
                tuples.push(tuple);
            }
            Ok(())
        })?;

        let mut removed = 0u64;
        let mut last_error = None;
        for tuple in &tuples {
            match socket
                .request_ack(delete_encoded_request(family, tuple))
                .map_err(ConnTrackError::from)
            {
                Ok(_) => removed += 1,
                // expired between dump and delete
                Err(ConnTrackError::NotFound) => {}
                Err(e) => {
                    warn!(%family, %mark, error = %e, "conntrack delete failed");
                    last_error = Some(e);
                }
            }
        }

        debug!(%family, %mark, matched = tuples.len(), removed, "conntrack entries flushed");
        match last_error {
            Some(e) if removed == 0 => Err(e),
            _ => Ok(removed),
        }
    }

    fn delete_flow(&self, tuple: &FlowTuple) -> Result<(), ConnTrackError> {
        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        socket.request_ack(delete_flow_request(tuple))?;
        debug!(flow = %tuple, "conntrack entry deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::{Attr, NlMsgHeader, messages};

    fn reply(mark: u32, tuple: &[u8]) -> Vec<u8> {
        let mut msg = MessageBuilder::new(
            nfnl_msg_type(NFNL_SUBSYS_CTNETLINK, IPCTNL_MSG_CT_NEW),
            0,
            2,
            0,
        );
        msg.attr(CTA_TUPLE_ORIG | NLA_F_NESTED, tuple)
            .attr_be32(CTA_MARK, mark);
        msg.finish(7)
    }

    #[test]
    fn dump_request_filters_on_mark() {
        let bytes = dump_request(AddressFamily::Ipv6, Mark::DropAlways).finish(3);
        let hdr = NlMsgHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.msg_type, 0x0101);
        assert_eq!(hdr.flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(bytes[16], 10);

        let msg = messages(&bytes).next().unwrap().unwrap();
        let attrs = msg.nf_attrs().unwrap();
        assert_eq!(attrs.clone().get(CTA_MARK).unwrap().be32().unwrap(), 1712);
        assert_eq!(attrs.get(CTA_MARK_MASK).unwrap().be32().unwrap(), u32::MAX);
    }

    #[test]
    fn marked_tuple_keeps_matching_entries_only() {
        let tuple = [8u8, 0, 1, 0, 10, 0, 0, 1];
        let matching = reply(1710, &tuple);
        let other = reply(1700, &tuple);

        let msg = messages(&matching).next().unwrap().unwrap();
        assert_eq!(marked_tuple(&msg, Mark::AcceptAlways), Some(tuple.to_vec()));

        let msg = messages(&other).next().unwrap().unwrap();
        assert_eq!(marked_tuple(&msg, Mark::AcceptAlways), None);
    }

    #[test]
    fn delete_reuses_dumped_tuple() {
        let tuple = [8u8, 0, 1, 0, 10, 0, 0, 1];
        let bytes = delete_encoded_request(AddressFamily::Ipv4, &tuple).finish(1);
        let hdr = NlMsgHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.msg_type, 0x0102);
        assert_eq!(hdr.flags, NLM_F_REQUEST | NLM_F_ACK);

        let msg = messages(&bytes).next().unwrap().unwrap();
        let orig = msg.nf_attrs().unwrap().get(CTA_TUPLE_ORIG).unwrap();
        assert_eq!(orig.data, &tuple[..]);
    }

    #[test]
    fn delete_flow_encodes_ipv4_tuple_with_ports() {
        let flow = FlowTuple::new(
            6,
            "10.0.0.1".parse().unwrap(),
            40000,
            "93.184.216.34".parse().unwrap(),
            443,
        )
        .unwrap();
        let bytes = delete_flow_request(&flow).finish(1);
        let msg = messages(&bytes).next().unwrap().unwrap();
        let orig = msg.nf_attrs().unwrap().get(CTA_TUPLE_ORIG).unwrap();

        let ip = orig.nested().get(CTA_TUPLE_IP).unwrap();
        assert_eq!(ip.nested().get(CTA_IP_V4_SRC).unwrap().data, &[10, 0, 0, 1]);
        assert_eq!(
            ip.nested().get(CTA_IP_V4_DST).unwrap().data,
            &[93, 184, 216, 34]
        );

        let proto = orig.nested().get(CTA_TUPLE_PROTO).unwrap();
        let fields: Vec<Attr<'_>> = proto.nested().map(Result::unwrap).collect();
        assert_eq!(fields[0].u8().unwrap(), 6);
        assert_eq!(fields[1].be16().unwrap(), 40000);
        assert_eq!(fields[2].be16().unwrap(), 443);
    }

    #[test]
    fn delete_flow_skips_ports_for_icmpv6() {
        let flow = FlowTuple::new(
            58,
            "fe80::1".parse().unwrap(),
            0,
            "fe80::2".parse().unwrap(),
            0,
        )
        .unwrap();
        let bytes = delete_flow_request(&flow).finish(1);
        assert_eq!(bytes[16], 10);
        let msg = messages(&bytes).next().unwrap().unwrap();
        let orig = msg.nf_attrs().unwrap().get(CTA_TUPLE_ORIG).unwrap();

        let ip = orig.nested().get(CTA_TUPLE_IP).unwrap();
        assert_eq!(ip.nested().get(CTA_IP_V6_SRC).unwrap().data.len(), 16);
        let proto = orig.nested().get(CTA_TUPLE_PROTO).unwrap();
        assert_eq!(proto.nested().count(), 1);
    }
}
