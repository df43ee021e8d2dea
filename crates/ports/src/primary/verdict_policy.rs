use domain::packet::entity::PacketInfo;
use domain::verdict::entity::Verdict;

/// Primary port for the decision logic driving the interception core.
///
/// Called once per packet pulled from a queue channel. Must not block:
/// the dispatcher calls it inline on its receive loop.
pub trait VerdictPolicy: Send + Sync {
    fn decide(&self, packet: &PacketInfo) -> Verdict;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "policy"
    }
}
