use domain::packet::entity::PacketInfo;
use domain::verdict::entity::Verdict;
use ports::primary::verdict_policy::VerdictPolicy;

/// Gives every packet the same configured verdict.
#[derive(Debug, Clone, Copy)]
pub struct StaticPolicy {
    verdict: Verdict,
    log_packets: bool,
}

impl StaticPolicy {
    pub fn new(verdict: Verdict, log_packets: bool) -> Self {
        Self {
            verdict,
            log_packets,
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self::new(Verdict::Accept, false)
    }
}

impl VerdictPolicy for StaticPolicy {
    fn decide(&self, packet: &PacketInfo) -> Verdict {
        if self.log_packets {
            tracing::info!(packet = %packet, verdict = %self.verdict, "packet");
        }
        self.verdict
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
