//! One-shot maintenance commands that run without the daemon.

use std::sync::Arc;

use adapters::conntrack::NetlinkConnTrack;
use adapters::firewall::IptablesInstaller;
use application::decision_cache::DecisionCacheInvalidator;
use domain::common::entity::AddressFamily;
use infrastructure::config::AgentConfig;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::conntrack_port::ConnTrackPort;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::rule_installer_port::RuleInstallerPort;

/// Flush every permanent decision for the configured families.
pub fn cmd_invalidate(config: &AgentConfig) -> anyhow::Result<()> {
    let conntrack = NetlinkConnTrack::open()?;
    let invalidator = DecisionCacheInvalidator::new(
        Arc::new(conntrack) as Arc<dyn ConnTrackPort>,
        config.interception.families(),
        Arc::new(AgentMetrics::new()) as Arc<dyn MetricsPort>,
    );
    let report = invalidator.invalidate_all()?;

    for flushed in &report.flushed {
        println!(
            "{:<6} {:<16} {}",
            flushed.family.to_string(),
            flushed.mark.to_string(),
            flushed.removed
        );
    }
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    println!("removed {} entries", report.removed);
    Ok(())
}

/// Print the commands `run` would execute to install the rules.
pub fn cmd_rules_show(config: &AgentConfig) -> anyhow::Result<()> {
    for set in config.interception.rule_sets()? {
        let binary = match set.family {
            AddressFamily::Ipv4 => "iptables",
            AddressFamily::Ipv6 => "ip6tables",
        };
        for chain in &set.chains {
            println!("{binary} -t {} -N {}", chain.table, chain.name);
        }
        for rule in &set.rules {
            println!("{binary} {}", rule.command_args("-A").join(" "));
        }
        for jump in &set.jumps {
            println!("{binary} {}", jump.command_args("-I").join(" "));
        }
    }
    Ok(())
}

/// Remove rules left behind by an agent that did not shut down cleanly.
/// Every family is attempted; the first failure is returned.
pub fn cmd_rules_remove(config: &AgentConfig) -> anyhow::Result<()> {
    let installer = IptablesInstaller::new();
    let mut first_error = None;
    for set in config.interception.rule_sets()? {
        match installer.remove(&set) {
            Ok(()) => println!("{}: rules removed", set.family),
            Err(e) => {
                eprintln!("{}: {e}", set.family);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
