//! Chain and rule topology implementing the mark contract.
//!
//! mangle `<P>-INGEST-OUTPUT` / `<P>-INGEST-INPUT` restore the connection
//! mark and queue still-unmarked packets to userspace. filter `<P>-FILTER`
//! turns the verdict mark into accept / reject / drop and saves permanent
//! marks back into conntrack so later packets of the flow skip the queue.

use crate::common::entity::AddressFamily;
use crate::verdict::entity::Mark;

use super::entity::{ChainSpec, RuleSet, RuleSpec, Table};
use super::error::RuleError;

/// Netfilter limit on chain name length.
pub const MAX_CHAIN_NAME_LEN: usize = 28;
pub const DEFAULT_CHAIN_PREFIX: &str = "MARKWALL";

const INGEST_OUTPUT: &str = "-INGEST-OUTPUT";
const INGEST_INPUT: &str = "-INGEST-INPUT";
const FILTER: &str = "-FILTER";

impl RuleSet {
    /// Build the rule set for `family`, queueing outbound packets to
    /// `outbound_queue` and inbound ones to `inbound_queue`.
    pub fn build(
        family: AddressFamily,
        prefix: &str,
        outbound_queue: u16,
        inbound_queue: u16,
    ) -> Result<Self, RuleError> {
        validate_prefix(prefix)?;
        if outbound_queue == inbound_queue {
            return Err(RuleError::DuplicateQueue {
                queue_id: outbound_queue,
            });
        }

        let ingest_out = format!("{prefix}{INGEST_OUTPUT}");
        let ingest_in = format!("{prefix}{INGEST_INPUT}");
        let filter = format!("{prefix}{FILTER}");

        let chains = vec![
            ChainSpec::new(Table::Mangle, &ingest_out),
            ChainSpec::new(Table::Mangle, &ingest_in),
            ChainSpec::new(Table::Filter, &filter),
        ];

        let mut rules = Vec::new();
        rules.extend(ingest_rules(&ingest_out, outbound_queue));
        rules.extend(ingest_rules(&ingest_in, inbound_queue));
        rules.extend(filter_rules(family, &filter));

        let jumps = vec![
            RuleSpec::new(Table::Mangle, "OUTPUT", &["-j", &ingest_out]),
            RuleSpec::new(Table::Mangle, "INPUT", &["-j", &ingest_in]),
            RuleSpec::new(Table::Filter, "OUTPUT", &["-j", &filter]),
            RuleSpec::new(Table::Filter, "INPUT", &["-j", &filter]),
        ];

        Ok(Self {
            family,
            chains,
            rules,
            jumps,
        })
    }
}

/// Check that chains named after `prefix` fit netfilter's naming rules.
pub fn validate_prefix(prefix: &str) -> Result<(), RuleError> {
    let invalid = |reason| RuleError::InvalidPrefix {
        prefix: prefix.to_string(),
        reason,
    };
    if prefix.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if !prefix
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(invalid("only ASCII letters, digits, '-' and '_' are allowed"));
    }
    if prefix.len() + INGEST_OUTPUT.len() > MAX_CHAIN_NAME_LEN {
        return Err(invalid("chain names would exceed 28 characters"));
    }
    Ok(())
}

fn ingest_rules(chain: &str, queue_id: u16) -> [RuleSpec; 2] {
    let queue = queue_id.to_string();
    [
        RuleSpec::new(Table::Mangle, chain, &["-j", "CONNMARK", "--restore-mark"]),
        RuleSpec::new(
            Table::Mangle,
            chain,
            &[
                "-m",
                "mark",
                "--mark",
                "0",
                "-j",
                "NFQUEUE",
                "--queue-num",
                &queue,
                "--queue-bypass",
            ],
        ),
    ]
}

fn filter_rules(family: AddressFamily, chain: &str) -> Vec<RuleSpec> {
    let (icmp, reject_with) = match family {
        AddressFamily::Ipv4 => ("icmp", "icmp-admin-prohibited"),
        AddressFamily::Ipv6 => ("icmpv6", "icmp6-adm-prohibited"),
    };
    let on_mark = |mark: Mark, target: &[&str]| {
        let value = mark.value().to_string();
        let mut args = vec!["-m", "mark", "--mark", value.as_str()];
        args.extend_from_slice(target);
        RuleSpec::new(Table::Filter, chain, &args)
    };

    let mut rules = vec![RuleSpec::new(
        Table::Filter,
        chain,
        &["-m", "mark", "--mark", "0", "-j", "DROP"],
    )];

    // No reject response exists for ICMP itself.
    for mark in [Mark::Block, Mark::BlockAlways] {
        let value = mark.value().to_string();
        rules.push(RuleSpec::new(
            Table::Filter,
            chain,
            &["-p", icmp, "-m", "mark", "--mark", &value, "-j", "DROP"],
        ));
    }

    for mark in Mark::PERMANENT {
        rules.push(on_mark(mark, &["-j", "CONNMARK", "--save-mark"]));
    }

    for mark in Mark::ALL {
        let rule = match mark {
            Mark::Accept | Mark::AcceptAlways => on_mark(mark, &["-j", "RETURN"]),
            Mark::Block | Mark::BlockAlways => {
                on_mark(mark, &["-j", "REJECT", "--reject-with", reject_with])
            }
            Mark::Drop | Mark::DropAlways => on_mark(mark, &["-j", "DROP"]),
        };
        rules.push(rule);
    }
    rules
}
