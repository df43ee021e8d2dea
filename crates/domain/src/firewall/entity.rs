use serde::{Deserialize, Serialize};

use crate::common::entity::AddressFamily;

/// Netfilter table a chain lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Mangle,
    Filter,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mangle => "mangle",
            Self::Filter => "filter",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined chain owned by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub table: Table,
    pub name: String,
}

impl ChainSpec {
    pub fn new(table: Table, name: impl Into<String>) -> Self {
        Self {
            table,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ChainSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.table, self.name)
    }
}

/// One rule: table, chain and the match/target arguments after the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub table: Table,
    pub chain: String,
    pub args: Vec<String>,
}

impl RuleSpec {
    pub fn new(table: Table, chain: impl Into<String>, args: &[&str]) -> Self {
        Self {
            table,
            chain: chain.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Full argument vector for an `iptables` invocation with `op`
    /// (`-A`, `-D`, `-C`, ...).
    pub fn command_args(&self, op: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 4);
        out.push("-t".to_string());
        out.push(self.table.as_str().to_string());
        out.push(op.to_string());
        out.push(self.chain.clone());
        out.extend(self.args.iter().cloned());
        out
    }
}

impl std::fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.table, self.chain, self.args.join(" "))
    }
}

/// Everything installed for one address family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub family: AddressFamily,
    /// Chains created (and flushed) before rules are appended.
    pub chains: Vec<ChainSpec>,
    /// Rules appended to the agent's chains, in order.
    pub rules: Vec<RuleSpec>,
    /// Jumps inserted at the head of the built-in chains.
    pub jumps: Vec<RuleSpec>,
}

impl RuleSet {
    pub fn rule_count(&self) -> usize {
        self.rules.len() + self.jumps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_args_layout() {
        let rule = RuleSpec::new(Table::Mangle, "MW-INGEST-INPUT", &["-j", "CONNMARK", "--restore-mark"]);
        assert_eq!(
            rule.command_args("-A"),
            vec!["-t", "mangle", "-A", "MW-INGEST-INPUT", "-j", "CONNMARK", "--restore-mark"]
        );
    }

    #[test]
    fn display_is_readable() {
        let rule = RuleSpec::new(Table::Filter, "OUTPUT", &["-j", "MW-FILTER"]);
        assert_eq!(rule.to_string(), "filter OUTPUT -j MW-FILTER");
        assert_eq!(ChainSpec::new(Table::Filter, "MW-FILTER").to_string(), "filter MW-FILTER");
    }
}
