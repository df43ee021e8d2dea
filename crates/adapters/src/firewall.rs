use std::process::Command;

use domain::common::entity::AddressFamily;
use domain::common::error::DomainError;
use domain::firewall::entity::{RuleSet, RuleSpec};
use domain::firewall::error::RuleError;
use ports::secondary::rule_installer_port::RuleInstallerPort;
use tracing::{debug, info, warn};

/// Runs one firewall binary invocation, returning stderr on failure.
pub trait CommandRunner: Send + Sync {
    fn run(&self, binary: &'static str, args: &[String]) -> Result<(), String>;
}

/// Executes the real `iptables` / `ip6tables` binaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommand;

impl CommandRunner for SystemCommand {
    fn run(&self, binary: &'static str, args: &[String]) -> Result<(), String> {
        let output = Command::new(binary)
            .args(args)
            .output()
            .map_err(|e| format!("failed to execute: {e}"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

fn binary_for(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::Ipv4 => "iptables",
        AddressFamily::Ipv6 => "ip6tables",
    }
}

/// Applies rule sets with `iptables`/`ip6tables`, waiting for the xtables
/// lock (`-w`) instead of failing when another tool holds it.
pub struct IptablesInstaller<R = SystemCommand> {
    runner: R,
}

impl IptablesInstaller {
    pub fn new() -> Self {
        Self {
            runner: SystemCommand,
        }
    }
}

impl Default for IptablesInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> IptablesInstaller<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    fn exec(&self, family: AddressFamily, args: Vec<String>) -> Result<(), RuleError> {
        let binary = binary_for(family);
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("-w".to_string());
        full.extend(args);
        debug!(binary, args = %full.join(" "), "firewall command");
        self.runner
            .run(binary, &full)
            .map_err(|message| RuleError::Command {
                binary,
                args: full.join(" "),
                message,
            })
    }

    fn insert_first(&self, family: AddressFamily, jump: &RuleSpec) -> Result<(), RuleError> {
        // -t <table> -I <chain> 1 <args>
        let mut args = jump.command_args("-I");
        args.insert(4, "1".to_string());
        self.exec(family, args)
    }
}

impl<R: CommandRunner> RuleInstallerPort for IptablesInstaller<R> {
    fn install(&self, rules: &RuleSet) -> Result<(), DomainError> {
        let family = rules.family;

        for chain in &rules.chains {
            let table = chain.table.as_str().to_string();
            // Creating fails when a previous run left the chain behind;
            // the flush below empties it either way.
            if let Err(e) = self.exec(
                family,
                vec!["-t".into(), table.clone(), "-N".into(), chain.name.clone()],
            ) {
                debug!(%chain, error = %e, "chain already present");
            }
            self.exec(
                family,
                vec!["-t".into(), table, "-F".into(), chain.name.clone()],
            )?;
        }

        for rule in &rules.rules {
            self.exec(family, rule.command_args("-A"))?;
        }

        for jump in &rules.jumps {
            // Drop a stale jump so reinstalling never stacks duplicates.
            let _ = self.exec(family, jump.command_args("-D"));
            self.insert_first(family, jump)?;
        }

        info!(%family, chains = rules.chains.len(), rules = rules.rule_count(), "firewall rules installed");
        Ok(())
    }

    fn remove(&self, rules: &RuleSet) -> Result<(), DomainError> {
        let family = rules.family;
        let mut errors = Vec::new();

        for jump in &rules.jumps {
            if let Err(e) = self.exec(family, jump.command_args("-D")) {
                errors.push(e.to_string());
            }
        }

        for chain in &rules.chains {
            let table = chain.table.as_str().to_string();
            for op in ["-F", "-X"] {
                if let Err(e) = self.exec(
                    family,
                    vec!["-t".into(), table.clone(), op.into(), chain.name.clone()],
                ) {
                    errors.push(e.to_string());
                }
            }
        }

        if errors.is_empty() {
            info!(%family, "firewall rules removed");
            Ok(())
        } else {
            warn!(%family, failures = errors.len(), "firewall rule removal incomplete");
            Err(DomainError::RuleInstall(errors.join("; ")))
        }
    }
}
