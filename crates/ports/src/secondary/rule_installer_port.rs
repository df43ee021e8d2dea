use domain::common::error::DomainError;
use domain::firewall::entity::RuleSet;

/// Secondary port applying the mark-contract rules to the host firewall.
pub trait RuleInstallerPort: Send + Sync {
    /// Create chains, append rules and hook them into the built-in chains.
    /// Re-installing over a previous run's chains replaces their content.
    fn install(&self, rules: &RuleSet) -> Result<(), DomainError>;

    /// Undo `install`. Keeps going past individual failures and reports
    /// them together.
    fn remove(&self, rules: &RuleSet) -> Result<(), DomainError>;
}
