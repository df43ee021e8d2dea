use clap::{Parser, Subcommand};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "markwall-agent",
    about = "markwall packet interception and verdict agent",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "MARKWALL_CONFIG")]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the agent daemon (default when no subcommand is given)
    Run,

    /// Display version and build information
    Version,

    /// Delete every permanent decision from the connection-tracking table
    Invalidate,

    /// Inspect or clean up the installed firewall rules
    #[command(subcommand)]
    Rules(RulesCommand),
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum RulesCommand {
    /// Print the rules the agent would install for the current config
    Show,
    /// Remove the chains and jump rules left behind by a previous run
    Remove,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn defaults_to_daemon_with_default_config() {
        let cli = parse_from(&["markwall-agent"]);
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert!(cli.command.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn log_overrides_parse() {
        let cli = parse_from(&[
            "markwall-agent",
            "-c",
            "/tmp/mw.yaml",
            "--log-level",
            "debug",
            "--log-format",
            "text",
            "run",
        ]);
        assert_eq!(cli.config, "/tmp/mw.yaml");
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Text));
        assert_eq!(cli.command, Some(Command::Run));
    }

    #[test]
    fn rules_subcommands() {
        let cli = parse_from(&["markwall-agent", "rules", "remove"]);
        assert_eq!(cli.command, Some(Command::Rules(RulesCommand::Remove)));
        let cli = parse_from(&["markwall-agent", "rules", "show", "-l", "warn"]);
        assert_eq!(cli.command, Some(Command::Rules(RulesCommand::Show)));
        assert_eq!(cli.log_level, Some(LogLevel::Warn));
    }

    #[test]
    fn invalid_log_level_rejected() {
        assert!(Cli::try_parse_from(["markwall-agent", "-l", "loud"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
