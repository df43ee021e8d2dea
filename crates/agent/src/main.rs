#![forbid(unsafe_code)]

mod cli;
mod commands;
mod shutdown;
mod startup;

use anyhow::Result;

use cli::{Command, RulesCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match &cli.command {
        Some(Command::Version) => {
            println!("markwall-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Some(Command::Invalidate) => {
            let config = startup::load_config(&cli)?;
            commands::cmd_invalidate(&config)
        }

        Some(Command::Rules(command)) => {
            let config = startup::load_config(&cli)?;
            match command {
                RulesCommand::Show => commands::cmd_rules_show(&config),
                RulesCommand::Remove => commands::cmd_rules_remove(&config),
            }
        }

        Some(Command::Run) | None => startup::run(&cli).await,
    }
}
