#![expect(clippy::print_stdout, reason = "CLI output")]

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    hushsync_protocol::credentials::AccessToken,
    hushsync_server::{Config, util::default_config_path},
    std::path::PathBuf,
};

#[derive(Debug, Parser)]
pub struct Cli {
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// List users that can sync with the server.
    Users,
    /// Generate an access token for the `tokens` section of the config.
    GenerateToken { user_uuid: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Users => {
            let config_path = match cli.config {
                Some(path) => path,
                None => default_config_path()?,
            };
            let config = Config::parse(&config_path)?;
            if config.tokens.is_empty() {
                println!("No configured users.");
            }
            let mut users: Vec<&String> = config.tokens.keys().collect();
            users.sort();
            for user in users {
                println!("{user}");
            }
        }
        Command::GenerateToken { user_uuid } => {
            let token = AccessToken::generate();
            println!(
                "New access token. Add it to the `tokens` section of the server config:\n\
                {user_uuid:?}: {:?}",
                token.as_unmasked_str()
            );
        }
    }
    Ok(())
}
