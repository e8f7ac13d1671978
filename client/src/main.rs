#![expect(clippy::print_stdout, reason = "CLI output")]

use {
    anyhow::Result,
    clap::Parser,
    hushsync::{
        cli::{Cli, Command, default_config_path},
        config::Config,
        run, setup_logger,
    },
    hushsync_protocol::credentials::EncryptionKey,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.command == Command::GenerateEncryptionKey {
        println!("{}", EncryptionKey::generate()?.display_unmasked());
        return Ok(());
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = Config::parse(&config_path)?;
    setup_logger(config.log_file.as_deref(), &config.log_filter)?;
    run(cli, config).await
}
