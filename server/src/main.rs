use {
    anyhow::Result,
    clap::Parser,
    hushsync_sdk::signal::shutdown_signal,
    hushsync_server::{
        Config, Server,
        util::{default_config_path, setup_logger},
    },
    std::path::PathBuf,
    tokio::net::TcpListener,
    tracing::{info, warn},
};

#[derive(Debug, Parser)]
pub struct Cli {
    #[clap(long)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::parse(&config_path)?;
    setup_logger(config.log_file.as_deref(), &config.log_filter)?;
    info!(users = config.tokens.len(), "starting sync server");

    let listener = TcpListener::bind(config.bind_addr).await?;
    Server::new(&config)
        .run(listener, async {
            match shutdown_signal().await {
                Ok(signal) => info!(%signal, "received shutdown signal"),
                Err(err) => warn!(error = %err, "failed to wait for shutdown signal"),
            }
        })
        .await
}
