use {
    anyhow::{Result, format_err},
    clap::{Parser, Subcommand},
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
    /// Create or replace a document. `json` must be a JSON object.
    Put { doc_id: String, json: String },
    /// Print the content of a document.
    Get { doc_id: String },
    Delete { doc_id: String },
    /// List documents of the local replica.
    Ls {
        #[arg(short, long)]
        deleted: bool,
    },
    /// Exchange changes with the sync server.
    Sync,
    /// Show the local generation and the sync checkpoint.
    Status,
    GenerateEncryptionKey,
}

pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| format_err!("cannot find config dir"))?;
    Ok(config_dir.join("hushsync.json5"))
}
