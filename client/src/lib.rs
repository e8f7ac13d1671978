pub mod cli;
pub mod config;
pub mod db;
pub mod sync;

use {
    crate::{
        cli::{Cli, Command},
        config::Config,
        db::Db,
        sync::sync,
    },
    anyhow::{Context as _, Result, bail},
    derivative::Derivative,
    hushsync_protocol::util::log_writer,
    hushsync_sdk::{SymCrypto, client::HttpTransport},
    serde_json::Value,
    std::{
        io::stderr,
        path::Path,
        sync::{Arc, Mutex},
    },
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Ctx {
    pub config: Config,
    pub db: Db,
    #[derivative(Debug = "ignore")]
    pub crypto: Arc<SymCrypto>,
    pub transport: HttpTransport,
}

impl Ctx {
    pub fn new(config: Config) -> Result<Self> {
        let db = Db::open(&config.local_db_path()?, config.replica_uid.as_ref())?;
        let transport =
            HttpTransport::new(config.server_url.clone())?.with_token(config.credentials());
        Ok(Self {
            crypto: Arc::new(SymCrypto::new(config.encryption_key.clone())),
            config,
            db,
            transport,
        })
    }
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let ctx = Ctx::new(config)?;
    handle_command(cli.command, &ctx).await
}

#[expect(clippy::print_stdout, reason = "CLI output")]
async fn handle_command(command: Command, ctx: &Ctx) -> Result<()> {
    match command {
        Command::Put { doc_id, json } => {
            let content = match serde_json::from_str(&json).context("invalid JSON")? {
                Value::Object(content) => content,
                other => bail!("document content must be an object, got `{other}`"),
            };
            let doc = ctx.db.put(&doc_id, content)?;
            info!(doc_id, rev = ?doc.rev, "document saved");
        }
        Command::Get { doc_id } => match ctx.db.get(&doc_id)? {
            Some(doc) => match doc.get_json() {
                Some(json) => println!("{json}"),
                None => bail!("document {doc_id:?} is deleted"),
            },
            None => bail!("document {doc_id:?} not found"),
        },
        Command::Delete { doc_id } => {
            if ctx.db.delete(&doc_id)?.is_none() {
                bail!("document {doc_id:?} not found");
            }
            info!(doc_id, "document deleted");
        }
        Command::Ls { deleted } => {
            for doc in ctx.db.all() {
                let doc = doc?;
                if doc.is_tombstone() {
                    if deleted {
                        println!("{}\t{}\t(deleted)", doc.doc_id, doc.rev().unwrap_or("-"));
                    }
                } else {
                    println!("{}\t{}", doc.doc_id, doc.rev().unwrap_or("-"));
                }
            }
        }
        Command::Sync => {
            sync(ctx).await?;
        }
        Command::Status => {
            println!("Replica: {}", ctx.db.replica_uid());
            println!("Local generation: {}", ctx.db.generation()?);
            println!("Server: {}", ctx.config.server_url);
            match ctx.db.checkpoint(ctx.config.server_url.as_str())? {
                Some(checkpoint) => {
                    if let Some(target) = &checkpoint.target_replica_uid {
                        println!("Server replica: {target}");
                    }
                    println!("Server generation: {}", checkpoint.target_generation);
                    println!("Sent up to generation: {}", checkpoint.local_generation_sent);
                }
                None => println!("Never synced"),
            }
        }
        Command::GenerateEncryptionKey => unreachable!(),
    }
    Ok(())
}

/// Installs the global subscriber writing to `log_file`, or to stderr if it's not set.
pub fn setup_logger(log_file: Option<&Path>, log_filter: &str) -> Result<()> {
    let subscriber = tracing_subscriber::registry().with(EnvFilter::try_new(log_filter)?);
    if log_file.is_some() {
        let writer = Mutex::new(log_writer(log_file)?);
        subscriber.with(fmt::layer().with_writer(writer)).try_init()?;
    } else {
        subscriber
            .with(fmt::layer().with_writer(stderr))
            .try_init()?;
    }
    Ok(())
}
