mod check;
mod random;

use {
    crate::{
        check::{check_server, compare_replicas, replica_docs},
        random::mutate,
    },
    anyhow::{Context as _, Result, format_err},
    clap::Parser,
    hushsync::{
        Ctx,
        config::{Config, StagingPollConfig},
        sync::sync,
    },
    hushsync_protocol::{
        credentials::{AccessToken, EncryptionKey},
        util::log_writer,
    },
    hushsync_server::Server,
    portpicker::pick_unused_port,
    rand::{Rng, seq::index::sample},
    std::{
        collections::HashMap,
        net::{Ipv4Addr, SocketAddr},
        path::Path,
        sync::Mutex,
    },
    tempfile::TempDir,
    tokio::{net::TcpListener, sync::oneshot, task::JoinHandle},
    tracing::info,
    tracing_subscriber::{EnvFilter, util::SubscriberInitExt},
};

const USER: &str = "user1";

/// `(staged_encryption, pool_decryption)` of each replica.
const REPLICA_OPTIONS: [(bool, bool); 3] = [(true, true), (false, false), (true, false)];

#[derive(Debug, Parser)]
struct Args {
    #[clap(long, default_value_t = 300)]
    iterations: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dir = TempDir::new()?;
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(log_writer(Some(&dir.path().join("1.log")))?))
        .with_env_filter(EnvFilter::try_new("info,hushsync_server=debug")?)
        .finish()
        .init();

    let env = TestEnv::start(dir.path()).await?;
    let result = env.run(args.iterations).await;
    env.stop().await?;
    result
}

struct TestEnv {
    server: Server,
    shutdown: oneshot::Sender<()>,
    server_task: JoinHandle<Result<()>>,
    port: u16,
    encryption_key: EncryptionKey,
    token: AccessToken,
    replicas: Vec<Ctx>,
}

impl TestEnv {
    async fn start(dir: &Path) -> Result<Self> {
        let port = pick_unused_port().context("failed to pick port")?;
        let token = AccessToken::generate();
        let server_config = hushsync_server::Config {
            bind_addr: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port),
            replica_uid: "server".into(),
            tokens: HashMap::from([(USER.to_owned(), token.clone())]),
            log_file: None,
            log_filter: "info".into(),
        };
        let config_path = dir.join("server_config.json5");
        fs_err::write(&config_path, json5::to_string(&server_config)?)?;
        let server_config = hushsync_server::Config::parse(&config_path)?;

        let server = Server::new(&server_config);
        let listener = TcpListener::bind(server_config.bind_addr).await?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn({
            let server = server.clone();
            async move {
                server
                    .run(listener, async move {
                        shutdown_rx.await.ok();
                    })
                    .await
            }
        });

        let mut env = Self {
            server,
            shutdown,
            server_task,
            port,
            encryption_key: EncryptionKey::generate()?,
            token,
            replicas: Vec::new(),
        };
        for (index, (staged_encryption, pool_decryption)) in REPLICA_OPTIONS.into_iter().enumerate()
        {
            let mut config = env.client_config(&dir.join(format!("replica{index}.db")))?;
            config.staged_encryption = staged_encryption;
            config.pool_decryption = pool_decryption;
            env.replicas.push(Ctx::new(config)?);
        }
        Ok(env)
    }

    fn client_config(&self, local_db_path: &Path) -> Result<Config> {
        Ok(Config {
            server_url: format!("http://127.0.0.1:{}/", self.port).parse()?,
            encryption_key: self.encryption_key.clone(),
            user_uuid: USER.into(),
            access_token: self.token.clone(),
            replica_uid: None,
            local_db_path: Some(local_db_path.to_owned()),
            log_file: None,
            log_filter: "info".into(),
            staged_encryption: true,
            pool_decryption: true,
            staging_poll: StagingPollConfig::default(),
        })
    }

    async fn stop(self) -> Result<()> {
        self.shutdown
            .send(())
            .map_err(|()| format_err!("server task is gone"))?;
        self.server_task.await?
    }

    async fn run(&self, iterations: u32) -> Result<()> {
        for iteration in 0..iterations {
            info!(iteration, "step");
            self.step().await?;
        }
        Ok(())
    }

    /// Mutates one or two replicas, syncs all of them and checks that they converged.
    async fn step(&self) -> Result<()> {
        let count = self.replicas.len();
        if rand::rng().random_bool(0.2) {
            info!("simultaneous edit of two replicas");
            let chosen = sample(&mut rand::rng(), count, 2).into_vec();
            for &index in &chosen {
                mutate(&self.replica(index)?.db)?;
            }
            for &index in &chosen {
                sync(self.replica(index)?).await?;
            }
        } else {
            let replica = self.replica(rand::rng().random_range(0..count))?;
            for _ in 0..rand::rng().random_range(1..=3_u32) {
                mutate(&replica.db)?;
            }
            sync(replica).await?;
        }
        for replica in &self.replicas {
            sync(replica).await?;
        }
        self.check()
    }

    fn replica(&self, index: usize) -> Result<&Ctx> {
        self.replicas
            .get(index)
            .ok_or_else(|| format_err!("no replica {index}"))
    }

    fn check(&self) -> Result<()> {
        let (first, others) = self
            .replicas
            .split_first()
            .context("no replicas")?;
        let expected = replica_docs(&first.db)?;
        for replica in others {
            compare_replicas(&expected, &replica.db)?;
        }
        check_server(&self.server, USER, &*first.crypto, &expected)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[expect(clippy::indexing_slicing, reason = "test")]
    #[tokio::test(flavor = "multi_thread")]
    async fn replicas_converge() {
        let dir = TempDir::new().unwrap();
        let env = TestEnv::start(dir.path()).await.unwrap();
        let (first, second) = (&env.replicas[0], &env.replicas[1]);
        let content = json!({"title": "groceries", "items": ["milk"]});
        first
            .db
            .put("list", content.as_object().unwrap().clone())
            .unwrap();
        let summary = sync(first).await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.received, 0);

        let summary = sync(second).await.unwrap();
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.received, 1);
        let doc = second.db.get("list").unwrap().unwrap();
        assert_eq!(doc.content.as_ref(), content.as_object());
        assert_eq!(doc.rev, first.db.get("list").unwrap().unwrap().rev);

        second.db.delete("list").unwrap().unwrap();
        sync(second).await.unwrap();
        let summary = sync(first).await.unwrap();
        assert_eq!(summary.received, 1);
        assert!(first.db.get("list").unwrap().unwrap().is_tombstone());

        // Nothing new: received documents are not echoed back.
        let summary = sync(first).await.unwrap();
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.received, 0);

        sync(&env.replicas[2]).await.unwrap();
        env.check().unwrap();
        env.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn random_steps() {
        let dir = TempDir::new().unwrap();
        let env = TestEnv::start(dir.path()).await.unwrap();
        env.run(15).await.unwrap();
        env.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wrong_token_is_rejected() {
        let dir = TempDir::new().unwrap();
        let env = TestEnv::start(dir.path()).await.unwrap();
        let mut config = env.client_config(&dir.path().join("intruder.db")).unwrap();
        config.access_token = AccessToken::generate();
        let intruder = Ctx::new(config).unwrap();
        intruder
            .db
            .put("doc", json!({"a": 1}).as_object().unwrap().clone())
            .unwrap();

        let err = sync(&intruder).await.unwrap_err();
        assert!(format!("{err:#}").contains("401"), "{err:#}");
        let target = intruder.config.server_url.as_str();
        assert_eq!(intruder.db.checkpoint(target).unwrap(), None);
        assert!(env.server.databases().lock().get(USER).is_none());
        env.stop().await.unwrap();
    }
}
