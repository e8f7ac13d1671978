use {
    anyhow::{Context as _, Result, format_err},
    derivative::Derivative,
    hushsync_protocol::{
        ReplicaUid,
        credentials::{AccessToken, EncryptionKey, TokenCredentials},
    },
    hushsync_sdk::exchange::{ExchangeConfig, StagingPoll},
    serde::{Deserialize, Serialize},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
    url::Url,
};

/// How long the sync exchange waits for the encrypter pool to stage a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingPollConfig {
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for StagingPollConfig {
    fn default() -> Self {
        let poll = StagingPoll::default();
        Self {
            attempts: poll.attempts,
            interval: poll.interval,
        }
    }
}

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Config {
    pub server_url: Url,
    #[derivative(Debug = "ignore")]
    pub encryption_key: EncryptionKey,
    pub user_uuid: String,
    #[derivative(Debug = "ignore")]
    pub access_token: AccessToken,
    /// Generated on first run if not set.
    #[serde(default)]
    pub replica_uid: Option<ReplicaUid>,
    #[serde(default)]
    pub local_db_path: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default = "default_true")]
    pub staged_encryption: bool,
    #[serde(default = "default_true")]
    pub pool_decryption: bool,
    #[serde(default)]
    pub staging_poll: StagingPollConfig,
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn parse(path: &Path) -> Result<Self> {
        json5::from_str(&fs_err::read_to_string(path)?)
            .with_context(|| format!("failed to parse config file {path:?}"))
    }

    pub fn local_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.local_db_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().ok_or_else(|| format_err!("cannot find data dir"))?;
        Ok(data_dir.join("hushsync.db"))
    }

    pub fn credentials(&self) -> TokenCredentials {
        TokenCredentials {
            uuid: self.user_uuid.clone(),
            token: self.access_token.clone(),
        }
    }

    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            staged_encryption: self.staged_encryption,
            pool_decryption: self.pool_decryption,
            staging_poll: StagingPoll {
                attempts: self.staging_poll.attempts,
                interval: self.staging_poll.interval,
            },
        }
    }
}
