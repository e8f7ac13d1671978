//! One sync round trip with a remote replica.
//!
//! The outgoing stream carries the local changes with their contents encrypted.
//! The whole response is decoded before anything is passed to the insertion
//! callback, so a corrupt or failed response never leaves a partially applied state.

use {
    crate::{
        client::SyncTransport,
        crypto::CryptoContext,
        envelope::{decrypt_document, encrypt_document},
        error::{Result, SyncError},
        pool::{DecrypterPool, EncrypterPool},
    },
    derive_more::Display,
    hushsync_protocol::{
        Document, Generation, ReplicaUid, TransactionId,
        endpoints::{DocEntry, SyncRequestMetadata, SyncResponseMetadata},
        stream::{self, StreamWriter, SyncStream},
        util::maybe_block_in_place,
    },
    serde_json::Value,
    std::{sync::Arc, time::Duration},
    tokio::time::sleep,
    tracing::{debug, info, instrument, warn},
};

/// Receives the replica uid reported by the server when the exchange asked it to `ensure`
/// the target database.
pub type EnsureCallback = Box<dyn FnOnce(ReplicaUid) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ExchangeState {
    Idle,
    SendingOutgoing,
    AwaitingResponse,
    ParsingIncoming,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingPoll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for StagingPoll {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Take outgoing envelopes from the encrypter pool when it has them.
    pub staged_encryption: bool,
    /// Decrypt incoming documents with a decrypter pool instead of inline.
    pub pool_decryption: bool,
    pub staging_poll: StagingPoll,
}

impl Default for ExchangeConfig {
    #[inline]
    fn default() -> Self {
        Self {
            staged_encryption: true,
            pool_decryption: true,
            staging_poll: StagingPoll::default(),
        }
    }
}

/// Remote replica reachable through `transport`.
pub struct SyncTarget<T> {
    transport: T,
    crypto: Arc<dyn CryptoContext>,
    encrypter: Option<Arc<EncrypterPool>>,
    config: ExchangeConfig,
    state: parking_lot::Mutex<ExchangeState>,
    exchange_lock: tokio::sync::Mutex<()>,
}

struct Outgoing {
    content: Value,
    staged: bool,
}

impl<T: SyncTransport> SyncTarget<T> {
    #[must_use]
    #[inline]
    pub fn new(transport: T, crypto: Arc<dyn CryptoContext>, config: ExchangeConfig) -> Self {
        Self {
            transport,
            crypto,
            encrypter: None,
            config,
            state: parking_lot::Mutex::new(ExchangeState::Idle),
            exchange_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_encrypter(mut self, encrypter: Arc<EncrypterPool>) -> Self {
        self.encrypter = Some(encrypter);
        self
    }

    #[must_use]
    #[inline]
    pub fn state(&self) -> ExchangeState {
        *self.state.lock()
    }

    #[must_use]
    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    #[inline]
    pub fn encrypter(&self) -> Option<&Arc<EncrypterPool>> {
        self.encrypter.as_ref()
    }

    fn set_state(&self, state: ExchangeState) {
        debug!(%state, "exchange state");
        *self.state.lock() = state;
    }

    /// Sends `docs` to the target and applies the documents it returns.
    ///
    /// Incoming documents are passed to `insert_doc_cb` in the order of the response
    /// stream. On success returns the target's new generation and transaction id.
    /// On failure the caller's checkpoint must stay at `last_known_generation`.
    #[instrument(skip_all, fields(source = %source_replica_uid, %last_known_generation))]
    #[inline]
    pub async fn sync_exchange<F>(
        &self,
        docs: &[(Document, Generation, TransactionId)],
        source_replica_uid: &ReplicaUid,
        last_known_generation: Generation,
        last_known_trans_id: &TransactionId,
        insert_doc_cb: F,
        ensure_callback: Option<EnsureCallback>,
    ) -> Result<(Generation, TransactionId)>
    where
        F: Fn(Document, Generation, TransactionId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let _guard = self.exchange_lock.lock().await;
        let result = self
            .run(
                docs,
                source_replica_uid,
                SyncRequestMetadata {
                    last_known_generation,
                    last_known_trans_id: last_known_trans_id.clone(),
                    ensure: ensure_callback.is_some(),
                },
                insert_doc_cb,
                ensure_callback,
            )
            .await;
        match &result {
            Ok((generation, trans_id)) => {
                info!(%generation, %trans_id, "sync exchange complete");
                self.set_state(ExchangeState::Complete);
            }
            Err(err) => {
                warn!(error = %err, "sync exchange failed");
                self.set_state(ExchangeState::Failed);
            }
        }
        result
    }

    async fn run<F>(
        &self,
        docs: &[(Document, Generation, TransactionId)],
        source_replica_uid: &ReplicaUid,
        metadata: SyncRequestMetadata,
        insert_doc_cb: F,
        ensure_callback: Option<EnsureCallback>,
    ) -> Result<(Generation, TransactionId)>
    where
        F: Fn(Document, Generation, TransactionId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.set_state(ExchangeState::SendingOutgoing);
        let mut writer = StreamWriter::new();
        writer.write_line(&metadata).map_err(broken)?;
        let mut staged = Vec::new();
        for (doc, generation, trans_id) in docs {
            if !doc.syncable {
                debug!(doc_id = %doc.doc_id, "skipping non-syncable document");
                continue;
            }
            let outgoing = self.outgoing_content(doc).await?;
            if outgoing.staged {
                staged.push(doc);
            }
            let entry = DocEntry {
                id: doc.doc_id.clone(),
                rev: doc.rev.clone(),
                content: outgoing.content,
                generation: *generation,
                trans_id: trans_id.clone(),
            };
            writer.write_line(&entry).map_err(broken)?;
        }

        self.set_state(ExchangeState::AwaitingResponse);
        let response = self
            .transport
            .send_sync_stream(source_replica_uid, writer.finish())
            .await
            .map_err(SyncError::Transport)?;

        self.set_state(ExchangeState::ParsingIncoming);
        let SyncStream { metadata, entries } =
            stream::decode::<SyncResponseMetadata, DocEntry>(&response)?;
        debug!(
            new_generation = %metadata.new_generation,
            incoming = entries.len(),
            "received sync response"
        );
        if let (Some(ensure_callback), Some(replica_uid)) =
            (ensure_callback, metadata.replica_uid.clone())
        {
            ensure_callback(replica_uid).map_err(SyncError::Callback)?;
        }
        if self.config.pool_decryption && !entries.is_empty() {
            self.decrypt_with_pool(entries, insert_doc_cb).await?;
        } else {
            self.decrypt_inline(entries, &insert_doc_cb)?;
        }

        if let Some(encrypter) = &self.encrypter {
            for doc in staged {
                if let Err(err) = encrypter.delete_encrypted_doc(&doc.doc_id, doc.rev()) {
                    warn!(doc_id = %doc.doc_id, error = %err, "failed to delete staged document");
                }
            }
        }
        Ok((metadata.new_generation, metadata.new_transaction_id))
    }

    async fn outgoing_content(&self, doc: &Document) -> Result<Outgoing> {
        if doc.is_tombstone() {
            return Ok(Outgoing {
                content: Value::Null,
                staged: false,
            });
        }
        if let Some(envelope) = self.staged_envelope(doc).await? {
            return Ok(Outgoing {
                content: Value::String(envelope),
                staged: true,
            });
        }
        let content = maybe_block_in_place(|| encrypt_document(&*self.crypto, doc))?;
        Ok(Outgoing {
            content,
            staged: false,
        })
    }

    /// Waits a bounded time for the encrypter pool to stage `doc`.
    async fn staged_envelope(&self, doc: &Document) -> Result<Option<String>> {
        let Some(encrypter) = self.encrypter.as_ref().filter(|_| self.config.staged_encryption)
        else {
            return Ok(None);
        };
        let poll = self.config.staging_poll;
        for attempt in 1..=poll.attempts {
            if let Some(envelope) = encrypter.get_encrypted_doc(&doc.doc_id, doc.rev())? {
                return Ok(Some(envelope));
            }
            if !encrypter.is_queued(&doc.doc_id, doc.rev()) || attempt == poll.attempts {
                break;
            }
            sleep(poll.interval).await;
        }
        debug!(doc_id = %doc.doc_id, "no staged envelope, encrypting inline");
        Ok(None)
    }

    async fn decrypt_with_pool<F>(&self, entries: Vec<DocEntry>, insert_doc_cb: F) -> Result<()>
    where
        F: Fn(Document, Generation, TransactionId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let expected = u64::try_from(entries.len()).map_err(broken)?;
        let pool = DecrypterPool::new(Arc::clone(&self.crypto), insert_doc_cb);
        let completion = pool.start(expected);
        for (index, entry) in (1_u64..).zip(entries) {
            pool.insert_received_doc(
                entry.id,
                entry.rev,
                entry.content,
                entry.generation,
                entry.trans_id,
                index,
            );
        }
        let result = completion.await;
        pool.stop();
        result.map(drop)
    }

    fn decrypt_inline<F>(&self, entries: Vec<DocEntry>, insert_doc_cb: &F) -> Result<()>
    where
        F: Fn(Document, Generation, TransactionId) -> anyhow::Result<()>,
    {
        let decrypted = maybe_block_in_place(|| {
            entries
                .into_iter()
                .map(|entry| {
                    let doc =
                        decrypt_document(&*self.crypto, entry.id, entry.rev, entry.content.into())?;
                    Ok((doc, entry.generation, entry.trans_id))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        for (doc, generation, trans_id) in decrypted {
            insert_doc_cb(doc, generation, trans_id).map_err(SyncError::Callback)?;
        }
        Ok(())
    }
}

fn broken(err: impl ToString) -> SyncError {
    SyncError::BrokenSyncStream(err.to_string())
}
