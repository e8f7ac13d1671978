use {
    crate::{
        crypto::CryptoContext,
        envelope::encrypt_doc_json,
        error::{Result, SyncError},
        staging::StagingStore,
    },
    hushsync_protocol::{Document, util::maybe_block_in_place},
    parking_lot::Mutex,
    std::{
        collections::{HashMap, VecDeque},
        sync::Arc,
    },
    tokio::{
        sync::{
            Notify,
            oneshot::{self, error::TryRecvError},
        },
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

type EntryKey = (String, String);

#[derive(Debug, Default)]
struct Queue {
    order: VecDeque<EntryKey>,
    plaintexts: HashMap<EntryKey, String>,
}

impl Queue {
    fn push(&mut self, key: EntryKey, plaintext: String) {
        if self.plaintexts.insert(key.clone(), plaintext).is_none() {
            self.order.push_back(key);
        }
    }

    fn pop(&mut self) -> Option<(EntryKey, String)> {
        while let Some(key) = self.order.pop_front() {
            if let Some(plaintext) = self.plaintexts.remove(&key) {
                return Some((key, plaintext));
            }
        }
        None
    }

    fn contains(&self, key: &EntryKey) -> bool {
        self.plaintexts.contains_key(key)
    }
}

struct Shared {
    crypto: Arc<dyn CryptoContext>,
    staging: Arc<dyn StagingStore>,
    queue: Mutex<Queue>,
    failures: Mutex<HashMap<EntryKey, String>>,
    notify: Notify,
}

impl Shared {
    fn process(&self, (doc_id, rev): EntryKey, plaintext: &str) {
        let result = encrypt_doc_json(&*self.crypto, &doc_id, plaintext).and_then(|envelope| {
            self.staging
                .put(&doc_id, &rev, &envelope)
                .map_err(SyncError::Staging)
        });
        match result {
            Ok(()) => {
                debug!(%doc_id, %rev, "staged encrypted document");
                self.failures.lock().remove(&(doc_id, rev));
            }
            Err(err) => {
                warn!(%doc_id, %rev, error = %err, "failed to encrypt document");
                self.failures.lock().insert((doc_id, rev), err.to_string());
            }
        }
    }

    async fn run(self: Arc<Self>, mut stop: oneshot::Receiver<()>) {
        loop {
            if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }
            let next = self.queue.lock().pop();
            if let Some((key, plaintext)) = next {
                maybe_block_in_place(|| self.process(key, &plaintext));
                continue;
            }
            tokio::select! {
                _ = &mut stop => break,
                () = self.notify.notified() => {}
            }
        }
        debug!("encrypter pool worker stopped");
    }
}

struct Worker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Encrypts outgoing documents in the background and stages the envelopes
/// for the sync exchange.
pub struct EncrypterPool {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

fn entry_key(doc_id: &str, rev: Option<&str>) -> EntryKey {
    (doc_id.to_owned(), rev.unwrap_or_default().to_owned())
}

impl EncrypterPool {
    #[must_use]
    #[inline]
    pub fn new(crypto: Arc<dyn CryptoContext>, staging: Arc<dyn StagingStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                crypto,
                staging,
                queue: Mutex::default(),
                failures: Mutex::default(),
                notify: Notify::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts the background worker. Does nothing if it's already running.
    ///
    /// Must be called within a tokio runtime.
    #[inline]
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|worker| !worker.handle.is_finished()) {
            return;
        }
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(&self.shared).run(stop_rx));
        *worker = Some(Worker { stop, handle });
        debug!("encrypter pool started");
    }

    /// Stops the worker after the entry it's currently encrypting.
    ///
    /// Entries that were not processed stay queued and will be processed after a restart.
    #[inline]
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        // The worker might have exited already.
        let _ = worker.stop.send(());
        if let Err(err) = worker.handle.await {
            warn!(error = %err, "encrypter pool worker failed");
        }
    }

    #[must_use]
    #[inline]
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Queues a document for encryption and returns immediately.
    ///
    /// A later call for the same `(doc_id, rev)` replaces the queued content.
    #[inline]
    pub fn enqueue_for_encryption(&self, doc: &Document) {
        let Some(plaintext) = doc.get_json() else {
            warn!(doc_id = %doc.doc_id, "tombstones are never encrypted");
            return;
        };
        let key = entry_key(&doc.doc_id, doc.rev());
        self.shared.failures.lock().remove(&key);
        self.shared.queue.lock().push(key, plaintext);
        self.shared.notify.notify_one();
    }

    /// Returns the staged envelope of `(doc_id, rev)`.
    ///
    /// Returns `None` if the document was never queued or is not encrypted yet.
    /// Never waits for the worker.
    #[inline]
    pub fn get_encrypted_doc(&self, doc_id: &str, rev: Option<&str>) -> Result<Option<String>> {
        let key = entry_key(doc_id, rev);
        if let Some(message) = self.shared.failures.lock().get(&key) {
            return Err(SyncError::EncryptionFailed(message.clone()));
        }
        if self.shared.queue.lock().contains(&key) {
            return Ok(None);
        }
        self.shared
            .staging
            .get(&key.0, &key.1)
            .map_err(SyncError::Staging)
    }

    /// Removes the staged envelope of `(doc_id, rev)` after it was sent.
    #[inline]
    pub fn delete_encrypted_doc(&self, doc_id: &str, rev: Option<&str>) -> Result<()> {
        let key = entry_key(doc_id, rev);
        self.shared.failures.lock().remove(&key);
        self.shared
            .staging
            .delete(&key.0, &key.1)
            .map_err(SyncError::Staging)
    }

    /// Returns true if `(doc_id, rev)` is waiting for the worker.
    #[must_use]
    #[inline]
    pub fn is_queued(&self, doc_id: &str, rev: Option<&str>) -> bool {
        self.shared.queue.lock().contains(&entry_key(doc_id, rev))
    }

    /// Number of queued documents that are not encrypted yet.
    #[must_use]
    #[inline]
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().plaintexts.len()
    }
}

impl Drop for EncrypterPool {
    #[inline]
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.handle.abort();
        }
    }
}
