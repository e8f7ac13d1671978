use {
    super::reorder::ReorderBuffer,
    crate::{
        crypto::CryptoContext,
        envelope::{IncomingContent, decrypt_document},
        error::{Result, SyncError},
    },
    anyhow::format_err,
    hushsync_protocol::{Document, Generation, TransactionId},
    parking_lot::Mutex,
    std::{
        any::Any,
        collections::HashSet,
        fmt,
        future::Future,
        panic::{AssertUnwindSafe, catch_unwind},
        pin::Pin,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        task::{Context, Poll},
    },
    tokio::{sync::oneshot, task::JoinSet},
    tracing::{debug, warn},
};

/// Receives incoming documents in the order they appeared in the sync stream.
pub type InsertDocCallback =
    Arc<dyn Fn(Document, Generation, TransactionId) -> anyhow::Result<()> + Send + Sync>;

type Delivery = (Document, Generation, TransactionId);

struct Session {
    id: u64,
    expected: u64,
    delivered: u64,
    received: HashSet<u64>,
    buffer: ReorderBuffer<Delivery>,
    done: Option<oneshot::Sender<Result<u64>>>,
}

impl Session {
    fn fail(&mut self, err: SyncError) {
        self.buffer.clear();
        if let Some(done) = self.done.take() {
            // The caller might have stopped waiting.
            let _ = done.send(Err(err));
        }
    }
}

struct Shared {
    crypto: Arc<dyn CryptoContext>,
    callback: InsertDocCallback,
    session: Mutex<Option<Session>>,
}

impl Shared {
    /// Buffers a decrypted document and delivers every document that is ready.
    ///
    /// The callback runs under the session lock, so deliveries never overlap.
    fn complete(&self, session_id: u64, index: u64, result: Result<Delivery>) {
        let mut session = self.session.lock();
        let Some(session) = session.as_mut().filter(|session| session.id == session_id) else {
            debug!(index, "dropping document of an abandoned session");
            return;
        };
        if session.done.is_none() {
            return;
        }
        let delivery = match result {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(index, error = %err, "failed to decrypt document");
                session.fail(err);
                return;
            }
        };
        if let Err(err) = session.buffer.insert(index, delivery) {
            warn!(index, error = %err, "unexpected decrypted document");
            return;
        }
        while let Some((index, (doc, generation, trans_id))) = session.buffer.pop_ready() {
            debug!(index, doc_id = %doc.doc_id, "delivering document");
            let result = catch_unwind(AssertUnwindSafe(|| {
                (self.callback)(doc, generation, trans_id)
            }))
            .unwrap_or_else(|panic| {
                Err(format_err!(
                    "insertion callback panicked: {}",
                    panic_message(&*panic)
                ))
            });
            if let Err(err) = result {
                warn!(index, error = %err, "insertion callback failed");
                session.fail(SyncError::Callback(err));
                return;
            }
            session.delivered = session.delivered.saturating_add(1);
        }
        if session.delivered == session.expected {
            if let Some(done) = session.done.take() {
                debug!(delivered = session.delivered, "decrypter session complete");
                let _ = done.send(Ok(session.delivered));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&'static str>()
        .map(|&s| s.to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

/// Resolves when every document of a decrypter session was delivered.
///
/// Resolves with `SyncError::Cancelled` if the session is stopped or replaced.
pub struct Completion(oneshot::Receiver<Result<u64>>);

impl Future for Completion {
    type Output = Result<u64>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SyncError::Cancelled)))
    }
}

impl fmt::Debug for Completion {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish()
    }
}

/// Decrypts incoming documents concurrently and delivers them to the insertion
/// callback strictly in sequence index order.
pub struct DecrypterPool {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
    next_session_id: AtomicU64,
}

impl DecrypterPool {
    #[must_use]
    #[inline]
    pub fn new<F>(crypto: Arc<dyn CryptoContext>, callback: F) -> Self
    where
        F: Fn(Document, Generation, TransactionId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                crypto,
                callback: Arc::new(callback),
                session: Mutex::new(None),
            }),
            tasks: Mutex::new(JoinSet::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Starts a session that expects documents with indices `1..=expected`.
    ///
    /// An unfinished previous session is abandoned.
    #[inline]
    pub fn start(&self, expected: u64) -> Completion {
        let (done, receiver) = oneshot::channel();
        let done = if expected == 0 {
            let _ = done.send(Ok(0));
            None
        } else {
            Some(done)
        };
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.shared.session.lock().replace(Session {
            id,
            expected,
            delivered: 0,
            received: HashSet::new(),
            buffer: ReorderBuffer::default(),
            done,
        });
        if previous.is_some_and(|session| session.done.is_some()) {
            warn!("abandoning unfinished decrypter session");
        }
        debug!(expected, "decrypter session started");
        Completion(receiver)
    }

    /// Schedules decryption of a received document and returns immediately.
    ///
    /// `index` is the 1-based position of the document in the incoming stream.
    /// Documents without a running session, with an index outside of the session
    /// or with an index that was already received are dropped with a warning.
    #[inline]
    pub fn insert_received_doc(
        &self,
        doc_id: impl Into<String>,
        rev: Option<String>,
        content: impl Into<IncomingContent>,
        generation: Generation,
        trans_id: TransactionId,
        index: u64,
    ) {
        let doc_id = doc_id.into();
        let session_id = {
            let mut session = self.shared.session.lock();
            let Some(session) = session.as_mut().filter(|session| session.done.is_some()) else {
                warn!(%doc_id, index, "no running decrypter session");
                return;
            };
            if index == 0 || index > session.expected {
                warn!(%doc_id, index, expected = session.expected, "index out of range");
                return;
            }
            if !session.received.insert(index) {
                warn!(%doc_id, index, "duplicate index");
                return;
            }
            session.id
        };

        let shared = Arc::clone(&self.shared);
        let content = content.into();
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn_blocking(move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                decrypt_document(&*shared.crypto, doc_id, rev, content)
            }))
            .unwrap_or_else(|panic| {
                Err(SyncError::MalformedEnvelope(format!(
                    "decryption panicked: {}",
                    panic_message(&*panic)
                )))
            })
            .map(|doc| (doc, generation, trans_id));
            shared.complete(session_id, index, result);
        });
    }

    /// Abandons the current session. Its completion resolves with `SyncError::Cancelled`.
    #[inline]
    pub fn stop(&self) {
        if let Some(session) = self.shared.session.lock().take() {
            if session.done.is_some() {
                debug!(
                    delivered = session.delivered,
                    expected = session.expected,
                    "decrypter session stopped"
                );
            }
        }
        self.tasks.lock().abort_all();
    }

    /// Returns true if a session is waiting for more documents.
    #[must_use]
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared
            .session
            .lock()
            .as_ref()
            .is_some_and(|session| session.done.is_some())
    }

    /// Number of documents delivered in the current session.
    #[must_use]
    #[inline]
    pub fn delivered(&self) -> u64 {
        self.shared
            .session
            .lock()
            .as_ref()
            .map_or(0, |session| session.delivered)
    }

    /// Next index to be delivered in the current session.
    #[must_use]
    #[inline]
    pub fn next_index(&self) -> Option<u64> {
        self.shared
            .session
            .lock()
            .as_ref()
            .map(|session| session.buffer.next_index())
    }
}

impl Drop for DecrypterPool {
    #[inline]
    fn drop(&mut self) {
        self.tasks.get_mut().abort_all();
    }
}
