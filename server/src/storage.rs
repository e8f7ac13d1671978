//! In-memory user databases with a generation log.
//!
//! Every stored change gets a new generation and transaction id. Contents are kept
//! exactly as received, so the server only ever holds encryption envelopes.

use {
    hushsync_protocol::{
        Generation, ReplicaUid, TransactionId,
        endpoints::{DocEntry, SyncRequestMetadata, SyncResponseMetadata},
        stream::SyncStream,
    },
    serde_json::{Map, Value, json},
    std::collections::HashMap,
    thiserror::Error,
    tracing::debug,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("generation {requested} is newer than the current generation {current}")]
    InvalidGeneration {
        requested: Generation,
        current: Generation,
    },
    #[error("transaction id `{requested}` does not match generation {generation}")]
    InvalidTransactionId {
        generation: Generation,
        requested: TransactionId,
    },
    #[error("generation counter overflow")]
    GenerationOverflow,
}

impl ExchangeError {
    /// Error object sent in place of the closing bracket of the response stream.
    #[must_use]
    #[inline]
    pub fn payload(&self) -> Map<String, Value> {
        let error = match self {
            Self::InvalidGeneration { .. } => "invalid_generation",
            Self::InvalidTransactionId { .. } => "invalid_transaction_id",
            Self::GenerationOverflow => "internal_error",
        };
        let mut payload = Map::new();
        payload.insert("error".into(), json!(error));
        payload.insert("message".into(), json!(self.to_string()));
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDoc {
    pub rev: Option<String>,
    /// Envelope JSON string, or `null` for a tombstone.
    pub content: Value,
    pub generation: Generation,
    pub trans_id: TransactionId,
}

#[derive(Debug, Clone)]
struct LogEntry {
    generation: Generation,
    doc_id: String,
    trans_id: TransactionId,
}

/// Document database of one user.
#[derive(Debug)]
pub struct Database {
    replica_uid: ReplicaUid,
    docs: HashMap<String, StoredDoc>,
    log: Vec<LogEntry>,
}

impl Database {
    #[must_use]
    #[inline]
    pub fn new(replica_uid: ReplicaUid) -> Self {
        Self {
            replica_uid,
            docs: HashMap::new(),
            log: Vec::new(),
        }
    }

    #[must_use]
    #[inline]
    pub fn replica_uid(&self) -> &ReplicaUid {
        &self.replica_uid
    }

    #[must_use]
    #[inline]
    pub fn generation(&self) -> Generation {
        self.log.last().map_or_else(Generation::default, |entry| entry.generation)
    }

    /// Transaction id that produced `generation`. Generation 0 has the empty id.
    #[must_use]
    #[inline]
    pub fn transaction_id_at(&self, generation: Generation) -> Option<TransactionId> {
        if generation == Generation::default() {
            return Some(TransactionId::default());
        }
        self.log
            .binary_search_by_key(&generation, |entry| entry.generation)
            .ok()
            .and_then(|index| self.log.get(index))
            .map(|entry| entry.trans_id.clone())
    }

    #[must_use]
    #[inline]
    pub fn get(&self, doc_id: &str) -> Option<&StoredDoc> {
        self.docs.get(doc_id)
    }

    #[inline]
    pub fn docs(&self) -> impl Iterator<Item = (&str, &StoredDoc)> {
        self.docs.iter().map(|(id, doc)| (id.as_str(), doc))
    }

    fn validate(&self, generation: Generation, trans_id: &TransactionId) -> Result<(), ExchangeError> {
        let current = self.generation();
        if generation > current {
            return Err(ExchangeError::InvalidGeneration {
                requested: generation,
                current,
            });
        }
        if generation != Generation::default()
            && self.transaction_id_at(generation).as_ref() != Some(trans_id)
        {
            return Err(ExchangeError::InvalidTransactionId {
                generation,
                requested: trans_id.clone(),
            });
        }
        Ok(())
    }

    /// Stores an incoming document and returns its generation.
    ///
    /// A document identical to the stored one keeps its generation.
    fn put(&mut self, entry: DocEntry) -> Result<Generation, ExchangeError> {
        if let Some(stored) = self.docs.get(&entry.id) {
            if stored.rev == entry.rev && stored.content == entry.content {
                debug!(doc_id = %entry.id, "document already up to date");
                return Ok(stored.generation);
            }
        }
        let generation = self
            .generation()
            .next()
            .ok_or(ExchangeError::GenerationOverflow)?;
        let trans_id = TransactionId::generate();
        self.log.push(LogEntry {
            generation,
            doc_id: entry.id.clone(),
            trans_id: trans_id.clone(),
        });
        let stored = StoredDoc {
            rev: entry.rev,
            content: entry.content,
            generation,
            trans_id,
        };
        self.docs.insert(entry.id, stored);
        Ok(generation)
    }

    /// Latest change of every document changed after `generation`, ordered by generation.
    fn changes_since(&self, generation: Generation) -> impl Iterator<Item = DocEntry> + '_ {
        let start = self.log.partition_point(|entry| entry.generation <= generation);
        self.log
            .get(start..)
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| {
                let doc = self.docs.get(&entry.doc_id)?;
                (doc.generation == entry.generation).then(|| DocEntry {
                    id: entry.doc_id.clone(),
                    rev: doc.rev.clone(),
                    content: doc.content.clone(),
                    generation: doc.generation,
                    trans_id: doc.trans_id.clone(),
                })
            })
    }

    fn response_metadata(&self, ensure: bool) -> SyncResponseMetadata {
        let new_generation = self.generation();
        SyncResponseMetadata {
            new_generation,
            new_transaction_id: self.transaction_id_at(new_generation).unwrap_or_default(),
            replica_uid: ensure.then(|| self.replica_uid.clone()),
        }
    }

    /// Applies the documents sent by a replica and returns the documents it is missing.
    ///
    /// Errors are returned together with the metadata describing the current state.
    /// Nothing is applied if the known generation is invalid.
    #[inline]
    pub fn exchange(
        &mut self,
        request: SyncStream<SyncRequestMetadata, DocEntry>,
    ) -> Result<
        SyncStream<SyncResponseMetadata, DocEntry>,
        (SyncResponseMetadata, ExchangeError),
    > {
        let SyncStream { metadata, entries } = request;
        if let Err(err) =
            self.validate(metadata.last_known_generation, &metadata.last_known_trans_id)
        {
            return Err((self.response_metadata(metadata.ensure), err));
        }
        let mut received = HashMap::new();
        for entry in entries {
            let doc_id = entry.id.clone();
            match self.put(entry) {
                Ok(generation) => {
                    received.insert(doc_id, generation);
                }
                Err(err) => return Err((self.response_metadata(metadata.ensure), err)),
            }
        }
        let entries = self
            .changes_since(metadata.last_known_generation)
            .filter(|entry| received.get(&entry.id) != Some(&entry.generation))
            .collect();
        Ok(SyncStream {
            metadata: self.response_metadata(metadata.ensure),
            entries,
        })
    }
}

/// Databases of all users, created on the first sync that asks to `ensure` them.
#[derive(Debug)]
pub struct Databases {
    server_uid: ReplicaUid,
    databases: HashMap<String, Database>,
}

impl Databases {
    #[must_use]
    #[inline]
    pub fn new(server_uid: ReplicaUid) -> Self {
        Self {
            server_uid,
            databases: HashMap::new(),
        }
    }

    #[must_use]
    #[inline]
    pub fn get(&self, user: &str) -> Option<&Database> {
        self.databases.get(user)
    }

    #[inline]
    pub fn get_mut(&mut self, user: &str) -> Option<&mut Database> {
        self.databases.get_mut(user)
    }

    #[inline]
    pub fn ensure(&mut self, user: &str) -> &mut Database {
        let server_uid = &self.server_uid;
        self.databases
            .entry(user.to_owned())
            .or_insert_with(|| {
                debug!(user, "creating database");
                Database::new(format!("{server_uid}-{user}").into())
            })
    }
}
