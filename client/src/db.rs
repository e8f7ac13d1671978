use {
    anyhow::{Context as _, Result, bail},
    hushsync_protocol::{Document, Generation, ReplicaUid, TransactionId},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    sled::{
        IVec, Transactional,
        transaction::{ConflictableTransactionError, TransactionalTree},
    },
    std::{fmt::Debug, io, path::Path},
    tracing::debug,
};

const KEY_REPLICA_UID: &[u8] = b"replica_uid";
const KEY_GENERATION: &[u8] = b"generation";
const KEY_REV_COUNTER: &[u8] = b"rev_counter";
const CHECKPOINT_PREFIX: &str = "checkpoint/";

/// Local replica: documents, generation log and sync checkpoints.
#[derive(Debug, Clone)]
pub struct Db {
    db: sled::Db,
    docs: sled::Tree,
    log: sled::Tree,
    replica_uid: ReplicaUid,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDoc {
    rev: Option<String>,
    content: Option<Map<String, Value>>,
    generation: Generation,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    doc_id: String,
    trans_id: TransactionId,
}

/// State of the last successful sync with a target.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub target_replica_uid: Option<ReplicaUid>,
    pub target_generation: Generation,
    pub target_trans_id: TransactionId,
    /// Local changes up to this generation are known to the target.
    pub local_generation_sent: Generation,
}

enum Rev {
    /// Assign the next local revision.
    Local,
    /// Keep the revision of a document received from a target.
    Remote(Option<String>),
}

impl Db {
    /// Opens the replica at `path`.
    ///
    /// The replica uid is stored on first open. It's taken from `replica_uid` if it's set,
    /// otherwise a random one is generated.
    pub fn open(path: &Path, replica_uid: Option<&ReplicaUid>) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("failed to open {path:?}"))?;
        let stored_uid = db
            .get(KEY_REPLICA_UID)?
            .map(|value| String::from_utf8(value.to_vec()))
            .transpose()?
            .map(ReplicaUid);
        let replica_uid = match (stored_uid, replica_uid) {
            (Some(stored), Some(configured)) if stored != *configured => {
                bail!("local database belongs to replica {stored}, but config specifies {configured}");
            }
            (Some(stored), _) => stored,
            (None, configured) => {
                let replica_uid = configured.cloned().unwrap_or_else(ReplicaUid::generate);
                db.insert(KEY_REPLICA_UID, replica_uid.as_str().as_bytes())?;
                debug!(%replica_uid, "initialized local replica");
                replica_uid
            }
        };
        Ok(Self {
            docs: db.open_tree("docs")?,
            log: db.open_tree("log")?,
            db,
            replica_uid,
        })
    }

    pub fn replica_uid(&self) -> &ReplicaUid {
        &self.replica_uid
    }

    pub fn sled(&self) -> &sled::Db {
        &self.db
    }

    pub fn generation(&self) -> Result<Generation> {
        Ok(Generation(decode_u64(self.db.get(KEY_GENERATION)?)?))
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<Document>> {
        self.docs
            .get(doc_id.as_bytes())?
            .map(|value| {
                let stored: StoredDoc = serde_json::from_slice(&value)?;
                anyhow::Ok(Document::new(doc_id, stored.rev, stored.content))
            })
            .transpose()
    }

    /// All documents including tombstones, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = Result<Document>> + '_ {
        self.docs.iter().map(|pair| {
            let (key, value) = pair?;
            let stored: StoredDoc = serde_json::from_slice(&value)?;
            anyhow::Ok(Document::new(
                String::from_utf8(key.to_vec())?,
                stored.rev,
                stored.content,
            ))
        })
    }

    /// Creates or updates a document with a new local revision.
    pub fn put(&self, doc_id: &str, content: Map<String, Value>) -> Result<Document> {
        self.store(doc_id, Rev::Local, Some(content))
    }

    /// Replaces a document with a tombstone. Returns `None` if there is no such document.
    pub fn delete(&self, doc_id: &str) -> Result<Option<Document>> {
        match self.get(doc_id)? {
            Some(doc) if !doc.is_tombstone() => Ok(Some(self.store(doc_id, Rev::Local, None)?)),
            _ => Ok(None),
        }
    }

    /// Stores a document received from a sync target, keeping its revision.
    pub fn insert_remote(&self, doc: &Document) -> Result<()> {
        self.store(&doc.doc_id, Rev::Remote(doc.rev.clone()), doc.content.clone())?;
        Ok(())
    }

    fn store(
        &self,
        doc_id: &str,
        rev: Rev,
        content: Option<Map<String, Value>>,
    ) -> Result<Document> {
        let trans_id = TransactionId::generate();
        let (rev, generation) = (&self.docs, &self.log, &*self.db).transaction(
            |(docs, log, meta)| {
                let generation = next_counter(meta, KEY_GENERATION)?;
                let rev = match &rev {
                    Rev::Local => Some(format!(
                        "{}:{}",
                        self.replica_uid,
                        next_counter(meta, KEY_REV_COUNTER)?
                    )),
                    Rev::Remote(rev) => rev.clone(),
                };
                let stored = StoredDoc {
                    rev: rev.clone(),
                    content: content.clone(),
                    generation: Generation(generation),
                };
                docs.insert(
                    doc_id.as_bytes(),
                    serde_json::to_vec(&stored).map_err(into_abort_err)?,
                )?;
                let entry = LogEntry {
                    doc_id: doc_id.to_owned(),
                    trans_id: trans_id.clone(),
                };
                log.insert(
                    &generation.to_be_bytes(),
                    serde_json::to_vec(&entry).map_err(into_abort_err)?,
                )?;
                Ok((rev, Generation(generation)))
            },
        )?;
        debug!(doc_id, ?rev, %generation, "stored document");
        Ok(Document::new(doc_id, rev, content))
    }

    /// Latest change of every document changed after `generation`, ordered by generation.
    pub fn changes_since(
        &self,
        generation: Generation,
    ) -> Result<Vec<(Document, Generation, TransactionId)>> {
        let Some(start) = generation.next() else {
            return Ok(Vec::new());
        };
        let mut changes = Vec::new();
        for pair in self.log.range(start.0.to_be_bytes()..) {
            let (key, value) = pair?;
            let change_generation = Generation(decode_u64(Some(key))?);
            let entry: LogEntry = serde_json::from_slice(&value)?;
            let Some(value) = self.docs.get(entry.doc_id.as_bytes())? else {
                continue;
            };
            let stored: StoredDoc = serde_json::from_slice(&value)?;
            if stored.generation == change_generation {
                changes.push((
                    Document::new(entry.doc_id, stored.rev, stored.content),
                    change_generation,
                    entry.trans_id,
                ));
            }
        }
        Ok(changes)
    }

    pub fn checkpoint(&self, target: &str) -> Result<Option<Checkpoint>> {
        self.db
            .get(checkpoint_key(target))?
            .map(|value| serde_json::from_slice(&value).context("invalid checkpoint"))
            .transpose()
    }

    pub fn set_checkpoint(&self, target: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.db
            .insert(checkpoint_key(target), serde_json::to_vec(checkpoint)?)?;
        self.db.flush()?;
        Ok(())
    }
}

fn checkpoint_key(target: &str) -> Vec<u8> {
    format!("{CHECKPOINT_PREFIX}{target}").into_bytes()
}

fn decode_u64(value: Option<IVec>) -> Result<u64> {
    let Some(value) = value else {
        return Ok(0);
    };
    let bytes: [u8; 8] = value
        .as_ref()
        .try_into()
        .context("invalid counter value")?;
    Ok(u64::from_be_bytes(bytes))
}

fn next_counter(
    tree: &TransactionalTree,
    key: &[u8],
) -> Result<u64, ConflictableTransactionError<io::Error>> {
    let value = decode_u64(tree.get(key)?).map_err(into_abort_err)?;
    let value = value
        .checked_add(1)
        .ok_or_else(|| into_abort_err("counter overflow"))?;
    tree.insert(key, &value.to_be_bytes())?;
    Ok(value)
}

fn into_abort_err(e: impl Debug) -> ConflictableTransactionError<io::Error> {
    ConflictableTransactionError::Abort(io::Error::other(format!("{e:?}")))
}
