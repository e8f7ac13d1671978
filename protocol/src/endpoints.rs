use {
    crate::{Generation, ReplicaUid, TransactionId},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Content type of both the request and the response body of a sync exchange.
pub const SYNC_STREAM_CONTENT_TYPE: &str = "application/x-u1db-sync-stream";

/// Path segment of the sync exchange endpoint: `{server_url}/sync-from/{source_replica_uid}`.
pub const SYNC_FROM_SEGMENT: &str = "sync-from";

/// First line of the request stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequestMetadata {
    pub last_known_generation: Generation,
    pub last_known_trans_id: TransactionId,
    /// Asks the server to create the target database if needed and
    /// report its replica uid.
    pub ensure: bool,
}

/// First line of the response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponseMetadata {
    pub new_generation: Generation,
    pub new_transaction_id: TransactionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_uid: Option<ReplicaUid>,
}

/// One document in either direction.
///
/// `content` is the JSON serialization of an encryption envelope,
/// or `null` for a tombstone. Decoders also accept an inline object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocEntry {
    pub id: String,
    /// Required in the stream; `null` for a document without a revision.
    #[serde(deserialize_with = "Option::deserialize")]
    pub rev: Option<String>,
    pub content: Value,
    #[serde(rename = "gen")]
    pub generation: Generation,
    pub trans_id: TransactionId,
}
