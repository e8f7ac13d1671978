use {
    anyhow::Result,
    hushsync::db::Db,
    rand::{
        Rng,
        distr::{Alphanumeric, SampleString},
        seq::IndexedRandom,
    },
    serde_json::{Map, Value, json},
    tracing::debug,
};

/// Present in the content of every generated document. Must never reach the server.
pub const PLAINTEXT_MARKER: &str = "plaintext-marker";

const DOC_ID_POOL: usize = 30;

fn random_doc_id() -> String {
    format!("doc{}", rand::rng().random_range(0..DOC_ID_POOL))
}

pub fn random_content() -> Map<String, Value> {
    let text_len = rand::rng().random_range(0..=2000_usize);
    let value = json!({
        "marker": PLAINTEXT_MARKER,
        "text": Alphanumeric.sample_string(&mut rand::rng(), text_len),
        "count": rand::rng().random_range(0..1000_u32),
        "nested": { "flag": rand::rng().random_bool(0.5), "list": [1, "two", null] },
    });
    match value {
        Value::Object(content) => content,
        _ => Map::new(),
    }
}

/// Creates, updates or deletes a random document of the replica.
pub fn mutate(db: &Db) -> Result<()> {
    let live: Vec<String> = db
        .all()
        .filter_map(|doc| match doc {
            Ok(doc) if !doc.is_tombstone() => Some(Ok(doc.doc_id)),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
        .collect::<Result<_>>()?;
    if !live.is_empty() && rand::rng().random_bool(0.25) {
        if let Some(doc_id) = live.choose(&mut rand::rng()) {
            debug!(replica = %db.replica_uid(), doc_id, "deleting document");
            db.delete(doc_id)?;
        }
    } else {
        let doc_id = random_doc_id();
        debug!(replica = %db.replica_uid(), doc_id, "writing document");
        db.put(&doc_id, random_content())?;
    }
    Ok(())
}
