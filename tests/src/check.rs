use {
    crate::random::PLAINTEXT_MARKER,
    anyhow::{Context as _, Result, bail, ensure},
    hushsync::db::Db,
    hushsync_protocol::Document,
    hushsync_sdk::{CryptoContext, envelope::decrypt_doc_json},
    hushsync_server::Server,
    serde_json::Value,
};

/// All documents of the replica including tombstones, ordered by id.
pub fn replica_docs(db: &Db) -> Result<Vec<Document>> {
    db.all().collect()
}

pub fn compare_replicas(expected: &[Document], db: &Db) -> Result<()> {
    let actual = replica_docs(db)?;
    for (expected, actual) in expected.iter().zip(&actual) {
        ensure!(
            expected == actual,
            "replica {} diverged: expected {expected:?}, got {actual:?}",
            db.replica_uid()
        );
    }
    ensure!(
        expected.len() == actual.len(),
        "replica {} has {} documents, expected {}",
        db.replica_uid(),
        actual.len(),
        expected.len()
    );
    Ok(())
}

/// Checks that the server holds exactly `expected`, and only as ciphertext.
pub fn check_server(
    server: &Server,
    user: &str,
    crypto: &dyn CryptoContext,
    expected: &[Document],
) -> Result<()> {
    let databases = server.databases().lock();
    let database = databases.get(user).context("no server database for user")?;
    let mut count = 0_usize;
    for (doc_id, stored) in database.docs() {
        count = count.saturating_add(1);
        let expected_doc = expected
            .iter()
            .find(|doc| doc.doc_id == doc_id)
            .with_context(|| format!("unexpected document {doc_id:?} on the server"))?;
        ensure!(
            stored.rev == expected_doc.rev,
            "revision mismatch for {doc_id:?}: {:?} != {:?}",
            stored.rev,
            expected_doc.rev
        );
        match (&stored.content, &expected_doc.content) {
            (Value::Null, None) => {}
            (Value::String(envelope), Some(content)) => {
                ensure!(
                    !envelope.contains(PLAINTEXT_MARKER),
                    "server has plaintext of {doc_id:?}"
                );
                let plaintext: Value =
                    serde_json::from_str(&decrypt_doc_json(crypto, doc_id, envelope)?)?;
                ensure!(
                    plaintext.as_object() == Some(content),
                    "content mismatch for {doc_id:?}"
                );
            }
            (stored, _) => bail!("unexpected server content of {doc_id:?}: {stored}"),
        }
    }
    ensure!(
        count == expected.len(),
        "server has {count} documents, expected {}",
        expected.len()
    );
    Ok(())
}
