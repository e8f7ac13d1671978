use {
    crate::{Ctx, db::Checkpoint},
    anyhow::Result,
    hushsync_protocol::{Document, Generation, ReplicaUid, TransactionId},
    hushsync_sdk::{
        CryptoContext, SyncTarget,
        exchange::EnsureCallback,
        pool::EncrypterPool,
        staging::{SledStaging, StagingStore},
    },
    parking_lot::Mutex,
    std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    tracing::{info, warn},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub sent: usize,
    pub received: u64,
    pub target_generation: Generation,
}

/// Sends local changes to the server and applies the changes it returns.
///
/// The checkpoint is only updated if the exchange succeeds, so a failed sync
/// is retried from the same state.
pub async fn sync(ctx: &Ctx) -> Result<SyncSummary> {
    let target_key = ctx.config.server_url.as_str();
    let checkpoint = ctx.db.checkpoint(target_key)?.unwrap_or_default();
    let start_generation = ctx.db.generation()?;
    let changes = ctx.db.changes_since(checkpoint.local_generation_sent)?;
    info!(
        changes = changes.len(),
        local_generation = %start_generation,
        target_generation = %checkpoint.target_generation,
        "starting sync"
    );

    let crypto = Arc::clone(&ctx.crypto) as Arc<dyn CryptoContext>;
    let mut target = SyncTarget::new(
        ctx.transport.clone(),
        Arc::clone(&crypto),
        ctx.config.exchange_config(),
    );
    if ctx.config.staged_encryption {
        let staging = Arc::new(SledStaging::from_db(ctx.db.sled())?) as Arc<dyn StagingStore>;
        let encrypter = Arc::new(EncrypterPool::new(crypto, staging));
        encrypter.start();
        for (doc, _, _) in &changes {
            if doc.syncable && !doc.is_tombstone() {
                encrypter.enqueue_for_encryption(doc);
            }
        }
        target = target.with_encrypter(encrypter);
    }

    let received = Arc::new(AtomicU64::new(0));
    let insert_doc = {
        let db = ctx.db.clone();
        let received = Arc::clone(&received);
        move |doc: Document, _generation: Generation, _trans_id: TransactionId| -> Result<()> {
            db.insert_remote(&doc)?;
            received.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    };
    let ensured = Arc::new(Mutex::new(None::<ReplicaUid>));
    let ensure_callback = checkpoint.target_replica_uid.is_none().then(|| {
        let ensured = Arc::clone(&ensured);
        Box::new(move |replica_uid: ReplicaUid| -> Result<()> {
            info!(%replica_uid, "sync target is ready");
            *ensured.lock() = Some(replica_uid);
            Ok(())
        }) as EnsureCallback
    });

    let result = target
        .sync_exchange(
            &changes,
            ctx.db.replica_uid(),
            checkpoint.target_generation,
            &checkpoint.target_trans_id,
            insert_doc,
            ensure_callback,
        )
        .await;
    if let Some(encrypter) = target.encrypter() {
        encrypter.stop().await;
    }
    let (target_generation, target_trans_id) = result.inspect_err(|err| {
        warn!(error = %err, "sync failed, keeping the previous checkpoint");
    })?;

    // Documents received in this exchange must not be sent back, unless
    // something else was written in the meantime.
    let received = received.load(Ordering::Relaxed);
    let current_generation = ctx.db.generation()?;
    let local_generation_sent =
        if start_generation.0.checked_add(received) == Some(current_generation.0) {
            current_generation
        } else {
            start_generation
        };
    let target_replica_uid = ensured.lock().take().or(checkpoint.target_replica_uid);
    ctx.db.set_checkpoint(
        target_key,
        &Checkpoint {
            target_replica_uid,
            target_generation,
            target_trans_id,
            local_generation_sent,
        },
    )?;
    let summary = SyncSummary {
        sent: changes.iter().filter(|(doc, _, _)| doc.syncable).count(),
        received,
        target_generation,
    };
    info!(
        sent = summary.sent,
        received = summary.received,
        target_generation = %summary.target_generation,
        "sync complete"
    );
    Ok(summary)
}
