use {
    crate::storage::Databases,
    hushsync_protocol::{
        ReplicaUid,
        endpoints::{DocEntry, SyncRequestMetadata},
        stream::{self, StreamError, StreamWriter},
    },
    hyper::StatusCode,
    parking_lot::Mutex,
    tracing::{info, warn},
};

/// Runs a sync exchange of `user`'s database with the replica `source`.
///
/// Returns the response stream. Exchange errors are reported inside the stream,
/// malformed requests and unknown databases as an HTTP status.
#[inline]
pub fn sync_from(
    databases: &Mutex<Databases>,
    user: &str,
    source: &ReplicaUid,
    body: &str,
) -> Result<String, StatusCode> {
    let request = stream::decode::<SyncRequestMetadata, DocEntry>(body).map_err(|err| {
        match &err {
            StreamError::Broken(_) => warn!(error = %err, "malformed sync request"),
            StreamError::Remote(_) => warn!(error = %err, "sync request terminated with an error"),
        }
        StatusCode::BAD_REQUEST
    })?;
    let incoming = request.entries.len();

    let mut databases = databases.lock();
    let database = if request.metadata.ensure {
        databases.ensure(user)
    } else {
        databases.get_mut(user).ok_or_else(|| {
            warn!(user, "database does not exist");
            StatusCode::NOT_FOUND
        })?
    };
    let response = database.exchange(request);
    drop(databases);

    match response {
        Ok(response) => {
            info!(
                user,
                %source,
                incoming,
                outgoing = response.entries.len(),
                new_generation = %response.metadata.new_generation,
                "sync exchange"
            );
            stream::encode(&response.metadata, &response.entries).map_err(|err| {
                warn!(error = %err, "failed to encode sync response");
                StatusCode::INTERNAL_SERVER_ERROR
            })
        }
        Err((metadata, err)) => {
            warn!(user, %source, error = %err, "sync exchange rejected");
            let mut writer = StreamWriter::new();
            writer.write_line(&metadata).map_err(|err| {
                warn!(error = %err, "failed to encode sync response");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
            Ok(writer.finish_with_error(&err.payload()))
        }
    }
}
