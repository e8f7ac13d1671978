//! HTTP/1 accept loop shared by the sync server and the test harness.

use {
    hyper::{
        Request, Response,
        body::{Body, Incoming},
        server::conn::http1,
        service::service_fn,
    },
    hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown},
    std::{
        convert::Infallible,
        error::Error,
        future::Future,
        io::{self, ErrorKind},
        pin::pin,
        time::Duration,
    },
    tokio::{net::TcpListener, time::timeout},
    tracing::{debug, info, warn},
};

/// Time given to open connections to finish their requests after shutdown was requested.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts connections on `listener` and serves each of them with `handler`
/// until `shutdown` resolves.
#[inline]
pub async fn serve<H, Fut, B>(listener: TcpListener, handler: H, shutdown: impl Future<Output = ()>)
where
    H: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<Response<B>, Infallible>> + Send + 'static,
    B: Body + Send + 'static,
    <B as Body>::Data: Send,
    <B as Body>::Error: Error + Send + Sync,
{
    let graceful = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    continue;
                }
            },
            () = &mut shutdown => break,
        };
        debug!(%peer, "accepted connection");
        let connection = http1::Builder::new()
            .keep_alive(true)
            .serve_connection(TokioIo::new(stream), service_fn(handler.clone()));
        let connection = graceful.watch(connection);
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log_connection_error(&err);
            }
        });
    }

    info!("shutting down, waiting for open connections");
    if timeout(GRACEFUL_SHUTDOWN_TIMEOUT, graceful.shutdown())
        .await
        .is_err()
    {
        warn!("open connections did not finish in time");
    }
}

fn log_connection_error(err: &hyper::Error) {
    if let Some(io_err) = err.source().and_then(|err| err.downcast_ref::<io::Error>()) {
        match io_err.kind() {
            ErrorKind::NotConnected | ErrorKind::ConnectionReset => {
                debug!(error = ?io_err, "canceled request");
            }
            _ => warn!(error = ?io_err, "error while serving"),
        }
    } else if err.is_incomplete_message() {
        debug!(error = ?err, "interrupted request");
    } else {
        warn!(error = ?err, "failed to serve sync request");
    }
}
