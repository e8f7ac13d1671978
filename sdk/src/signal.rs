use {
    anyhow::{Context, Result},
    derive_more::Display,
    tokio::signal::ctrl_c,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ShutdownSignal {
    Sigint,
    Sigterm,
}

/// Resolves on the first of SIGINT or SIGTERM. Only SIGINT is awaited on non-unix platforms.
#[inline]
pub async fn shutdown_signal() -> Result<ShutdownSignal> {
    #[cfg(target_family = "unix")]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install sigterm signal handler")?;
        tokio::select! {
            result = ctrl_c() => result
                .map(|()| ShutdownSignal::Sigint)
                .context("failed to install sigint signal handler"),
            _ = sigterm.recv() => Ok(ShutdownSignal::Sigterm),
        }
    }

    #[cfg(not(target_family = "unix"))]
    {
        ctrl_c()
            .await
            .context("failed to install sigint signal handler")?;
        Ok(ShutdownSignal::Sigint)
    }
}
