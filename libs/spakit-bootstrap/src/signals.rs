use anyhow::Result;
use tokio::signal;

/// Which signal ended [`wait_for_shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    CtrlC,
    Terminate,
}

/// Wait for termination signals (Ctrl+C, SIGTERM)
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let ctrl_c = async {
        signal::ctrl_c().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        })
    };

    #[cfg(unix)]
    let terminate = async {
        let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())
            .inspect_err(|e| tracing::error!(error = %e, "Failed to install SIGTERM handler"))?;
        handler.recv().await;
        Ok::<(), std::io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    let received = tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received Ctrl+C signal");
            ShutdownSignal::CtrlC
        },
        result = terminate => {
            result?;
            tracing::info!("Received SIGTERM signal");
            ShutdownSignal::Terminate
        },
    };

    tracing::info!("Shutdown signal received, initiating graceful shutdown");
    Ok(received)
}
