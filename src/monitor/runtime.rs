use super::types::ShutdownReason;
use super::Monitor;
use crate::error::{KanyoError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::info;

impl Monitor {
    /// Runs the capture/process loop until a shutdown signal arrives (or the
    /// optional max-runtime budget expires), then performs graceful shutdown.
    pub async fn run(&mut self) -> Result<i32> {
        info!("monitor is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| KanyoError::system("shutdown sender already taken"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| KanyoError::system("shutdown receiver already taken"))?;

        self.setup_signal_handlers(shutdown_sender).await;

        tokio::select! {
            reason = shutdown_receiver => {
                info!(?reason, "shutdown initiated");
            }
            result = self.process_loop() => {
                if let Err(e) = result {
                    info!(error = %e, "processing loop exited with an error");
                }
            }
        }

        let exit_code = self.shutdown().await?;
        info!("monitor shutdown complete");
        Ok(exit_code)
    }

    async fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                if let Some(()) = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler")
                    .recv()
                    .await
                {
                    info!("received SIGTERM");
                    if let Some(sender) = sender.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        let sender = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("received SIGINT (Ctrl+C)");
                if let Some(sender) = sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });

        if let Some(max_runtime) = self.config.runtime.max_runtime_seconds {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(max_runtime)).await;
                info!(max_runtime, "max runtime reached");
                if let Some(sender) = sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::MaxRuntimeReached);
                }
            });
        }
    }
}
