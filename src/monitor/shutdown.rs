use super::types::ComponentState;
use super::Monitor;
use crate::error::{KanyoError, Result};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl Monitor {
    /// Cancels the processing loop, force-stops any in-flight visit recording,
    /// and disconnects capture. Returns a process exit code (0 on a fully
    /// clean shutdown, 1 if any component failed to stop within its timeout).
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("beginning graceful shutdown");
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        if let Err(e) = self.stop_component("recorder").await {
            error!(error = %e, "error stopping recorder");
            exit_code = 1;
        }

        if let Err(e) = self.stop_component("capture").await {
            error!(error = %e, "error stopping capture");
            exit_code = 1;
        }

        info!(exit_code, "graceful shutdown complete");
        Ok(exit_code)
    }

    async fn stop_component(&mut self, component: &str) -> Result<()> {
        self.set_component_state(component, ComponentState::Stopping).await;

        let result = match component {
            "recorder" => {
                timeout(Duration::from_secs(10), async {
                    self.recorder.lock().await.force_stop().await;
                    Ok(())
                })
                .await
            }
            "capture" => {
                timeout(Duration::from_secs(5), async {
                    self.capture.lock().await.disconnect().await;
                    Ok(())
                })
                .await
            }
            _ => Ok(Ok(())),
        };

        match result {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped).await;
                info!(component, "component stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed).await;
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed).await;
                let err = KanyoError::system(format!("{component} stop timed out"));
                error!(component, "component stop timed out");
                Err(err)
            }
        }
    }
}
