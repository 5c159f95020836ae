//! Background tasks for the federation service.
//!
//! Includes:
//! - Periodic timeout sweeps of the dialback registries.

use tokio::time::{sleep, Duration};

use crate::service::EngineHandle;

/// Starts the sweep task.
///
/// Runs until the engine stops, asking it for one sweep every `interval`.
pub async fn start_sweep_task(engine: EngineHandle, interval: Duration) {
    if interval.is_zero() {
        tracing::warn!("sweep task disabled (interval=0)");
        return;
    }

    tracing::info!(interval_secs = interval.as_secs(), "starting sweep task");

    loop {
        sleep(interval).await;

        match engine.sweep().await {
            Ok(report) => {
                let closed = report.idle_outbound + report.idle_inbound + report.auth_timeouts;
                if closed > 0 || report.bounced > 0 {
                    tracing::info!(
                        closed,
                        bounced = report.bounced,
                        retired = report.retired,
                        "sweep closed stale connections"
                    );
                }
            }
            Err(e) => {
                tracing::info!("ending sweep task: {}", e);
                return;
            }
        }
    }
}
