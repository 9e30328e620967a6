//! Supervision of the two listeners.
//!
//! The decision endpoint and the operational server run as independent
//! tasks. A listener that stops on its own never takes the other one down.
//! When the decision endpoint stops outside a shutdown, readiness and
//! liveness are both cleared so the kubelet restarts the pod.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::health::HealthState;

/// How the listeners ended up when supervision returned
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Supervision {
    /// The webhook task has finished
    pub webhook_done: bool,
    /// The health task has finished
    pub health_done: bool,
    /// The webhook task finished before any shutdown was requested
    pub webhook_failed: bool,
}

/// Watch both listener tasks until `shutdown` resolves.
///
/// Returns early only when both tasks have finished.
pub async fn supervise(
    health_state: &HealthState,
    webhook: &mut JoinHandle<()>,
    health: &mut JoinHandle<()>,
    shutdown: impl Future<Output = ()>,
) -> Supervision {
    tokio::pin!(shutdown);
    let mut state = Supervision::default();

    while !(state.webhook_done && state.health_done) {
        tokio::select! {
            result = &mut *health, if !state.health_done => {
                state.health_done = true;
                if let Err(e) = result {
                    error!("Health server task panicked: {}", e);
                }
            }
            result = &mut *webhook, if !state.webhook_done => {
                state.webhook_done = true;
                state.webhook_failed = true;
                if let Err(e) = result {
                    error!("Webhook server task panicked: {}", e);
                }
                error!("Webhook server stopped unexpectedly, failing liveness");
                health_state.set_ready(false).await;
                health_state.set_live(false).await;
            }
            _ = &mut shutdown => {
                info!("Got shutdown signal, shutting down webhook server gracefully...");
                break;
            }
        }
    }

    state
}
