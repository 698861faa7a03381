use std::sync::Arc;
use std::time::Duration;

use deespec_state::LockFamily;
use deespec_state::StateStore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

/// Background task keeping one held lease alive: every TTL/3 it refreshes
/// `heartbeat_at` and pushes `expires_at` forward, so a turn that outlives
/// the original TTL (a long agent call) is not reclaimed from under its
/// owner. Cancelled on release.
pub struct LeaseHeartbeat {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl LeaseHeartbeat {
    pub fn spawn(
        store: Arc<StateStore>,
        family: LockFamily,
        lock_id: String,
        ttl: Duration,
    ) -> Self {
        let interval = ttl / 3;
        let (stop, mut stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = store.update_heartbeat(family, lock_id.as_str()).await {
                            warn!(lock_id = lock_id.as_str(), "heartbeat update failed: {err}");
                            continue;
                        }
                        if let Err(err) = store.extend_lock(family, lock_id.as_str(), interval).await {
                            warn!(lock_id = lock_id.as_str(), "lease extension failed: {err}");
                        }
                    }
                }
            }
        });
        Self { stop, handle }
    }

    /// Stop beating and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
