use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::state::store::ChatStateStore;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Owns the background timer that drives the store's agent maintenance
/// (completed-agent removal, staleness sweep). The task is torn down on
/// drop so switching conversations cannot leak timers.
pub struct MaintenanceTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    pub fn spawn(store: Arc<Mutex<ChatStateStore>>) -> Self {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        // Read the tokio clock so the paused test clock
                        // is honored.
                        let now = tokio::time::Instant::now().into_std();
                        if let Ok(mut store) = store.lock() {
                            store.tick(now);
                        }
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}
