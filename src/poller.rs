//! Background session-status polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::normalize;
use crate::provider::ChatProvider;
use crate::store::SyncState;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Handle owning the poll task; dropping or stopping it cancels the timer
/// so no tick fires after teardown.
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the poll loop. Each tick is independent: a failed poll logs and
/// waits for the next one. Results arriving after the liveness flag is
/// cleared are discarded.
pub(crate) fn spawn<P: ChatProvider + 'static>(
    provider: Arc<P>,
    state: Arc<Mutex<SyncState>>,
    alive: Arc<AtomicBool>,
    period: Duration,
) -> PollerHandle {
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match provider.session_status().await {
                Ok(raw) => {
                    if !alive.load(Ordering::SeqCst) {
                        return;
                    }
                    let status = normalize::normalize_session(&raw);
                    debug!("session_poll: status is {}", status.status);
                    state.lock().await.session_status = Some(status);
                }
                Err(e) => warn!("session_poll: poll failed: {}", e),
            }
        }
    });
    PollerHandle { task }
}
