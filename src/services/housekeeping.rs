use std::time::SystemTime;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::state::SharedState;

/// Periodically drop expired sessions and hub channels nobody listens to.
pub async fn run(state: SharedState) {
    let mut ticker = interval(state.config().purge_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        sweep(&state).await;
    }
}

/// One purge pass; returns how many sessions were removed.
pub async fn sweep(state: &SharedState) -> u64 {
    let pruned = state.hub().prune();
    if pruned > 0 {
        debug!(pruned, "dropped idle session channels");
    }

    let Some(store) = state.session_store().await else {
        debug!("skipping expired session purge while degraded");
        return 0;
    };

    match store.purge_expired(SystemTime::now()).await {
        Ok(0) => 0,
        Ok(purged) => {
            info!(purged, "purged expired sessions");
            purged
        }
        Err(err) => {
            warn!(error = %err, "failed to purge expired sessions");
            0
        }
    }
}
