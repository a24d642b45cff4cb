use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the session store and keep the shared state in degraded mode
/// whenever it is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_session_store(store.clone()).await;
                info!("session store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                watch_health(&state, store).await;
                state.clear_session_store().await;

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "session store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll `store` until it fails and cannot be revived in place.
async fn watch_health(state: &SharedState, store: Arc<dyn SessionStore>) {
    loop {
        if store.health_check().await.is_ok() {
            if state.is_degraded().await {
                info!("session store healthy again; leaving degraded mode");
                state.install_session_store(store.clone()).await;
            }
            sleep(HEALTH_POLL_INTERVAL).await;
            continue;
        }

        let mut reconnect_delay = INITIAL_DELAY;
        let mut reconnected = false;
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            match store.try_reconnect().await {
                Ok(()) => {
                    info!(attempt, "session store reconnected after failed health check");
                    reconnected = true;
                    break;
                }
                Err(err) => {
                    if attempt == 0 {
                        warn!(
                            attempt, error = %err,
                            "session store reconnect failed; entering degraded mode"
                        );
                        state.clear_session_store().await;
                    } else {
                        warn!(attempt, error = %err, "session store reconnect attempt failed");
                    }
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                }
            }
        }

        if !reconnected {
            warn!("exhausted session store reconnect attempts; staying in degraded mode");
            return;
        }
        state.install_session_store(store.clone()).await;
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::session_store::MemorySessionStore, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn installs_store_once_connected() {
        let state = AppState::new(AppConfig::default());
        let mut degraded = state.degraded_watcher();
        assert!(*degraded.borrow());

        let mut attempts = 0;
        let supervisor = tokio::spawn(run(state.clone(), move || {
            attempts += 1;
            let ready = attempts > 1;
            async move {
                if ready {
                    Ok(Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>)
                } else {
                    Err(StorageError::unavailable(
                        "not yet".into(),
                        std::io::Error::other("refused"),
                    ))
                }
            }
        }));

        degraded.wait_for(|value| !*value).await.unwrap();
        assert!(!state.is_degraded().await);
        supervisor.abort();
    }
}
