use std::time::Duration;

use tracing::debug;

use rosy_api::AppState;

/// Background task that drops expired login codes, idle per-key locks and
/// idle flow sessions.
pub async fn run_cleanup_loop(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let purged = state.codes.sweep();
        let locks = state.flow.ledger().prune_locks();
        let sessions = state.flow.prune_idle_sessions().await;
        if purged > 0 || locks > 0 || sessions > 0 {
            debug!(
                "Cleanup: {} expired codes, {} idle ledger locks, {} idle sessions",
                purged, locks, sessions
            );
        }
    }
}
