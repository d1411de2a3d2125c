//! Background scheduler (§4.G/§5): a sync tick every 5 minutes, a checkin
//! tick once a day at 00:05 UTC, and a registry rebuild after every sync
//! tick so request-time reads pick up the new pricing/credentials/balances.
//! Grounded on `original_source/service/cron.go`
//! (`StartCronJobs`/`durationUntilNextCheckin`), generalized from a global
//! `select` over two Go tickers to a `tokio::select!` loop. The Go original
//! anchors the daily slot to the process's local timezone; reading the
//! system timezone from a multithreaded Rust process is unsound (the `time`
//! crate gates it behind `local-offset`), so this anchors to UTC instead.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{info, warn};

use llmgate_storage::Storage;

use crate::checkin::checkin_provider;
use crate::state::AppState;
use crate::sync::sync_provider;

const SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DAILY_CHECKIN_HOUR: u8 = 0;
const DAILY_CHECKIN_MINUTE: u8 = 5;

/// Runs forever; intended to be spawned once per process as its own task.
pub async fn run(state: Arc<AppState>) {
    // Catch up one checkin run on startup, matching the Go original's
    // `go CheckinAllProviders()` before entering the select loop.
    checkin_all_providers(&state).await;

    let mut sync_tick = interval(SYNC_INTERVAL);
    sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; consume it so the first real sync
    // happens after one full interval, matching `time.NewTicker` semantics.
    sync_tick.tick().await;

    loop {
        let checkin_at = next_checkin_deadline();
        tokio::select! {
            _ = sync_tick.tick() => {
                sync_all_providers(&state).await;
            }
            _ = sleep_until(checkin_at) => {
                checkin_all_providers(&state).await;
            }
        }
    }
}

async fn sleep_until(deadline: Instant) {
    sleep(deadline.saturating_duration_since(Instant::now())).await;
}

async fn sync_all_providers(state: &AppState) {
    let providers = match state.storage.providers_enabled().await {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to load enabled providers for sync");
            return;
        }
    };
    for provider in &providers {
        sync_provider(state.storage.as_ref(), provider, state.global.load().proxy.as_deref()).await;
    }

    if let Err(err) = rebuild_registry(state).await {
        warn!(error = %err, "registry rebuild failed after sync tick");
    }
}

async fn checkin_all_providers(state: &AppState) {
    let providers = match state.storage.providers_checkin_enabled().await {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to load checkin-enabled providers");
            return;
        }
    };
    for provider in &providers {
        checkin_provider(state.storage.as_ref(), provider, state.global.load().proxy.as_deref()).await;
    }
    info!(count = providers.len(), "daily checkin pass complete");
}

/// Also called directly after an admin route-override write (§6) so the
/// change is live without waiting for the next sync tick.
pub async fn rebuild_registry(state: &AppState) -> anyhow::Result<()> {
    let snapshot = state.storage.load_snapshot().await?;
    let options = state.routing_options.get();
    let recent_usage = state.storage.recent_cost(options.cost_window_hours).await?;
    let health = state.storage.health_stats(options.health_window_hours).await?;
    let index = llmgate_routing::registry::build(&snapshot, recent_usage, health);
    state.refresh_registry(index);
    Ok(())
}

/// UTC duration until the next 00:05, matching `durationUntilNextCheckin`'s
/// shape — if we're already past today's slot, the next one is tomorrow.
fn next_checkin_deadline() -> Instant {
    let now = OffsetDateTime::now_utc();
    let today_slot = now
        .replace_hour(DAILY_CHECKIN_HOUR)
        .and_then(|t| t.replace_minute(DAILY_CHECKIN_MINUTE))
        .and_then(|t| t.replace_second(0))
        .and_then(|t| t.replace_nanosecond(0))
        .unwrap_or(now);

    let target = if today_slot > now {
        today_slot
    } else {
        today_slot + time::Duration::days(1)
    };

    let wait = (target - now).max(time::Duration::ZERO);
    Instant::now() + Duration::from_secs_f64(wait.as_seconds_f64().max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_checkin_deadline_is_never_in_the_past() {
        let deadline = next_checkin_deadline();
        assert!(deadline >= Instant::now());
    }
}
