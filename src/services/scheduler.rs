use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    state::{
        SharedState, now_millis,
        timer::{RoomTimer, TimerKind},
    },
};

use super::room_service;

/// Drive the timer scan until the process shuts down.
///
/// Every instance runs this loop against the shared store; duplicate and
/// late fires across instances are harmless because the handlers validate
/// the entry against current room state before acting. The first scan is
/// delayed by a random jitter so instances started together do not scan in
/// lockstep.
pub async fn run(state: SharedState) {
    let poll = state.config().timer_poll_interval;
    let jitter_ms = rand::rng().random_range(0..poll.as_millis().max(1) as u64);
    sleep(Duration::from_millis(jitter_ms)).await;

    loop {
        sleep(poll).await;
        if state.is_degraded().await {
            continue;
        }
        match poll_once(&state).await {
            Ok(fired) if fired > 0 => debug!(fired, "timer scan fired triggers"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "timer scan failed"),
        }
    }
}

/// Scan for due entries once, returning how many triggers actually fired.
pub async fn poll_once(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let due = store.due_timers(now_millis()).await?;
    let mut fired = 0;
    for entry in due {
        if handle_due(state, entry).await? {
            fired += 1;
        }
    }
    Ok(fired)
}

/// Act on one due entry.
///
/// The business transition itself re-validates round index and status under
/// optimistic versioning, so a stale or duplicate pop degrades to a no-op.
/// A lost version race leaves the entry in place; the next scan re-reads it
/// and then discards it as stale.
async fn handle_due(state: &SharedState, entry: RoomTimer) -> Result<bool, ServiceError> {
    let store = state.require_store().await?;
    match entry.kind {
        TimerKind::RoundEnd { round_index } => {
            match room_service::end_round(state, entry.room_id, round_index).await {
                Ok(true) => Ok(true),
                Ok(false) => {
                    debug!(
                        room_id = %entry.room_id,
                        round = round_index,
                        "discarding stale round-end entry"
                    );
                    store.remove_timer_if(entry).await?;
                    Ok(false)
                }
                Err(ServiceError::ConcurrentModification) => {
                    debug!(
                        room_id = %entry.room_id,
                        round = round_index,
                        "round-end lost a version race; retrying next scan"
                    );
                    Ok(false)
                }
                Err(err) => Err(err),
            }
        }
        TimerKind::DisconnectGrace => {
            match room_service::cancel_abandoned(state, entry.room_id).await {
                Ok(fired) => {
                    if !fired {
                        debug!(room_id = %entry.room_id, "discarding stale grace entry");
                    }
                    store.remove_timer_if(entry).await?;
                    Ok(fired)
                }
                Err(ServiceError::ConcurrentModification) => Ok(false),
                Err(err) => Err(err),
            }
        }
    }
}
