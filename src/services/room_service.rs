use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    error::ServiceError,
    state::{
        SharedState,
        events::{CancelReason, DomainEvent, ScoreLine},
        now_millis,
        room::{GameRoom, RoomStatus, RoundAdvance, RoundScore},
        timer::RoomTimer,
    },
};

/// How many times a version race is retried before surfacing
/// `ConcurrentModification` to the caller.
const MAX_CAS_RETRIES: usize = 3;

fn is_conflict(err: &StorageError) -> bool {
    matches!(err, StorageError::Conflict(_))
}

/// Create a fresh lobby hosted by `host`.
pub async fn create_room(
    state: &SharedState,
    host: Uuid,
    host_name: String,
    name: String,
    total_rounds: u32,
) -> Result<GameRoom, ServiceError> {
    if total_rounds == 0 {
        return Err(ServiceError::InvalidInput(
            "a game requires at least one round".into(),
        ));
    }
    let store = state.require_store().await?;
    let room = GameRoom::new(host, host_name, name, total_rounds);
    store.save_room(room.clone(), None, None).await?;
    info!(room_id = %room.id, host = %host, "room created");
    Ok(room)
}

/// Fetch a room by id.
pub async fn get_room(state: &SharedState, room_id: Uuid) -> Result<GameRoom, ServiceError> {
    let store = state.require_store().await?;
    store
        .get_room(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}`")))
}

/// Add a user to a lobby roster. Idempotent: joining a room the user is
/// already part of succeeds without a write, which makes the invite-accept
/// second phase and the reconciler safely retryable.
pub async fn join_room(
    state: &SharedState,
    room_id: Uuid,
    user: Uuid,
    display_name: String,
) -> Result<GameRoom, ServiceError> {
    let store = state.require_store().await?;
    let capacity = state.config().room_capacity;

    for _ in 0..MAX_CAS_RETRIES {
        let mut room = get_room(state, room_id).await?;
        if !room.add_player(user, display_name.clone(), capacity)? {
            return Ok(room);
        }
        let expected = room.version - 1;
        match store.save_room(room.clone(), Some(expected), None).await {
            Ok(()) => {
                state.events().publish(DomainEvent::PlayerJoined {
                    room_id,
                    user,
                    display_name: display_name.clone(),
                });
                return Ok(room);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

/// Start the game: host-only, `Lobby → InRound`, schedules the round timer.
pub async fn start_room(
    state: &SharedState,
    room_id: Uuid,
    user: Uuid,
) -> Result<GameRoom, ServiceError> {
    let store = state.require_store().await?;
    let round_ms = state.config().round_duration.as_millis() as u64;

    for _ in 0..MAX_CAS_RETRIES {
        let mut room = get_room(state, room_id).await?;
        if room.host != user {
            return Err(ServiceError::Unauthorized(
                "only the host can start the game".into(),
            ));
        }
        room.start(now_millis(), round_ms)?;
        let deadline_ms = room.round_deadline_ms.unwrap_or_default();
        // Timer entry first: a crash between the two writes must never
        // leave a live round the scan cannot see. If the room write loses,
        // the entry is stale and the next scan discards it.
        store
            .put_timer(RoomTimer::round_end(room_id, deadline_ms, 0))
            .await?;
        let expected = room.version - 1;
        match store.save_room(room.clone(), Some(expected), None).await {
            Ok(()) => {
                state.events().publish(DomainEvent::RoundStarted {
                    room_id,
                    round_index: 0,
                    deadline_ms,
                });
                info!(room_id = %room_id, "game started");
                return Ok(room);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

/// Record one player's answer for the round in progress.
///
/// When every connected player has answered, the round is ended immediately
/// (the early-completion fast path) instead of waiting for the deadline.
pub async fn submit_answer(
    state: &SharedState,
    room_id: Uuid,
    user: Uuid,
    correct: bool,
) -> Result<GameRoom, ServiceError> {
    let store = state.require_store().await?;
    let round_ms = state.config().round_duration.as_millis() as u64;

    for _ in 0..MAX_CAS_RETRIES {
        let mut room = get_room(state, room_id).await?;
        let round_index = room.current_round;
        let all_answered = room.record_answer(user, correct, now_millis(), round_ms)?;
        let expected = room.version - 1;
        match store.save_room(room.clone(), Some(expected), None).await {
            Ok(()) => {
                if all_answered {
                    match end_round(state, room_id, round_index).await {
                        Ok(_) => {}
                        // The deadline timer fired in the same instant and
                        // won; the round is over either way.
                        Err(ServiceError::ConcurrentModification) => {}
                        Err(err) => return Err(err),
                    }
                    return get_room(state, room_id).await;
                }
                return Ok(room);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

/// Score the given round: `InRound → Scoring`.
///
/// Returns `Ok(false)` when the trigger is stale (room gone, already
/// advanced, or a different round in progress) — the caller discards it
/// silently. Both the deadline timer and the early-completion path funnel
/// through here, so duplicate triggers resolve to a single transition.
pub async fn end_round(
    state: &SharedState,
    room_id: Uuid,
    round_index: u32,
) -> Result<bool, ServiceError> {
    let store = state.require_store().await?;
    let rules = state.config().scoring_rules();

    for _ in 0..MAX_CAS_RETRIES {
        let Some(mut room) = store.get_room(room_id).await? else {
            return Ok(false);
        };
        if room.status != RoomStatus::InRound || room.current_round != round_index {
            return Ok(false);
        }
        let deadline_ms = room.round_deadline_ms.unwrap_or_default();
        let scores = room.end_round(round_index, rules)?;
        let expected = room.version - 1;
        match store.save_room(room.clone(), Some(expected), None).await {
            Ok(()) => {
                // Clear the deadline entry, but only the one scheduled for
                // this round; a superseding entry must survive.
                store
                    .remove_timer_if(RoomTimer::round_end(room_id, deadline_ms, round_index))
                    .await?;
                publish_round_scores(state, room_id, round_index, &scores);
                info!(room_id = %room_id, round = round_index, "round scored");
                return Ok(true);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

fn publish_round_scores(
    state: &SharedState,
    room_id: Uuid,
    round_index: u32,
    scores: &[RoundScore],
) {
    state.events().publish(DomainEvent::RoundEnded {
        room_id,
        round_index,
        scores: scores
            .iter()
            .map(|s| ScoreLine {
                user: s.user,
                score: s.total,
            })
            .collect(),
    });
    for score in scores.iter().filter(|s| s.points > 0) {
        state.events().publish(DomainEvent::PlayerScored {
            room_id,
            user: score.user,
            round_index,
            points: score.points,
        });
    }
}

/// Advance out of scoring: host-only, either the next round or the final
/// ranking.
pub async fn advance_room(
    state: &SharedState,
    room_id: Uuid,
    user: Uuid,
) -> Result<GameRoom, ServiceError> {
    let store = state.require_store().await?;
    let round_ms = state.config().round_duration.as_millis() as u64;
    let retention = state.config().finished_room_ttl;

    for _ in 0..MAX_CAS_RETRIES {
        let mut room = get_room(state, room_id).await?;
        if room.host != user {
            return Err(ServiceError::Unauthorized(
                "only the host can advance the game".into(),
            ));
        }
        let advance = room.advance(now_millis(), round_ms)?;
        // Same ordering as `start_room`: the deadline entry lands before
        // the room write so a crash in between cannot strand the round.
        if let RoundAdvance::NextRound {
            round_index,
            deadline_ms,
        } = advance
        {
            store
                .put_timer(RoomTimer::round_end(room_id, deadline_ms, round_index))
                .await?;
        }
        let expected = room.version - 1;
        let ttl = match advance {
            RoundAdvance::Finished => Some(retention),
            RoundAdvance::NextRound { .. } => None,
        };
        match store.save_room(room.clone(), Some(expected), ttl).await {
            Ok(()) => {
                match advance {
                    RoundAdvance::NextRound {
                        round_index,
                        deadline_ms,
                    } => {
                        state.events().publish(DomainEvent::RoundStarted {
                            room_id,
                            round_index,
                            deadline_ms,
                        });
                    }
                    RoundAdvance::Finished => {
                        store.remove_timer(room_id).await?;
                        state.events().publish(DomainEvent::RoomFinished {
                            room_id,
                            ranking: room
                                .final_ranking()
                                .iter()
                                .map(|r| ScoreLine {
                                    user: r.user,
                                    score: r.score,
                                })
                                .collect(),
                        });
                        info!(room_id = %room_id, "game finished");
                    }
                }
                return Ok(room);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

/// Flip a player's connection flag, managing the disconnect-grace timer.
///
/// A terminal room swallows the update (late disconnect notices for
/// finished games are not an error).
pub async fn set_connected(
    state: &SharedState,
    room_id: Uuid,
    user: Uuid,
    connected: bool,
) -> Result<GameRoom, ServiceError> {
    let store = state.require_store().await?;
    let grace_ms = state.config().disconnect_grace.as_millis() as u64;

    for _ in 0..MAX_CAS_RETRIES {
        let mut room = get_room(state, room_id).await?;
        if matches!(room.status, RoomStatus::Finished | RoomStatus::Cancelled) {
            return Ok(room);
        }
        if !room.set_connected(user, connected)? {
            return Ok(room);
        }
        let expected = room.version - 1;
        match store.save_room(room.clone(), Some(expected), None).await {
            Ok(()) => {
                sync_grace_timer(state, &room, grace_ms).await?;
                // A disconnect can leave every remaining player answered:
                // the round ends now instead of waiting for the deadline.
                // An all-disconnected room is the grace timer's job.
                if !connected
                    && room.status == RoomStatus::InRound
                    && !room.all_disconnected()
                    && room.all_connected_answered()
                {
                    match end_round(state, room_id, room.current_round).await {
                        Ok(_) => {}
                        Err(ServiceError::ConcurrentModification) => {}
                        Err(err) => return Err(err),
                    }
                    return get_room(state, room_id).await;
                }
                return Ok(room);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

/// Keep the room's timer entry consistent with its connection state.
///
/// An all-disconnected lobby or round gets a grace entry (superseding any
/// round timer); a reconnection restores the round deadline entry or drops
/// the grace entry.
async fn sync_grace_timer(
    state: &SharedState,
    room: &GameRoom,
    grace_ms: u64,
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    if room.all_disconnected()
        && matches!(room.status, RoomStatus::Lobby | RoomStatus::InRound)
    {
        let fire_at = now_millis() + grace_ms;
        store
            .put_timer(RoomTimer::disconnect_grace(room.id, fire_at))
            .await?;
        debug!(room_id = %room.id, "all players disconnected; grace timer scheduled");
        return Ok(());
    }

    let Some(timer) = store.get_timer(room.id).await? else {
        return Ok(());
    };
    if timer.kind != crate::state::timer::TimerKind::DisconnectGrace {
        return Ok(());
    }
    match (room.status, room.round_deadline_ms) {
        (RoomStatus::InRound, Some(deadline_ms)) => {
            // A reconnection rescues the round: restore its deadline entry.
            store
                .put_timer(RoomTimer::round_end(room.id, deadline_ms, room.current_round))
                .await?;
        }
        _ => {
            store.remove_timer_if(timer).await?;
        }
    }
    Ok(())
}

/// Host-initiated cancellation: `Lobby | InRound → Cancelled`.
pub async fn cancel_room(
    state: &SharedState,
    room_id: Uuid,
    user: Uuid,
) -> Result<GameRoom, ServiceError> {
    let store = state.require_store().await?;
    let retention = state.config().finished_room_ttl;

    for _ in 0..MAX_CAS_RETRIES {
        let mut room = get_room(state, room_id).await?;
        if room.host != user {
            return Err(ServiceError::Unauthorized(
                "only the host can cancel the room".into(),
            ));
        }
        room.cancel()?;
        let expected = room.version - 1;
        match store
            .save_room(room.clone(), Some(expected), Some(retention))
            .await
        {
            Ok(()) => {
                store.remove_timer(room_id).await?;
                let withdrawn =
                    super::invite_service::cancel_room_invites(state, room_id).await?;
                if withdrawn > 0 {
                    debug!(room_id = %room_id, withdrawn, "pending invites withdrawn");
                }
                state.events().publish(DomainEvent::RoomCancelled {
                    room_id,
                    reason: CancelReason::HostLeft,
                });
                info!(room_id = %room_id, "room cancelled by host");
                return Ok(room);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

/// Cancel a room whose players all stayed disconnected through the grace
/// window. Returns `Ok(false)` when the trigger is stale (someone came
/// back, or the room moved on).
pub async fn cancel_abandoned(
    state: &SharedState,
    room_id: Uuid,
) -> Result<bool, ServiceError> {
    let store = state.require_store().await?;
    let retention = state.config().finished_room_ttl;

    for _ in 0..MAX_CAS_RETRIES {
        let Some(mut room) = store.get_room(room_id).await? else {
            return Ok(false);
        };
        if !matches!(room.status, RoomStatus::Lobby | RoomStatus::InRound)
            || !room.all_disconnected()
        {
            return Ok(false);
        }
        room.cancel()?;
        let expected = room.version - 1;
        match store
            .save_room(room.clone(), Some(expected), Some(retention))
            .await
        {
            Ok(()) => {
                let withdrawn =
                    super::invite_service::cancel_room_invites(state, room_id).await?;
                if withdrawn > 0 {
                    debug!(room_id = %room_id, withdrawn, "pending invites withdrawn");
                }
                state.events().publish(DomainEvent::RoomCancelled {
                    room_id,
                    reason: CancelReason::AllDisconnected,
                });
                warn!(room_id = %room_id, "room abandoned; cancelled after grace period");
                return Ok(true);
            }
            Err(err) if is_conflict(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::ConcurrentModification)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{config::AppConfig, dao::memory::MemoryRoomStore, state::AppState};

    async fn test_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemoryRoomStore::new())).await;
        state
    }

    async fn started_room(state: &SharedState, total_rounds: u32) -> (Uuid, Uuid, Uuid) {
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let room = create_room(state, host, "Ada".into(), "quiz".into(), total_rounds)
            .await
            .unwrap();
        join_room(state, room.id, guest, "Grace".into())
            .await
            .unwrap();
        start_room(state, room.id, host).await.unwrap();
        (room.id, host, guest)
    }

    #[tokio::test]
    async fn everyone_answering_ends_the_round_early() {
        let state = test_state().await;
        let (room_id, host, guest) = started_room(&state, 2).await;
        let store = state.require_store().await.unwrap();

        submit_answer(&state, room_id, host, true).await.unwrap();
        let room = submit_answer(&state, room_id, guest, false).await.unwrap();

        // No waiting for the deadline, and the timer entry is gone.
        assert_eq!(room.status, RoomStatus::Scoring);
        assert!(store.get_timer(room_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_one_advance_reaches_finished() {
        let state = test_state().await;
        let (room_id, host, guest) = started_room(&state, 1).await;

        submit_answer(&state, room_id, host, true).await.unwrap();
        submit_answer(&state, room_id, guest, true).await.unwrap();

        let room = advance_room(&state, room_id, host).await.unwrap();
        assert_eq!(room.status, RoomStatus::Finished);

        // A second advance observes the terminal state and is rejected.
        let err = advance_room(&state, room_id, host).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn finished_ranking_orders_by_score() {
        let state = test_state().await;
        let (room_id, host, guest) = started_room(&state, 1).await;

        submit_answer(&state, room_id, host, false).await.unwrap();
        submit_answer(&state, room_id, guest, true).await.unwrap();
        let room = advance_room(&state, room_id, host).await.unwrap();

        let ranking = room.final_ranking();
        assert_eq!(ranking[0].user, guest);
        assert!(ranking[0].score > ranking[1].score);
    }

    #[tokio::test]
    async fn disconnect_of_the_last_unanswered_player_ends_the_round() {
        let state = test_state().await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let third = Uuid::new_v4();
        let room = create_room(&state, host, "Ada".into(), "quiz".into(), 2)
            .await
            .unwrap();
        join_room(&state, room.id, guest, "Grace".into())
            .await
            .unwrap();
        join_room(&state, room.id, third, "Alan".into())
            .await
            .unwrap();
        start_room(&state, room.id, host).await.unwrap();

        submit_answer(&state, room.id, host, true).await.unwrap();
        let in_round = submit_answer(&state, room.id, guest, true).await.unwrap();
        assert_eq!(in_round.status, RoomStatus::InRound);

        let room = set_connected(&state, room.id, third, false).await.unwrap();
        assert_eq!(room.status, RoomStatus::Scoring);
    }

    #[tokio::test]
    async fn non_host_cannot_start_advance_or_cancel() {
        let state = test_state().await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let room = create_room(&state, host, "Ada".into(), "quiz".into(), 2)
            .await
            .unwrap();
        join_room(&state, room.id, guest, "Grace".into())
            .await
            .unwrap();

        let err = start_room(&state, room.id, guest).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        let err = cancel_room(&state, room.id, guest).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        start_room(&state, room.id, host).await.unwrap();
        let err = advance_room(&state, room.id, guest).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }
}
