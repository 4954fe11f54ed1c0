use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    state::{SharedState, invite::InviteStatus, room::RoomStatus},
};

use super::room_service;

/// Periodically finish the second phase of invite accepts that did not
/// complete inline.
///
/// The roster add is idempotent, so sweeping an invite that was completed
/// in the meantime is harmless. Corrections are logged, never alerted.
pub async fn run(state: SharedState) {
    let interval = state.config().reconcile_interval;
    loop {
        sleep(interval).await;
        if state.is_degraded().await {
            continue;
        }
        match reconcile_once(&state).await {
            Ok(corrected) if corrected > 0 => {
                info!(corrected, "reconciled accepted invites into rosters");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "invite reconciliation sweep failed"),
        }
    }
}

/// Sweep accepted invites once, returning how many roster adds were made.
pub async fn reconcile_once(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let mut corrected = 0;

    for invite in store.invites_with_status(InviteStatus::Accepted).await? {
        let Some(room) = store.get_room(invite.room_id).await? else {
            debug!(invite_id = %invite.id, "accepted invite points at a vanished room");
            continue;
        };
        if room.players.contains_key(&invite.invited) {
            continue;
        }
        if room.status != RoomStatus::Lobby {
            // The room moved on without the player; nothing left to repair.
            debug!(
                invite_id = %invite.id,
                room_id = %room.id,
                status = ?room.status,
                "abandoning roster repair for a non-lobby room"
            );
            continue;
        }
        if room.players.len() >= state.config().room_capacity {
            // A full lobby can never admit the player; retrying forever
            // would only spam warnings.
            debug!(
                invite_id = %invite.id,
                room_id = %room.id,
                "abandoning roster repair for a full lobby"
            );
            continue;
        }
        match room_service::join_room(
            state,
            invite.room_id,
            invite.invited,
            invite.invited_name.clone(),
        )
        .await
        {
            Ok(_) => {
                info!(
                    invite_id = %invite.id,
                    room_id = %invite.room_id,
                    user = %invite.invited,
                    "completed pending roster add for accepted invite"
                );
                corrected += 1;
            }
            Err(err) => {
                warn!(
                    invite_id = %invite.id,
                    room_id = %invite.room_id,
                    error = %err,
                    "roster repair attempt failed; will retry next sweep"
                );
            }
        }
    }
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::memory::MemoryRoomStore,
        services::room_service,
        state::{
            AppState, now_millis,
            invite::{GameInvite, InviteSnapshot},
        },
    };

    fn snapshot() -> InviteSnapshot {
        InviteSnapshot {
            host_name: "Ada".into(),
            invited_name: "Grace".into(),
            host_photo: None,
            invited_photo: None,
        }
    }

    #[tokio::test]
    async fn sweep_completes_a_half_finished_accept() {
        let state = AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemoryRoomStore::new())).await;
        let store = state.require_store().await.unwrap();

        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let room = room_service::create_room(&state, host, "Ada".into(), "quiz".into(), 2)
            .await
            .unwrap();

        // An invite accepted on another instance that crashed before the
        // roster add.
        let mut invite =
            GameInvite::new(room.id, host, guest, snapshot(), now_millis(), 60_000);
        invite.status = InviteStatus::Accepted;
        store
            .create_invite(invite, Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(reconcile_once(&state).await.unwrap(), 1);
        let room = room_service::get_room(&state, room.id).await.unwrap();
        assert!(room.players.contains_key(&guest));

        // A second sweep finds nothing to do.
        assert_eq!(reconcile_once(&state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_abandons_a_full_lobby() {
        let config = AppConfig {
            room_capacity: 2,
            ..AppConfig::default()
        };
        let state = AppState::new(config);
        state.install_store(Arc::new(MemoryRoomStore::new())).await;
        let store = state.require_store().await.unwrap();

        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let straggler = Uuid::new_v4();
        let room = room_service::create_room(&state, host, "Ada".into(), "quiz".into(), 2)
            .await
            .unwrap();
        room_service::join_room(&state, room.id, guest, "Grace".into())
            .await
            .unwrap();

        let mut invite =
            GameInvite::new(room.id, host, straggler, snapshot(), now_millis(), 60_000);
        invite.status = InviteStatus::Accepted;
        store
            .create_invite(invite, Duration::from_secs(120))
            .await
            .unwrap();

        // The lobby is at capacity: nothing to correct, nothing to warn.
        assert_eq!(reconcile_once(&state).await.unwrap(), 0);
        let room = room_service::get_room(&state, room.id).await.unwrap();
        assert_eq!(room.players.len(), 2);
    }

    #[tokio::test]
    async fn sweep_abandons_rooms_that_moved_on() {
        let state = AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemoryRoomStore::new())).await;
        let store = state.require_store().await.unwrap();

        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let straggler = Uuid::new_v4();
        let room = room_service::create_room(&state, host, "Ada".into(), "quiz".into(), 2)
            .await
            .unwrap();
        room_service::join_room(&state, room.id, guest, "Grace".into())
            .await
            .unwrap();
        room_service::start_room(&state, room.id, host).await.unwrap();

        let mut invite =
            GameInvite::new(room.id, host, straggler, snapshot(), now_millis(), 60_000);
        invite.status = InviteStatus::Accepted;
        store
            .create_invite(invite, Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(reconcile_once(&state).await.unwrap(), 0);
        let room = room_service::get_room(&state, room.id).await.unwrap();
        assert!(!room.players.contains_key(&straggler));
    }
}
