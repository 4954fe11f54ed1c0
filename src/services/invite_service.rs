use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    error::ServiceError,
    state::{
        SharedState,
        events::DomainEvent,
        invite::{GameInvite, InviteSnapshot, InviteStatus},
        now_millis,
        room::RoomStatus,
    },
};

use super::room_service;

/// Extra physical lifetime past the logical expiry, so readers can still
/// observe the `Expired` status before the store deletes the record.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Create a pending invite from `host` to `invited` for `room_id`.
///
/// The display snapshot is captured here and never refreshed. Fails with
/// `AlreadyInvited` when an effectively-pending invite already exists for
/// the same room and user; an expired pending invite does not block.
pub async fn create_invite(
    state: &SharedState,
    room_id: Uuid,
    host: Uuid,
    invited: Uuid,
    snapshot: InviteSnapshot,
) -> Result<GameInvite, ServiceError> {
    let store = state.require_store().await?;
    let now_ms = now_millis();

    let room = room_service::get_room(state, room_id).await?;
    if room.host != host {
        return Err(ServiceError::Unauthorized(
            "only the host can send invites".into(),
        ));
    }
    if room.players.contains_key(&invited) {
        return Err(ServiceError::InvalidTransition(
            "user is already in the room".into(),
        ));
    }
    if room.status != RoomStatus::Lobby {
        return Err(ServiceError::InvalidTransition(
            "room can no longer be joined".into(),
        ));
    }
    if room.players.len() >= state.config().room_capacity {
        return Err(ServiceError::CapacityExceeded);
    }

    let existing = store.invites_for_room(room_id).await?;
    if existing.iter().any(|invite| {
        invite.invited == invited && invite.effective_status(now_ms) == InviteStatus::Pending
    }) {
        return Err(ServiceError::AlreadyInvited);
    }

    let ttl = state.config().invite_ttl;
    let invite = GameInvite::new(room_id, host, invited, snapshot, now_ms, ttl.as_millis() as u64);
    store.create_invite(invite.clone(), ttl + EXPIRY_SLACK).await?;

    state.events().publish(DomainEvent::InviteReceived {
        invite_id: invite.id,
        room_id,
        host,
        invited,
        host_name: invite.host_name.clone(),
    });
    info!(invite_id = %invite.id, room_id = %room_id, invited = %invited, "invite created");
    Ok(invite)
}

/// Accept or decline a pending invite. Only the invited user may respond.
///
/// Accepting is two-phase: the invite flips `Pending → Accepted` with a
/// status-guarded write, then the user is added to the roster through the
/// idempotent join. A transient failure of the second phase is left for the
/// reconciler to finish and is not surfaced to the caller.
pub async fn respond_to_invite(
    state: &SharedState,
    invite_id: Uuid,
    user: Uuid,
    accept: bool,
) -> Result<GameInvite, ServiceError> {
    let store = state.require_store().await?;
    let now_ms = now_millis();

    let invite = store
        .get_invite(invite_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("invite `{invite_id}`")))?;
    if invite.invited != user {
        return Err(ServiceError::Unauthorized(
            "only the invited user can respond".into(),
        ));
    }
    match invite.effective_status(now_ms) {
        InviteStatus::Pending => {}
        InviteStatus::Expired => return Err(ServiceError::InviteExpired),
        _ => return Err(ServiceError::InviteAlreadyResolved),
    }

    if !accept {
        let mut declined = invite;
        declined.status = InviteStatus::Declined;
        resolve_pending(&*store, declined.clone()).await?;
        info!(invite_id = %invite_id, "invite declined");
        return Ok(declined);
    }

    // Pre-check so an unjoinable room is reported before the invite is
    // consumed.
    let room = room_service::get_room(state, invite.room_id).await?;
    if room.status != RoomStatus::Lobby {
        return Err(ServiceError::InvalidTransition(
            "room can no longer be joined".into(),
        ));
    }
    if !room.players.contains_key(&user)
        && room.players.len() >= state.config().room_capacity
    {
        return Err(ServiceError::CapacityExceeded);
    }

    let mut accepted = invite;
    accepted.status = InviteStatus::Accepted;
    resolve_pending(&*store, accepted.clone()).await?;

    match room_service::join_room(
        state,
        accepted.room_id,
        user,
        accepted.invited_name.clone(),
    )
    .await
    {
        Ok(_) => {
            info!(invite_id = %invite_id, room_id = %accepted.room_id, "invite accepted");
            Ok(accepted)
        }
        Err(
            err @ (ServiceError::ConcurrentModification
            | ServiceError::Unavailable(_)
            | ServiceError::Degraded),
        ) => {
            // The invite is committed; the roster add is idempotent and the
            // reconciler will retry it.
            warn!(
                invite_id = %invite_id,
                room_id = %accepted.room_id,
                error = %err,
                "invite accepted but roster add is pending reconciliation"
            );
            Ok(accepted)
        }
        Err(err) => {
            // The room rejected the join for good (filled up or moved on
            // between the pre-check and the write); release the invite so
            // the reconciler does not retry a join that cannot succeed.
            warn!(
                invite_id = %invite_id,
                room_id = %accepted.room_id,
                error = %err,
                "invite accepted but the room rejected the join"
            );
            release_unjoinable(&*store, &accepted).await;
            Err(err)
        }
    }
}

/// Flip an `Accepted` invite whose join can no longer succeed to
/// `Cancelled`. Failure here is logged and left to the invite's physical
/// TTL; the status guard keeps a concurrent repair safe.
async fn release_unjoinable(store: &dyn RoomStore, invite: &GameInvite) {
    let mut cancelled = invite.clone();
    cancelled.status = InviteStatus::Cancelled;
    if let Err(err) = store
        .update_invite(cancelled, InviteStatus::Accepted)
        .await
    {
        warn!(
            invite_id = %invite.id,
            error = %err,
            "failed to release an unjoinable invite"
        );
    }
}

/// Host-initiated withdrawal of a single invite. Resolving an invite that
/// already left `Pending` is a no-op, not an error.
pub async fn cancel_invite(
    state: &SharedState,
    invite_id: Uuid,
    user: Uuid,
) -> Result<GameInvite, ServiceError> {
    let store = state.require_store().await?;
    let now_ms = now_millis();

    let invite = store
        .get_invite(invite_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("invite `{invite_id}`")))?;
    if invite.host != user {
        return Err(ServiceError::Unauthorized(
            "only the host can cancel an invite".into(),
        ));
    }
    if invite.effective_status(now_ms) != InviteStatus::Pending {
        return Ok(invite);
    }

    let mut cancelled = invite.clone();
    cancelled.status = InviteStatus::Cancelled;
    match store
        .update_invite(cancelled.clone(), InviteStatus::Pending)
        .await
    {
        Ok(()) => {
            info!(invite_id = %invite_id, "invite cancelled");
            Ok(cancelled)
        }
        // Someone resolved it first; that resolution stands.
        Err(StorageError::Conflict(_)) => Ok(invite),
        Err(err) => Err(err.into()),
    }
}

/// Withdraw every pending invite of a room, returning how many flipped.
pub async fn cancel_room_invites(
    state: &SharedState,
    room_id: Uuid,
) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let mut withdrawn = 0;

    for invite in store.invites_for_room(room_id).await? {
        if invite.status != InviteStatus::Pending {
            continue;
        }
        let mut cancelled = invite;
        cancelled.status = InviteStatus::Cancelled;
        match store.update_invite(cancelled, InviteStatus::Pending).await {
            Ok(()) => withdrawn += 1,
            Err(StorageError::Conflict(_)) => {
                debug!(room_id = %room_id, "invite resolved while being withdrawn");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(withdrawn)
}

/// Pending invites addressed to a user, with expiry evaluated lazily: an
/// invite past its deadline is returned as `Expired` even before the store
/// physically deletes it.
pub async fn list_pending_for_user(
    state: &SharedState,
    user: Uuid,
) -> Result<Vec<GameInvite>, ServiceError> {
    let store = state.require_store().await?;
    let now_ms = now_millis();
    let mut invites: Vec<GameInvite> = store
        .invites_for_user(user)
        .await?
        .into_iter()
        .filter(|invite| invite.status == InviteStatus::Pending)
        .map(|invite| materialize_status(invite, now_ms))
        .collect();
    invites.sort_by_key(|invite| invite.created_at_ms);
    Ok(invites)
}

/// All invites of a room, with expiry evaluated lazily.
pub async fn list_room_invites(
    state: &SharedState,
    room_id: Uuid,
) -> Result<Vec<GameInvite>, ServiceError> {
    let store = state.require_store().await?;
    let now_ms = now_millis();
    let mut invites: Vec<GameInvite> = store
        .invites_for_room(room_id)
        .await?
        .into_iter()
        .map(|invite| materialize_status(invite, now_ms))
        .collect();
    invites.sort_by_key(|invite| invite.created_at_ms);
    Ok(invites)
}

fn materialize_status(mut invite: GameInvite, now_ms: u64) -> GameInvite {
    invite.status = invite.effective_status(now_ms);
    invite
}

/// Flip an invite away from `Pending`, mapping a lost race to
/// `InviteAlreadyResolved`.
async fn resolve_pending(
    store: &dyn RoomStore,
    invite: GameInvite,
) -> Result<(), ServiceError> {
    match store.update_invite(invite, InviteStatus::Pending).await {
        Ok(()) => Ok(()),
        Err(StorageError::Conflict(_)) => Err(ServiceError::InviteAlreadyResolved),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::memory::MemoryRoomStore,
        services::room_service,
        state::AppState,
    };

    fn snapshot() -> InviteSnapshot {
        InviteSnapshot {
            host_name: "Ada".into(),
            invited_name: "Grace".into(),
            host_photo: None,
            invited_photo: None,
        }
    }

    async fn lobby() -> (SharedState, Uuid, Uuid) {
        let state = AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemoryRoomStore::new())).await;
        let host = Uuid::new_v4();
        let room = room_service::create_room(&state, host, "Ada".into(), "quiz".into(), 3)
            .await
            .unwrap();
        (state, room.id, host)
    }

    #[tokio::test]
    async fn accepting_an_invite_joins_the_roster() {
        let (state, room_id, host) = lobby().await;
        let guest = Uuid::new_v4();

        let invite = create_invite(&state, room_id, host, guest, snapshot())
            .await
            .unwrap();
        let resolved = respond_to_invite(&state, invite.id, guest, true)
            .await
            .unwrap();
        assert_eq!(resolved.status, InviteStatus::Accepted);

        let room = room_service::get_room(&state, room_id).await.unwrap();
        assert!(room.players.contains_key(&guest));
        assert_eq!(room.players[&guest].display_name, "Grace");
    }

    #[tokio::test]
    async fn a_pending_invite_blocks_a_duplicate() {
        let (state, room_id, host) = lobby().await;
        let guest = Uuid::new_v4();

        create_invite(&state, room_id, host, guest, snapshot())
            .await
            .unwrap();
        let err = create_invite(&state, room_id, host, guest, snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyInvited));
    }

    #[tokio::test]
    async fn an_expired_invite_does_not_block_a_new_one() {
        let (state, room_id, host) = lobby().await;
        let guest = Uuid::new_v4();
        let store = state.require_store().await.unwrap();

        // Logically expired but still physically present in the store.
        let stale = GameInvite::new(
            room_id,
            host,
            guest,
            snapshot(),
            now_millis() - 10_000,
            1_000,
        );
        store
            .create_invite(stale.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        create_invite(&state, room_id, host, guest, snapshot())
            .await
            .unwrap();
        let err = respond_to_invite(&state, stale.id, guest, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InviteExpired));
    }

    #[tokio::test]
    async fn declining_resolves_without_joining() {
        let (state, room_id, host) = lobby().await;
        let guest = Uuid::new_v4();

        let invite = create_invite(&state, room_id, host, guest, snapshot())
            .await
            .unwrap();
        let resolved = respond_to_invite(&state, invite.id, guest, false)
            .await
            .unwrap();
        assert_eq!(resolved.status, InviteStatus::Declined);

        let room = room_service::get_room(&state, room_id).await.unwrap();
        assert!(!room.players.contains_key(&guest));

        let err = respond_to_invite(&state, invite.id, guest, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InviteAlreadyResolved));
    }

    #[tokio::test]
    async fn only_the_invited_user_may_respond() {
        let (state, room_id, host) = lobby().await;
        let guest = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let invite = create_invite(&state, room_id, host, guest, snapshot())
            .await
            .unwrap();
        let err = respond_to_invite(&state, invite.id, stranger, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn an_unjoinable_accept_is_released_for_good() {
        let (state, room_id, host) = lobby().await;
        let guest = Uuid::new_v4();
        let store = state.require_store().await.unwrap();

        // An invite that committed its accept but whose join was rejected.
        let mut invite =
            GameInvite::new(room_id, host, guest, snapshot(), now_millis(), 60_000);
        invite.status = InviteStatus::Accepted;
        store
            .create_invite(invite.clone(), Duration::from_secs(120))
            .await
            .unwrap();

        release_unjoinable(&*store, &invite).await;
        let stored = store.get_invite(invite.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InviteStatus::Cancelled);

        // Releasing is status-guarded: a second release leaves it alone.
        release_unjoinable(&*store, &invite).await;
        let stored = store.get_invite(invite.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InviteStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_a_room_withdraws_its_pending_invites() {
        let (state, room_id, host) = lobby().await;
        let guest = Uuid::new_v4();

        let invite = create_invite(&state, room_id, host, guest, snapshot())
            .await
            .unwrap();
        room_service::cancel_room(&state, room_id, host).await.unwrap();

        let pending = list_pending_for_user(&state, guest).await.unwrap();
        assert!(pending.iter().all(|i| i.id != invite.id));

        let invites = list_room_invites(&state, room_id).await.unwrap();
        assert_eq!(invites[0].status, InviteStatus::Cancelled);
    }
}
