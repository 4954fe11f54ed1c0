use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};
use crate::state::{
    invite::{GameInvite, InviteStatus},
    now_millis,
    room::GameRoom,
    timer::RoomTimer,
};

/// A stored value with an optional absolute expiry.
#[derive(Debug, Clone)]
struct Stored<T> {
    value: T,
    expires_at_ms: Option<u64>,
}

impl<T> Stored<T> {
    fn new(value: T, ttl: Option<Duration>, now_ms: u64) -> Self {
        Self {
            value,
            expires_at_ms: ttl.map(|d| now_ms + d.as_millis() as u64),
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

/// In-process store backend over concurrent maps with lazy TTL eviction.
///
/// This is the default backend and the test double; the [`RoomStore`] trait
/// is the seam for pointing the core at an external shared store.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    rooms: Arc<DashMap<Uuid, Stored<GameRoom>>>,
    invites: Arc<DashMap<Uuid, Stored<GameInvite>>>,
    timers: Arc<DashMap<Uuid, RoomTimer>>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn live_room(&self, id: Uuid, now_ms: u64) -> Option<GameRoom> {
        let entry = self.rooms.get(&id)?;
        if entry.is_expired(now_ms) {
            drop(entry);
            self.rooms.remove_if(&id, |_, stored| stored.is_expired(now_ms));
            return None;
        }
        Some(entry.value.clone())
    }

    fn live_invite(&self, id: Uuid, now_ms: u64) -> Option<GameInvite> {
        let entry = self.invites.get(&id)?;
        if entry.is_expired(now_ms) {
            drop(entry);
            self.invites
                .remove_if(&id, |_, stored| stored.is_expired(now_ms));
            return None;
        }
        Some(entry.value.clone())
    }

    fn collect_invites<F>(&self, now_ms: u64, mut keep: F) -> Vec<GameInvite>
    where
        F: FnMut(&GameInvite) -> bool,
    {
        self.invites
            .iter()
            .filter(|entry| !entry.is_expired(now_ms))
            .filter(|entry| keep(&entry.value))
            .map(|entry| entry.value.clone())
            .collect()
    }
}

impl RoomStore for MemoryRoomStore {
    fn get_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameRoom>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.live_room(id, now_millis())) })
    }

    fn save_room(
        &self,
        room: GameRoom,
        expected_version: Option<u64>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let now_ms = now_millis();
            let id = room.id;
            match expected_version {
                None => {
                    if store.live_room(id, now_ms).is_some() {
                        return Err(StorageError::AlreadyExists(format!("room {id}")));
                    }
                    store.rooms.insert(id, Stored::new(room, ttl, now_ms));
                    Ok(())
                }
                Some(expected) => {
                    let mut entry = store
                        .rooms
                        .get_mut(&id)
                        .filter(|stored| !stored.is_expired(now_ms))
                        .ok_or_else(|| {
                            StorageError::Conflict(format!("room {id} is gone"))
                        })?;
                    if entry.value.version != expected {
                        return Err(StorageError::Conflict(format!(
                            "room {id}: expected version {expected}, stored {}",
                            entry.value.version
                        )));
                    }
                    *entry = Stored::new(room, ttl, now_ms);
                    Ok(())
                }
            }
        })
    }

    fn create_invite(
        &self,
        invite: GameInvite,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let now_ms = now_millis();
            let id = invite.id;
            if store.live_invite(id, now_ms).is_some() {
                return Err(StorageError::AlreadyExists(format!("invite {id}")));
            }
            store
                .invites
                .insert(id, Stored::new(invite, Some(ttl), now_ms));
            Ok(())
        })
    }

    fn get_invite(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameInvite>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.live_invite(id, now_millis())) })
    }

    fn update_invite(
        &self,
        invite: GameInvite,
        expected_status: InviteStatus,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let now_ms = now_millis();
            let id = invite.id;
            let mut entry = store
                .invites
                .get_mut(&id)
                .filter(|stored| !stored.is_expired(now_ms))
                .ok_or_else(|| StorageError::Conflict(format!("invite {id} is gone")))?;
            if entry.value.status != expected_status {
                return Err(StorageError::Conflict(format!(
                    "invite {id}: expected status {:?}, stored {:?}",
                    expected_status, entry.value.status
                )));
            }
            let expires_at_ms = entry.expires_at_ms;
            *entry = Stored {
                value: invite,
                expires_at_ms,
            };
            Ok(())
        })
    }

    fn invites_for_user(
        &self,
        user: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameInvite>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.collect_invites(now_millis(), |invite| invite.invited == user))
        })
    }

    fn invites_for_room(
        &self,
        room: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameInvite>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.collect_invites(now_millis(), |invite| invite.room_id == room))
        })
    }

    fn invites_with_status(
        &self,
        status: InviteStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<GameInvite>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.collect_invites(now_millis(), |invite| invite.status == status))
        })
    }

    fn put_timer(&self, timer: RoomTimer) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.timers.insert(timer.room_id, timer);
            Ok(())
        })
    }

    fn get_timer(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomTimer>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.timers.get(&room_id).map(|t| t.value().clone())) })
    }

    fn remove_timer(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.timers.remove(&room_id);
            Ok(())
        })
    }

    fn remove_timer_if(&self, timer: RoomTimer) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let removed = store
                .timers
                .remove_if(&timer.room_id, |_, stored| *stored == timer);
            Ok(removed.is_some())
        })
    }

    fn due_timers(&self, now_ms: u64) -> BoxFuture<'static, StorageResult<Vec<RoomTimer>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .timers
                .iter()
                .filter(|entry| entry.is_due(now_ms))
                .map(|entry| entry.value().clone())
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::timer::TimerKind;

    fn room() -> GameRoom {
        GameRoom::new(Uuid::new_v4(), "Ada".into(), "quiz".into(), 3)
    }

    #[tokio::test]
    async fn versioned_save_admits_exactly_one_winner() {
        let store = MemoryRoomStore::new();
        let fresh = room();
        let id = fresh.id;
        store.save_room(fresh.clone(), None, None).await.unwrap();

        // Two writers observe version 1 and both try to mutate.
        let mut first = store.get_room(id).await.unwrap().unwrap();
        let mut second = first.clone();
        first.add_player(Uuid::new_v4(), "Grace".into(), 4).unwrap();
        second.add_player(Uuid::new_v4(), "Alan".into(), 4).unwrap();

        store.save_room(first, Some(1), None).await.unwrap();
        let err = store.save_room(second, Some(1), None).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let stored = store.get_room(id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.players.len(), 2);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = MemoryRoomStore::new();
        let fresh = room();
        store.save_room(fresh.clone(), None, None).await.unwrap();
        let err = store.save_room(fresh, None, None).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn expired_room_reads_as_absent() {
        let store = MemoryRoomStore::new();
        let fresh = room();
        let id = fresh.id;
        store
            .save_room(fresh, None, Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(store.get_room(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invite_status_guard_makes_resolution_exactly_once() {
        let store = MemoryRoomStore::new();
        let invite = GameInvite::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            crate::state::invite::InviteSnapshot {
                host_name: "Ada".into(),
                invited_name: "Grace".into(),
                host_photo: None,
                invited_photo: None,
            },
            now_millis(),
            60_000,
        );
        store
            .create_invite(invite.clone(), Duration::from_secs(120))
            .await
            .unwrap();

        let mut accepted = invite.clone();
        accepted.status = InviteStatus::Accepted;
        store
            .update_invite(accepted, InviteStatus::Pending)
            .await
            .unwrap();

        // A racing decline observes the stored status has moved on.
        let mut declined = invite.clone();
        declined.status = InviteStatus::Declined;
        let err = store
            .update_invite(declined, InviteStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let stored = store.get_invite(invite.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InviteStatus::Accepted);
    }

    #[tokio::test]
    async fn conditional_timer_removal_spares_a_superseding_entry() {
        let store = MemoryRoomStore::new();
        let room_id = Uuid::new_v4();
        let old = RoomTimer::round_end(room_id, 1_000, 0);
        store.put_timer(old.clone()).await.unwrap();

        // Another instance supersedes the entry for the next round.
        let new = RoomTimer::round_end(room_id, 2_000, 1);
        store.put_timer(new.clone()).await.unwrap();

        // The handler that popped the old entry must not delete the new one.
        assert!(!store.remove_timer_if(old).await.unwrap());
        let stored = store.get_timer(room_id).await.unwrap().unwrap();
        assert_eq!(stored.kind, TimerKind::RoundEnd { round_index: 1 });

        assert!(store.remove_timer_if(new).await.unwrap());
        assert!(store.get_timer(room_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_timers_only_returns_past_deadlines() {
        let store = MemoryRoomStore::new();
        let due = RoomTimer::round_end(Uuid::new_v4(), 1_000, 0);
        let future = RoomTimer::disconnect_grace(Uuid::new_v4(), 50_000);
        store.put_timer(due.clone()).await.unwrap();
        store.put_timer(future).await.unwrap();

        let found = store.due_timers(10_000).await.unwrap();
        assert_eq!(found, vec![due]);
    }
}
