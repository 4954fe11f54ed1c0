use std::time::Duration;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::storage::StorageResult;
use crate::state::{
    invite::{GameInvite, InviteStatus},
    room::GameRoom,
    timer::RoomTimer,
};

/// Abstraction over the shared ephemeral store holding room, invite, and
/// timer state.
///
/// The store is the single source of truth visible to every server instance;
/// in-process components only hold transient copies that are re-validated by
/// version on every write. All mutations are conditional: versioned for
/// rooms, status-guarded for invites, value-compared for timers.
pub trait RoomStore: Send + Sync {
    /// Fetch a room by id, `None` when absent or expired.
    fn get_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameRoom>>>;

    /// Write a room.
    ///
    /// `expected_version = None` creates the key and fails with
    /// `AlreadyExists` when present; `Some(v)` replaces the record only if
    /// the stored version is exactly `v`, failing with `Conflict` otherwise.
    /// `ttl` bounds the record's lifetime (used for finished/cancelled
    /// retention); `None` keeps it until overwritten.
    fn save_room(
        &self,
        room: GameRoom,
        expected_version: Option<u64>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Create a pending invite, failing with `AlreadyExists` on id collision.
    fn create_invite(
        &self,
        invite: GameInvite,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch an invite by id, `None` when absent or expired.
    fn get_invite(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameInvite>>>;

    /// Replace an invite only while its stored status is `expected_status`,
    /// failing with `Conflict` otherwise. This is what makes the
    /// away-from-`Pending` transition exactly-once.
    fn update_invite(
        &self,
        invite: GameInvite,
        expected_status: InviteStatus,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// All stored invites addressed to `user`.
    fn invites_for_user(&self, user: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<GameInvite>>>;

    /// All stored invites belonging to `room`.
    fn invites_for_room(&self, room: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<GameInvite>>>;

    /// All stored invites whose *stored* status is `status`.
    fn invites_with_status(
        &self,
        status: InviteStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<GameInvite>>>;

    /// Write the single timer entry for `timer.room_id`, superseding any
    /// prior entry for that room.
    fn put_timer(&self, timer: RoomTimer) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch the timer entry for a room, if any.
    fn get_timer(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomTimer>>>;

    /// Unconditionally drop the timer entry for a room.
    fn remove_timer(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    /// Drop the timer entry only if it still equals `timer`, returning
    /// whether a removal happened. Handlers that popped an entry use this so
    /// they never delete a superseding entry written in the meantime.
    fn remove_timer_if(&self, timer: RoomTimer) -> BoxFuture<'static, StorageResult<bool>>;

    /// Timer entries whose fire time has passed at `now_ms`.
    fn due_timers(&self, now_ms: u64) -> BoxFuture<'static, StorageResult<Vec<RoomTimer>>>;

    /// Probe the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
