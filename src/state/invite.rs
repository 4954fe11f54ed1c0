use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolution state of an invite. An invite leaves `Pending` exactly once
/// and is immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    /// Waiting for the invited user to respond.
    Pending,
    /// The invited user accepted and is (being) added to the roster.
    Accepted,
    /// The invited user declined.
    Declined,
    /// The host withdrew the invite.
    Cancelled,
    /// The invite outlived its expiry without a response.
    Expired,
}

/// An offer from a host to a specific user to join a room.
///
/// Display metadata is a denormalized snapshot taken at creation time and is
/// never re-fetched, so it stays stable even if the referenced profiles are
/// edited later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInvite {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// Room the invite grants access to.
    pub room_id: Uuid,
    /// User who sent the invite.
    pub host: Uuid,
    /// User the invite is addressed to.
    pub invited: Uuid,
    /// Host display name at invite time.
    pub host_name: String,
    /// Invited user display name at invite time.
    pub invited_name: String,
    /// Host photo URL at invite time, if any.
    pub host_photo: Option<String>,
    /// Invited user photo URL at invite time, if any.
    pub invited_photo: Option<String>,
    /// Stored resolution state.
    pub status: InviteStatus,
    /// Absolute expiry in epoch milliseconds.
    pub expires_at_ms: u64,
    /// Creation timestamp in epoch milliseconds.
    pub created_at_ms: u64,
}

/// Snapshot of the display metadata captured when an invite is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteSnapshot {
    /// Host display name.
    pub host_name: String,
    /// Invited user display name.
    pub invited_name: String,
    /// Host photo URL, if any.
    pub host_photo: Option<String>,
    /// Invited user photo URL, if any.
    pub invited_photo: Option<String>,
}

impl GameInvite {
    /// Create a pending invite expiring at `now + ttl`.
    pub fn new(
        room_id: Uuid,
        host: Uuid,
        invited: Uuid,
        snapshot: InviteSnapshot,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            host,
            invited,
            host_name: snapshot.host_name,
            invited_name: snapshot.invited_name,
            host_photo: snapshot.host_photo,
            invited_photo: snapshot.invited_photo,
            status: InviteStatus::Pending,
            expires_at_ms: now_ms + ttl_ms,
            created_at_ms: now_ms,
        }
    }

    /// Resolution state as observed at `now`.
    ///
    /// A stored `Pending` invite whose expiry has passed reads as `Expired`
    /// even before the store physically deletes the record; the store TTL is
    /// only a backstop.
    pub fn effective_status(&self, now_ms: u64) -> InviteStatus {
        if self.status == InviteStatus::Pending && now_ms > self.expires_at_ms {
            InviteStatus::Expired
        } else {
            self.status
        }
    }

    /// Whether the invited user can still respond at `now`.
    pub fn is_actionable(&self, now_ms: u64) -> bool {
        self.effective_status(now_ms) == InviteStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(now_ms: u64, ttl_ms: u64) -> GameInvite {
        GameInvite::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            InviteSnapshot {
                host_name: "Ada".into(),
                invited_name: "Grace".into(),
                host_photo: None,
                invited_photo: None,
            },
            now_ms,
            ttl_ms,
        )
    }

    #[test]
    fn pending_invite_reads_expired_after_its_deadline() {
        let invite = invite(1_000, 60_000);
        assert_eq!(invite.effective_status(30_000), InviteStatus::Pending);
        assert!(invite.is_actionable(30_000));
        assert_eq!(invite.effective_status(61_001), InviteStatus::Expired);
        assert!(!invite.is_actionable(61_001));
    }

    #[test]
    fn resolved_invites_never_read_expired() {
        let mut invite = invite(1_000, 60_000);
        invite.status = InviteStatus::Accepted;
        assert_eq!(invite.effective_status(999_999), InviteStatus::Accepted);
    }
}
