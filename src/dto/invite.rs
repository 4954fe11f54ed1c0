use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::format_millis,
    state::invite::{GameInvite, InviteSnapshot, InviteStatus},
};

/// Payload sent by a host to invite another user into a lobby.
///
/// Display names and photos are a denormalized snapshot captured at send
/// time; the backend never refreshes them.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateInviteRequest {
    /// Room the invite grants access to.
    pub room_id: Uuid,
    /// User being invited.
    pub invited: Uuid,
    /// Host display name at send time.
    #[validate(length(min = 1, max = 64))]
    pub host_name: String,
    /// Invited user display name at send time.
    #[validate(length(min = 1, max = 64))]
    pub invited_name: String,
    /// Host photo URL, if any.
    #[validate(url)]
    pub host_photo: Option<String>,
    /// Invited user photo URL, if any.
    #[validate(url)]
    pub invited_photo: Option<String>,
}

impl CreateInviteRequest {
    /// Split the payload into its target room and the display snapshot.
    pub fn into_snapshot(self) -> (Uuid, Uuid, InviteSnapshot) {
        (
            self.room_id,
            self.invited,
            InviteSnapshot {
                host_name: self.host_name,
                invited_name: self.invited_name,
                host_photo: self.host_photo,
                invited_photo: self.invited_photo,
            },
        )
    }
}

/// Accept or decline verdict for a pending invite.
#[derive(Debug, Deserialize)]
pub struct RespondInviteRequest {
    /// `true` accepts the invite, `false` declines it.
    pub accept: bool,
}

/// Invite as exposed over the API, with expiry already evaluated.
#[derive(Debug, Serialize)]
pub struct InviteResponse {
    /// Invite identifier.
    pub id: Uuid,
    /// Room the invite grants access to.
    pub room_id: Uuid,
    /// Inviting user.
    pub host: Uuid,
    /// Invited user.
    pub invited: Uuid,
    /// Host display name at send time.
    pub host_name: String,
    /// Invited user display name at send time.
    pub invited_name: String,
    /// Host photo URL, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_photo: Option<String>,
    /// Invited user photo URL, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_photo: Option<String>,
    /// Resolution state with expiry already evaluated.
    pub status: InviteStatus,
    /// RFC 3339 instant past which a pending invite reads as expired.
    pub expires_at: String,
    /// RFC 3339 creation instant.
    pub created_at: String,
}

impl From<GameInvite> for InviteResponse {
    fn from(invite: GameInvite) -> Self {
        Self {
            id: invite.id,
            room_id: invite.room_id,
            host: invite.host,
            invited: invite.invited,
            host_name: invite.host_name,
            invited_name: invite.invited_name,
            host_photo: invite.host_photo,
            invited_photo: invite.invited_photo,
            status: invite.status,
            expires_at: format_millis(invite.expires_at_ms),
            created_at: format_millis(invite.created_at_ms),
        }
    }
}
