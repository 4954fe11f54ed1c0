use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::invite::{CreateInviteRequest, InviteResponse, RespondInviteRequest},
    error::AppError,
    routes::UserId,
    services::invite_service,
    state::SharedState,
};

/// Routes driving the invite lifecycle.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/invites", post(create_invite))
        .route("/invites/pending", get(pending_invites))
        .route("/invites/{id}/respond", post(respond_to_invite))
        .route("/invites/{id}", delete(cancel_invite))
        .route(
            "/rooms/{id}/invites",
            get(room_invites).delete(cancel_room_invites),
        )
}

/// Invite another user into the caller's lobby.
pub async fn create_invite(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Json(payload): Json<CreateInviteRequest>,
) -> Result<Json<InviteResponse>, AppError> {
    payload.validate()?;
    let (room_id, invited, snapshot) = payload.into_snapshot();
    let invite = invite_service::create_invite(&state, room_id, user, invited, snapshot).await?;
    Ok(Json(invite.into()))
}

/// List pending invites addressed to the caller, oldest first.
pub async fn pending_invites(
    State(state): State<SharedState>,
    UserId(user): UserId,
) -> Result<Json<Vec<InviteResponse>>, AppError> {
    let invites = invite_service::list_pending_for_user(&state, user).await?;
    Ok(Json(invites.into_iter().map(Into::into).collect()))
}

/// Accept or decline an invite. Invited user only.
pub async fn respond_to_invite(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
    Json(payload): Json<RespondInviteRequest>,
) -> Result<Json<InviteResponse>, AppError> {
    let invite = invite_service::respond_to_invite(&state, id, user, payload.accept).await?;
    Ok(Json(invite.into()))
}

/// Withdraw a single invite. Host only.
pub async fn cancel_invite(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<InviteResponse>, AppError> {
    let invite = invite_service::cancel_invite(&state, id, user).await?;
    Ok(Json(invite.into()))
}

/// List every invite of a room, expiry already evaluated.
pub async fn room_invites(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<InviteResponse>>, AppError> {
    let invites = invite_service::list_room_invites(&state, id).await?;
    Ok(Json(invites.into_iter().map(Into::into).collect()))
}

/// Count of invites flipped by a bulk withdrawal.
#[derive(Debug, Serialize)]
pub struct WithdrawnResponse {
    /// How many pending invites were withdrawn.
    pub withdrawn: usize,
}

/// Withdraw every pending invite of a room. Host only.
pub async fn cancel_room_invites(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<WithdrawnResponse>, AppError> {
    let room = crate::services::room_service::get_room(&state, id).await?;
    if room.host != user {
        return Err(AppError::Unauthorized(
            "only the host can withdraw invites".into(),
        ));
    }
    let withdrawn = invite_service::cancel_room_invites(&state, id).await?;
    Ok(Json(WithdrawnResponse { withdrawn }))
}
