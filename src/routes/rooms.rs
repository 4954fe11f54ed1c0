use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::room::{ConnectionRequest, CreateRoomRequest, RoomResponse, SubmitAnswerRequest},
    error::AppError,
    routes::UserId,
    services::room_service,
    state::SharedState,
};

/// Routes driving the room lifecycle.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{id}", get(get_room).delete(cancel_room))
        .route("/rooms/{id}/start", post(start_room))
        .route("/rooms/{id}/answers", post(submit_answer))
        .route("/rooms/{id}/advance", post(advance_room))
        .route("/rooms/{id}/connection", post(set_connected))
}

/// Open a fresh lobby hosted by the caller.
pub async fn create_room(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<Json<RoomResponse>, AppError> {
    payload.validate()?;
    let room = room_service::create_room(
        &state,
        user,
        payload.display_name,
        payload.name,
        payload.total_rounds,
    )
    .await?;
    Ok(Json(RoomResponse::from_room(&room)))
}

/// Read a room snapshot.
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = room_service::get_room(&state, id).await?;
    Ok(Json(RoomResponse::from_room(&room)))
}

/// Start the first round. Host only.
pub async fn start_room(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = room_service::start_room(&state, id, user).await?;
    Ok(Json(RoomResponse::from_room(&room)))
}

/// Record the caller's answer for the round in progress.
pub async fn submit_answer(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = room_service::submit_answer(&state, id, user, payload.correct).await?;
    Ok(Json(RoomResponse::from_room(&room)))
}

/// Move a scored room into the next round, or finish it. Host only.
pub async fn advance_room(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = room_service::advance_room(&state, id, user).await?;
    Ok(Json(RoomResponse::from_room(&room)))
}

/// Update the caller's connection state.
pub async fn set_connected(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConnectionRequest>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = room_service::set_connected(&state, id, user, payload.connected).await?;
    Ok(Json(RoomResponse::from_room(&room)))
}

/// Cancel a room and withdraw its pending invites. Host only.
pub async fn cancel_room(
    State(state): State<SharedState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = room_service::cancel_room(&state, id, user).await?;
    Ok(Json(RoomResponse::from_room(&room)))
}
