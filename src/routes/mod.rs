use axum::{Router, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{error::AppError, state::SharedState};

pub mod events;
pub mod health;
pub mod invites;
pub mod rooms;

/// Verified identity of the caller, taken from the `X-User-Id` header set by
/// the authenticating proxy in front of this service.
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing X-User-Id header".into()))?;
        let user = raw
            .parse::<Uuid>()
            .map_err(|_| AppError::Unauthorized("malformed X-User-Id header".into()))?;
        Ok(UserId(user))
    }
}

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(events::router())
        .merge(rooms::router())
        .merge(invites::router())
        .with_state(state)
}
