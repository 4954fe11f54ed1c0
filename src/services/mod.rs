/// Health check service.
pub mod health_service;
/// Invite lifecycle operations.
pub mod invite_service;
/// Background repair of accepted invites whose roster add is pending.
pub mod reconciler;
/// Room lifecycle and round operations.
pub mod room_service;
/// Durable round-timer polling loop.
pub mod scheduler;
