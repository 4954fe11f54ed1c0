/// In-process store backend with TTL and conditional writes.
pub mod memory;
/// Store trait the core talks to.
pub mod room_store;
/// Backend-agnostic storage errors.
pub mod storage;
