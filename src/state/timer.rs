use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a room timer fires for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TimerKind {
    /// End the round with this index when the deadline passes.
    RoundEnd {
        /// Round the entry was scheduled for; a mismatch marks it stale.
        round_index: u32,
    },
    /// Cancel the room if every player is still disconnected when it fires.
    DisconnectGrace,
}

/// A persisted scheduling intent, keyed by room.
///
/// At most one entry exists per room; scheduling a new one supersedes the
/// old entry, and handlers must recognize a superseded entry as stale rather
/// than rely on having removed it first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTimer {
    /// Room the trigger belongs to.
    pub room_id: Uuid,
    /// Absolute fire time in epoch milliseconds.
    pub fire_at_ms: u64,
    /// What to do when the entry fires.
    pub kind: TimerKind,
}

impl RoomTimer {
    /// Entry that ends `round_index` at `fire_at_ms`.
    pub fn round_end(room_id: Uuid, fire_at_ms: u64, round_index: u32) -> Self {
        Self {
            room_id,
            fire_at_ms,
            kind: TimerKind::RoundEnd { round_index },
        }
    }

    /// Entry that cancels an all-disconnected room at `fire_at_ms`.
    pub fn disconnect_grace(room_id: Uuid, fire_at_ms: u64) -> Self {
        Self {
            room_id,
            fire_at_ms,
            kind: TimerKind::DisconnectGrace,
        }
    }

    /// Whether the entry is due at `now`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.fire_at_ms <= now_ms
    }
}
