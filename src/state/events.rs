use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a room was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The host left the room.
    HostLeft,
    /// Every player stayed disconnected through the grace window.
    AllDisconnected,
}

/// One player's cumulative score, as carried by score-bearing events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreLine {
    /// Player the score belongs to.
    pub user: Uuid,
    /// Cumulative score after the round.
    pub score: u32,
}

/// Domain events published to the notification gateway.
///
/// The core only emits these; fan-out to connected clients and push senders
/// happens outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A pending invite was created for `invited`.
    InviteReceived {
        /// Invite identifier.
        invite_id: Uuid,
        /// Room the invite grants access to.
        room_id: Uuid,
        /// Inviting user.
        host: Uuid,
        /// Invited user.
        invited: Uuid,
        /// Host display name snapshotted on the invite.
        host_name: String,
    },
    /// A player entered the roster.
    PlayerJoined {
        /// Room joined.
        room_id: Uuid,
        /// Joining user.
        user: Uuid,
        /// Display name snapshotted at join time.
        display_name: String,
    },
    /// A round began with the given deadline.
    RoundStarted {
        /// Room the round belongs to.
        room_id: Uuid,
        /// Zero-based round index.
        round_index: u32,
        /// Absolute deadline in epoch milliseconds.
        deadline_ms: u64,
    },
    /// A round was scored.
    RoundEnded {
        /// Room the round belongs to.
        room_id: Uuid,
        /// Zero-based round index that ended.
        round_index: u32,
        /// Cumulative scores after the round, in join order.
        scores: Vec<ScoreLine>,
    },
    /// One player earned points in a scored round.
    PlayerScored {
        /// Room the round belongs to.
        room_id: Uuid,
        /// Player that scored.
        user: Uuid,
        /// Round the points were earned in.
        round_index: u32,
        /// Points earned in that round.
        points: u32,
    },
    /// All rounds are played; the ranking is final.
    RoomFinished {
        /// Finished room.
        room_id: Uuid,
        /// Final ranking, best first.
        ranking: Vec<ScoreLine>,
    },
    /// The room was abandoned before finishing.
    RoomCancelled {
        /// Cancelled room.
        room_id: Uuid,
        /// Why it was cancelled.
        reason: CancelReason,
    },
}

/// Broadcast hub fanning domain events out to in-process subscribers.
pub struct EventHub {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }
}
