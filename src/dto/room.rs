use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::format_millis,
    state::room::{GameRoom, PlayerSlot, RankedPlayer, RoomStatus},
};

/// Payload used to open a fresh lobby.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoomRequest {
    /// Display name of the room.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Display name of the creating host, snapshotted into the roster.
    #[validate(length(min = 1, max = 64))]
    pub display_name: String,
    /// Number of rounds to play.
    #[validate(range(min = 1, max = 50))]
    pub total_rounds: u32,
}

/// Answer submitted for the round in progress.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    /// Whether the answer was correct. Grading happens upstream; the room
    /// only scores the verdict.
    pub correct: bool,
}

/// Presence update for a roster member.
#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    /// New connection state of the calling player.
    pub connected: bool,
}

/// One roster member as exposed over the API.
#[derive(Debug, Serialize)]
pub struct PlayerView {
    /// Player identifier.
    pub user: Uuid,
    /// Display name snapshotted at join time.
    pub display_name: String,
    /// Cumulative score.
    pub score: u32,
    /// Whether the player currently holds a live connection.
    pub connected: bool,
    /// Whether an answer is already locked in for the current round.
    pub answered: bool,
}

/// One line of the final ranking.
#[derive(Debug, Serialize)]
pub struct RankingEntry {
    /// Player identifier.
    pub user: Uuid,
    /// Display name snapshotted at join time.
    pub display_name: String,
    /// Final cumulative score.
    pub score: u32,
    /// Cumulative answer time used for the tie-break.
    pub total_answer_ms: u64,
}

/// Full room snapshot returned by every room operation.
#[derive(Debug, Serialize)]
pub struct RoomResponse {
    /// Room identifier.
    pub id: Uuid,
    /// Hosting user.
    pub host: Uuid,
    /// Display name of the room.
    pub name: String,
    /// Current lifecycle phase.
    pub status: RoomStatus,
    /// Roster in join order.
    pub players: Vec<PlayerView>,
    /// Zero-based index of the round in progress or last scored.
    pub current_round: u32,
    /// Total number of rounds to play.
    pub total_rounds: u32,
    /// RFC 3339 deadline of the round in progress, absent outside a round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_deadline: Option<String>,
    /// Final standings, present once the room is finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Vec<RankingEntry>>,
    /// Version observed by this read, for optimistic retries by clients.
    pub version: u64,
}

impl RoomResponse {
    /// Project a domain room into its API shape.
    pub fn from_room(room: &GameRoom) -> Self {
        let ranking = (room.status == RoomStatus::Finished)
            .then(|| room.final_ranking().into_iter().map(Into::into).collect());
        Self {
            id: room.id,
            host: room.host,
            name: room.name.clone(),
            status: room.status,
            players: player_views(&room.players),
            current_round: room.current_round,
            total_rounds: room.total_rounds,
            round_deadline: room.round_deadline_ms.map(format_millis),
            ranking,
            version: room.version,
        }
    }
}

impl From<RankedPlayer> for RankingEntry {
    fn from(entry: RankedPlayer) -> Self {
        Self {
            user: entry.user,
            display_name: entry.display_name,
            score: entry.score,
            total_answer_ms: entry.total_answer_ms,
        }
    }
}

fn player_views(players: &IndexMap<Uuid, PlayerSlot>) -> Vec<PlayerView> {
    players
        .iter()
        .map(|(user, slot)| PlayerView {
            user: *user,
            display_name: slot.display_name.clone(),
            score: slot.score,
            connected: slot.connected,
            answered: slot.round_answer.is_some(),
        })
        .collect()
}
