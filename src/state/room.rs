use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle phase of a game room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Players are gathering; invites can be sent and accepted.
    Lobby,
    /// A round is in progress, bounded by `round_deadline_ms`.
    InRound,
    /// Round scores have been applied; waiting to advance or finish.
    Scoring,
    /// All rounds are played and the final ranking is frozen.
    Finished,
    /// The room was abandoned before finishing.
    Cancelled,
}

/// One roster slot: a player, their score, and their connection flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSlot {
    /// Display name snapshotted when the player joined.
    pub display_name: String,
    /// Cumulative score across all scored rounds.
    pub score: u32,
    /// Whether the player currently holds a live connection.
    pub connected: bool,
    /// Answer submitted for the round in progress, cleared on scoring.
    pub round_answer: Option<RoundAnswer>,
    /// Cumulative answer time in milliseconds, used as the ranking tie-break.
    pub total_answer_ms: u64,
}

impl PlayerSlot {
    fn new(display_name: String) -> Self {
        Self {
            display_name,
            score: 0,
            connected: true,
            round_answer: None,
            total_answer_ms: 0,
        }
    }
}

/// A single answer submission within the current round window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundAnswer {
    /// Whether the submitted answer matched the expected one.
    pub correct: bool,
    /// Milliseconds elapsed inside the round window when the answer arrived.
    pub elapsed_ms: u64,
}

/// Scoring constants applied when a round ends.
#[derive(Debug, Clone, Copy)]
pub struct ScoringRules {
    /// Points awarded for any correct answer.
    pub base_points: u32,
    /// Maximum speed bonus, awarded for an instantaneous answer and decaying
    /// linearly to zero at the round deadline.
    pub max_speed_bonus: u32,
    /// Length of the round window in milliseconds.
    pub round_duration_ms: u64,
}

impl ScoringRules {
    /// Points earned by a single answer under these rules.
    pub fn score(&self, answer: &RoundAnswer) -> u32 {
        if !answer.correct {
            return 0;
        }
        let remaining = self.round_duration_ms.saturating_sub(answer.elapsed_ms);
        let bonus = if self.round_duration_ms == 0 {
            0
        } else {
            (u64::from(self.max_speed_bonus) * remaining / self.round_duration_ms) as u32
        };
        self.base_points + bonus
    }
}

/// Points awarded to one player when a round was scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundScore {
    /// Player the points belong to.
    pub user: Uuid,
    /// Points earned in this round.
    pub points: u32,
    /// Cumulative score after applying the round.
    pub total: u32,
}

/// Outcome of advancing a room out of the scoring phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundAdvance {
    /// Another round begins with the given index and deadline.
    NextRound {
        /// Index of the round that just started.
        round_index: u32,
        /// Absolute deadline of the new round in epoch milliseconds.
        deadline_ms: u64,
    },
    /// The last round was already scored; the room is now finished.
    Finished,
}

/// One line of the final ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedPlayer {
    /// Player identifier.
    pub user: Uuid,
    /// Display name snapshotted at join time.
    pub display_name: String,
    /// Final cumulative score.
    pub score: u32,
    /// Cumulative answer time used for the tie-break.
    pub total_answer_ms: u64,
}

/// Error returned when a room operation is not legal in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The operation cannot be applied while the room is in this status.
    #[error("operation not allowed while room is {status:?}")]
    InvalidStatus {
        /// Status the room was in when the operation was rejected.
        status: RoomStatus,
    },
    /// The roster already holds the configured maximum number of players.
    #[error("room already holds {capacity} players")]
    CapacityExceeded {
        /// Configured maximum roster size.
        capacity: usize,
    },
    /// Starting requires a minimum number of connected players.
    #[error("at least {min} connected players are required, got {connected}")]
    NotEnoughPlayers {
        /// Required minimum.
        min: usize,
        /// Connected players observed.
        connected: usize,
    },
    /// The user is not part of this room's roster.
    #[error("player {user} is not part of this room")]
    UnknownPlayer {
        /// Offending user id.
        user: Uuid,
    },
    /// The player already submitted an answer for the current round.
    #[error("player {user} already answered this round")]
    AlreadyAnswered {
        /// Offending user id.
        user: Uuid,
    },
    /// A round-end trigger referenced a round the room is no longer in.
    #[error("stale trigger for round {round}, room is at round {current}")]
    StaleRound {
        /// Round index the trigger was scheduled for.
        round: u32,
        /// Round index the room is currently at.
        current: u32,
    },
}

/// Minimum number of connected players required to start a game.
pub const MIN_PLAYERS_TO_START: usize = 2;

/// One quiz game session: roster, round progression, and optimistic version.
///
/// Every mutating method bumps `version` by exactly one on success so the
/// store can reject writes whose observed version is no longer current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRoom {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// User hosting the room.
    pub host: Uuid,
    /// Display name of the room.
    pub name: String,
    /// Roster in join order, unique by user id.
    pub players: IndexMap<Uuid, PlayerSlot>,
    /// Current lifecycle phase.
    pub status: RoomStatus,
    /// Zero-based index of the round in progress or last scored.
    pub current_round: u32,
    /// Total number of rounds to play.
    pub total_rounds: u32,
    /// Absolute round deadline in epoch milliseconds, present only in-round.
    pub round_deadline_ms: Option<u64>,
    /// Optimistic concurrency counter, strictly +1 per successful mutation.
    pub version: u64,
}

impl GameRoom {
    /// Create a fresh lobby with the host as its first roster entry.
    pub fn new(host: Uuid, host_name: String, name: String, total_rounds: u32) -> Self {
        let mut players = IndexMap::new();
        players.insert(host, PlayerSlot::new(host_name));
        Self {
            id: Uuid::new_v4(),
            host,
            name,
            players,
            status: RoomStatus::Lobby,
            current_round: 0,
            total_rounds,
            round_deadline_ms: None,
            version: 1,
        }
    }

    /// Whether new players may still join.
    pub fn is_joinable(&self, capacity: usize) -> bool {
        self.status == RoomStatus::Lobby && self.players.len() < capacity
    }

    /// Number of players currently connected.
    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| p.connected).count()
    }

    /// Whether every roster entry is disconnected.
    pub fn all_disconnected(&self) -> bool {
        self.connected_count() == 0
    }

    /// Whether every connected player has an answer locked in for the
    /// round in progress. Vacuously true when nobody is connected.
    pub fn all_connected_answered(&self) -> bool {
        self.players
            .values()
            .filter(|p| p.connected)
            .all(|p| p.round_answer.is_some())
    }

    /// Add a player to the roster while in the lobby.
    ///
    /// Returns `Ok(false)` without bumping the version when the user is
    /// already on the roster, which makes retried joins idempotent.
    pub fn add_player(
        &mut self,
        user: Uuid,
        display_name: String,
        capacity: usize,
    ) -> Result<bool, TransitionError> {
        if self.players.contains_key(&user) {
            return Ok(false);
        }
        if self.status != RoomStatus::Lobby {
            return Err(TransitionError::InvalidStatus {
                status: self.status,
            });
        }
        if self.players.len() >= capacity {
            return Err(TransitionError::CapacityExceeded { capacity });
        }
        self.players.insert(user, PlayerSlot::new(display_name));
        self.version += 1;
        Ok(true)
    }

    /// Start the game: `Lobby → InRound` with round zero and a fresh deadline.
    pub fn start(&mut self, now_ms: u64, round_duration_ms: u64) -> Result<(), TransitionError> {
        if self.status != RoomStatus::Lobby {
            return Err(TransitionError::InvalidStatus {
                status: self.status,
            });
        }
        let connected = self.connected_count();
        if connected < MIN_PLAYERS_TO_START {
            return Err(TransitionError::NotEnoughPlayers {
                min: MIN_PLAYERS_TO_START,
                connected,
            });
        }
        self.status = RoomStatus::InRound;
        self.current_round = 0;
        self.round_deadline_ms = Some(now_ms + round_duration_ms);
        self.version += 1;
        Ok(())
    }

    /// Record one player's answer for the round in progress.
    ///
    /// The elapsed time is clamped to the round window. Returns `true` when
    /// every *connected* player has now answered, which is the signal for the
    /// early-completion fast path.
    pub fn record_answer(
        &mut self,
        user: Uuid,
        correct: bool,
        now_ms: u64,
        round_duration_ms: u64,
    ) -> Result<bool, TransitionError> {
        if self.status != RoomStatus::InRound {
            return Err(TransitionError::InvalidStatus {
                status: self.status,
            });
        }
        // Status is InRound, so the deadline is present.
        let deadline = self.round_deadline_ms.unwrap_or(now_ms);
        let started = deadline.saturating_sub(round_duration_ms);
        let elapsed_ms = now_ms.saturating_sub(started).min(round_duration_ms);

        let slot = self
            .players
            .get_mut(&user)
            .ok_or(TransitionError::UnknownPlayer { user })?;
        if slot.round_answer.is_some() {
            return Err(TransitionError::AlreadyAnswered { user });
        }
        slot.round_answer = Some(RoundAnswer {
            correct,
            elapsed_ms,
        });
        self.version += 1;

        Ok(self.all_connected_answered())
    }

    /// Score the round in progress: `InRound → Scoring`.
    ///
    /// Rejects triggers carrying a stale round index so a superseded or
    /// duplicate timer fire can never score a round twice.
    pub fn end_round(
        &mut self,
        round_index: u32,
        rules: ScoringRules,
    ) -> Result<Vec<RoundScore>, TransitionError> {
        if self.status != RoomStatus::InRound {
            return Err(TransitionError::InvalidStatus {
                status: self.status,
            });
        }
        if round_index != self.current_round {
            return Err(TransitionError::StaleRound {
                round: round_index,
                current: self.current_round,
            });
        }

        let mut scores = Vec::with_capacity(self.players.len());
        for (user, slot) in &mut self.players {
            let points = match slot.round_answer.take() {
                Some(answer) => {
                    slot.total_answer_ms += answer.elapsed_ms;
                    rules.score(&answer)
                }
                None => {
                    // An unanswered round counts as the full window for the
                    // cumulative tie-break.
                    slot.total_answer_ms += rules.round_duration_ms;
                    0
                }
            };
            slot.score += points;
            scores.push(RoundScore {
                user: *user,
                points,
                total: slot.score,
            });
        }

        self.status = RoomStatus::Scoring;
        self.round_deadline_ms = None;
        self.version += 1;
        Ok(scores)
    }

    /// Leave the scoring phase: either begin the next round or finish.
    pub fn advance(
        &mut self,
        now_ms: u64,
        round_duration_ms: u64,
    ) -> Result<RoundAdvance, TransitionError> {
        if self.status != RoomStatus::Scoring {
            return Err(TransitionError::InvalidStatus {
                status: self.status,
            });
        }
        self.version += 1;
        if self.current_round + 1 < self.total_rounds {
            self.current_round += 1;
            self.status = RoomStatus::InRound;
            let deadline_ms = now_ms + round_duration_ms;
            self.round_deadline_ms = Some(deadline_ms);
            Ok(RoundAdvance::NextRound {
                round_index: self.current_round,
                deadline_ms,
            })
        } else {
            self.status = RoomStatus::Finished;
            self.round_deadline_ms = None;
            Ok(RoundAdvance::Finished)
        }
    }

    /// Flip a player's connection flag.
    ///
    /// Returns `Ok(false)` without bumping the version when the flag already
    /// holds the requested value.
    pub fn set_connected(
        &mut self,
        user: Uuid,
        connected: bool,
    ) -> Result<bool, TransitionError> {
        if matches!(self.status, RoomStatus::Finished | RoomStatus::Cancelled) {
            return Err(TransitionError::InvalidStatus {
                status: self.status,
            });
        }
        let slot = self
            .players
            .get_mut(&user)
            .ok_or(TransitionError::UnknownPlayer { user })?;
        if slot.connected == connected {
            return Ok(false);
        }
        slot.connected = connected;
        self.version += 1;
        Ok(true)
    }

    /// Abandon the room: `Lobby | InRound → Cancelled`.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.status, RoomStatus::Lobby | RoomStatus::InRound) {
            return Err(TransitionError::InvalidStatus {
                status: self.status,
            });
        }
        self.status = RoomStatus::Cancelled;
        self.round_deadline_ms = None;
        self.version += 1;
        Ok(())
    }

    /// Final ranking: score descending, then lower cumulative answer time,
    /// then join order (the sort is stable over the insertion-ordered roster).
    pub fn final_ranking(&self) -> Vec<RankedPlayer> {
        let mut ranking: Vec<RankedPlayer> = self
            .players
            .iter()
            .map(|(user, slot)| RankedPlayer {
                user: *user,
                display_name: slot.display_name.clone(),
                score: slot.score,
                total_answer_ms: slot.total_answer_ms,
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.total_answer_ms.cmp(&b.total_answer_ms))
        });
        ranking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND_MS: u64 = 30_000;

    fn rules() -> ScoringRules {
        ScoringRules {
            base_points: 100,
            max_speed_bonus: 100,
            round_duration_ms: ROUND_MS,
        }
    }

    fn two_player_room() -> (GameRoom, Uuid, Uuid) {
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let mut room = GameRoom::new(host, "Ada".into(), "friday quiz".into(), 2);
        room.add_player(guest, "Grace".into(), 4).unwrap();
        (room, host, guest)
    }

    #[test]
    fn new_room_starts_in_lobby_at_version_one() {
        let host = Uuid::new_v4();
        let room = GameRoom::new(host, "Ada".into(), "quiz".into(), 3);
        assert_eq!(room.status, RoomStatus::Lobby);
        assert_eq!(room.version, 1);
        assert_eq!(room.players.len(), 1);
        assert!(room.players.contains_key(&host));
    }

    #[test]
    fn every_successful_mutation_bumps_version_by_one() {
        let (mut room, host, guest) = two_player_room();
        let mut expected = room.version;

        room.start(0, ROUND_MS).unwrap();
        expected += 1;
        assert_eq!(room.version, expected);

        room.record_answer(host, true, 5_000, ROUND_MS).unwrap();
        expected += 1;
        assert_eq!(room.version, expected);

        room.record_answer(guest, false, 6_000, ROUND_MS).unwrap();
        expected += 1;
        assert_eq!(room.version, expected);

        room.end_round(0, rules()).unwrap();
        expected += 1;
        assert_eq!(room.version, expected);

        room.advance(40_000, ROUND_MS).unwrap();
        expected += 1;
        assert_eq!(room.version, expected);
    }

    #[test]
    fn idempotent_join_does_not_bump_version() {
        let (mut room, _, guest) = two_player_room();
        let before = room.version;
        assert!(!room.add_player(guest, "Grace".into(), 4).unwrap());
        assert_eq!(room.version, before);
    }

    #[test]
    fn join_rejected_when_full_or_started() {
        let (mut room, _, _) = two_player_room();
        let err = room
            .add_player(Uuid::new_v4(), "Alan".into(), 2)
            .unwrap_err();
        assert_eq!(err, TransitionError::CapacityExceeded { capacity: 2 });

        room.start(0, ROUND_MS).unwrap();
        let err = room
            .add_player(Uuid::new_v4(), "Alan".into(), 8)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidStatus {
                status: RoomStatus::InRound
            }
        );
    }

    #[test]
    fn start_requires_two_connected_players() {
        let host = Uuid::new_v4();
        let mut room = GameRoom::new(host, "Ada".into(), "quiz".into(), 3);
        let err = room.start(0, ROUND_MS).unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotEnoughPlayers {
                min: 2,
                connected: 1
            }
        );

        let guest = Uuid::new_v4();
        room.add_player(guest, "Grace".into(), 4).unwrap();
        room.set_connected(guest, false).unwrap();
        let err = room.start(0, ROUND_MS).unwrap_err();
        assert!(matches!(err, TransitionError::NotEnoughPlayers { .. }));

        room.set_connected(guest, true).unwrap();
        room.start(0, ROUND_MS).unwrap();
        assert_eq!(room.status, RoomStatus::InRound);
        assert_eq!(room.round_deadline_ms, Some(ROUND_MS));
    }

    #[test]
    fn faster_correct_answer_scores_higher() {
        let fast = ScoringRules::score(
            &rules(),
            &RoundAnswer {
                correct: true,
                elapsed_ms: 5_000,
            },
        );
        let slow = ScoringRules::score(
            &rules(),
            &RoundAnswer {
                correct: true,
                elapsed_ms: 25_000,
            },
        );
        assert!(fast > slow);
        // Linear curve: 100 base + floor(100 * remaining / duration).
        assert_eq!(fast, 100 + 83);
        assert_eq!(slow, 100 + 16);
    }

    #[test]
    fn wrong_or_missing_answer_scores_zero() {
        let (mut room, host, guest) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        room.record_answer(host, false, 2_000, ROUND_MS).unwrap();
        // Guest never answers.
        let scores = room.end_round(0, rules()).unwrap();
        assert!(scores.iter().all(|s| s.points == 0));
        assert_eq!(room.status, RoomStatus::Scoring);
        // Unanswered rounds count as the full window for the tie-break.
        assert_eq!(room.players[&guest].total_answer_ms, ROUND_MS);
    }

    #[test]
    fn answer_elapsed_is_clamped_to_the_round_window() {
        let (mut room, host, _) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        // Submitted after the deadline: clamp, do not overflow.
        room.record_answer(host, true, ROUND_MS + 10_000, ROUND_MS)
            .unwrap();
        let answer = room.players[&host].round_answer.unwrap();
        assert_eq!(answer.elapsed_ms, ROUND_MS);
    }

    #[test]
    fn early_completion_ignores_disconnected_players() {
        let (mut room, host, guest) = two_player_room();
        let third = Uuid::new_v4();
        room.add_player(third, "Alan".into(), 4).unwrap();
        room.start(0, ROUND_MS).unwrap();
        room.set_connected(third, false).unwrap();

        assert!(!room.record_answer(host, true, 1_000, ROUND_MS).unwrap());
        assert!(room.record_answer(guest, true, 2_000, ROUND_MS).unwrap());
    }

    #[test]
    fn double_answer_is_rejected() {
        let (mut room, host, _) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        room.record_answer(host, true, 1_000, ROUND_MS).unwrap();
        let err = room.record_answer(host, true, 2_000, ROUND_MS).unwrap_err();
        assert_eq!(err, TransitionError::AlreadyAnswered { user: host });
    }

    #[test]
    fn stale_round_trigger_is_rejected() {
        let (mut room, host, guest) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        room.record_answer(host, true, 1_000, ROUND_MS).unwrap();
        room.record_answer(guest, true, 2_000, ROUND_MS).unwrap();
        room.end_round(0, rules()).unwrap();
        room.advance(40_000, ROUND_MS).unwrap();

        // A late fire for round 0 must not score round 1.
        let err = room.end_round(0, rules()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::StaleRound {
                round: 0,
                current: 1
            }
        );
    }

    #[test]
    fn ending_the_same_round_twice_fails_the_second_time() {
        let (mut room, _, _) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        room.end_round(0, rules()).unwrap();
        let err = room.end_round(0, rules()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidStatus {
                status: RoomStatus::Scoring
            }
        );
    }

    #[test]
    fn advance_walks_rounds_then_finishes() {
        let (mut room, _, _) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        room.end_round(0, rules()).unwrap();
        assert_eq!(
            room.advance(60_000, ROUND_MS).unwrap(),
            RoundAdvance::NextRound {
                round_index: 1,
                deadline_ms: 90_000
            }
        );
        room.end_round(1, rules()).unwrap();
        assert_eq!(room.advance(95_000, ROUND_MS).unwrap(), RoundAdvance::Finished);
        assert_eq!(room.status, RoomStatus::Finished);
        assert_eq!(room.round_deadline_ms, None);

        let err = room.advance(96_000, ROUND_MS).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidStatus {
                status: RoomStatus::Finished
            }
        );
    }

    #[test]
    fn ranking_breaks_ties_by_answer_time_then_join_order() {
        let (mut room, host, guest) = two_player_room();
        let third = Uuid::new_v4();
        room.add_player(third, "Alan".into(), 4).unwrap();
        room.start(0, ROUND_MS).unwrap();
        room.record_answer(host, true, 10_000, ROUND_MS).unwrap();
        room.record_answer(guest, true, 10_000, ROUND_MS).unwrap();
        room.record_answer(third, true, 4_000, ROUND_MS).unwrap();
        room.end_round(0, rules()).unwrap();
        room.advance(40_000, ROUND_MS).unwrap();

        let ranking = room.final_ranking();
        // Third answered fastest and wins outright; host and guest tie on
        // score and time, so join order decides.
        assert_eq!(ranking[0].user, third);
        assert_eq!(ranking[1].user, host);
        assert_eq!(ranking[2].user, guest);
    }

    #[test]
    fn cancel_only_from_lobby_or_in_round() {
        let (mut room, _, _) = two_player_room();
        room.cancel().unwrap();
        assert_eq!(room.status, RoomStatus::Cancelled);

        let (mut room, _, _) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        room.end_round(0, rules()).unwrap();
        let err = room.cancel().unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidStatus {
                status: RoomStatus::Scoring
            }
        );
    }

    #[test]
    fn disconnected_players_keep_their_scores() {
        let (mut room, host, guest) = two_player_room();
        room.start(0, ROUND_MS).unwrap();
        room.record_answer(guest, true, 3_000, ROUND_MS).unwrap();
        room.record_answer(host, true, 9_000, ROUND_MS).unwrap();
        room.end_round(0, rules()).unwrap();
        room.set_connected(guest, false).unwrap();
        assert!(room.players[&guest].score > 0);
        assert!(!room.all_disconnected());
        room.set_connected(host, false).unwrap();
        assert!(room.all_disconnected());
    }
}
