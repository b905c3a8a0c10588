//! Match score confirmation.
//!
//! Both players of a match submit their score independently. Once both
//! submissions have been reconciled with the remote store, the match is either
//! `confirmed` (the scores agree within tolerance) or `disputed`. Closing the
//! round completes the match no matter where it stood.
//!
//! ```text
//!            first score          second score, agrees
//! pending ───────────────► partial ─────────────────────► confirmed ──┐
//!                             │                                       │
//!                             │ second score, disagrees               │ round
//!                             └────────────────────────► disputed ────┤ closed
//!                                                            │        ▼
//!                                     override (external) ───┘    completed
//! ```
//!
//! The machine only ever sees server-acknowledged data. It is pure: events go
//! in, transitions come out, and the caller persists the result.

use crate::{EntityId, EntitySnapshot, Error, Result, Revision, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Entity type of matches.
pub const MATCH_ENTITY: &str = "match";

/// Entity type of per-player score submissions.
pub const SCORE_SUBMISSION_ENTITY: &str = "score_submission";

/// Entity id of a player's submission for a match.
pub fn submission_id(match_id: &str, player_id: &str) -> EntityId {
    format!("{match_id}:{player_id}")
}

/// A player's reported score components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub objective_points: i64,
    pub victory_points: i64,
    pub army_points: i64,
}

impl Score {
    pub fn new(objective_points: i64, victory_points: i64, army_points: i64) -> Self {
        Self {
            objective_points,
            victory_points,
            army_points,
        }
    }

    /// Reject negative components.
    pub fn validate(&self) -> Result<()> {
        if self.objective_points < 0 || self.victory_points < 0 || self.army_points < 0 {
            return Err(Error::InvalidPayload(
                "score components must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Allowed absolute difference per score component for two submissions to
/// agree. The default is exact equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTolerance {
    pub objective_points: u64,
    pub victory_points: u64,
    pub army_points: u64,
}

impl ScoreTolerance {
    /// Exact equality on every component.
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn new(objective_points: u64, victory_points: u64, army_points: u64) -> Self {
        Self {
            objective_points,
            victory_points,
            army_points,
        }
    }

    /// Whether two scores agree.
    pub fn agrees(&self, a: &Score, b: &Score) -> bool {
        a.objective_points.abs_diff(b.objective_points) <= self.objective_points
            && a.victory_points.abs_diff(b.victory_points) <= self.victory_points
            && a.army_points.abs_diff(b.army_points) <= self.army_points
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionPayload {
    match_id: EntityId,
    player_id: UserId,
    #[serde(flatten)]
    score: Score,
}

/// A reconciled score submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSubmission {
    pub match_id: EntityId,
    pub player_id: UserId,
    pub score: Score,
    /// Server revision of the submission entity
    pub revision: Revision,
}

impl ScoreSubmission {
    /// Build the payload of a submission entity.
    pub fn payload(match_id: &str, player_id: &str, score: &Score) -> serde_json::Value {
        serde_json::json!({
            "matchId": match_id,
            "playerId": player_id,
            "objectivePoints": score.objective_points,
            "victoryPoints": score.victory_points,
            "armyPoints": score.army_points,
        })
    }

    /// Decode and validate a submission payload stored under `entity_id`.
    pub fn parse(entity_id: &str, payload: &serde_json::Value, revision: Revision) -> Result<Self> {
        let decoded: SubmissionPayload = serde_json::from_value(payload.clone())
            .map_err(|e| Error::InvalidPayload(format!("score submission: {e}")))?;
        decoded.score.validate()?;
        if entity_id != submission_id(&decoded.match_id, &decoded.player_id) {
            return Err(Error::InvalidPayload(format!(
                "submission id '{entity_id}' does not match {}:{}",
                decoded.match_id, decoded.player_id
            )));
        }
        Ok(Self {
            match_id: decoded.match_id,
            player_id: decoded.player_id,
            score: decoded.score,
            revision,
        })
    }

    /// Decode a submission from a reconciled snapshot.
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Result<Self> {
        Self::parse(&snapshot.entity_id, &snapshot.payload, snapshot.revision)
    }
}

/// The fields of a match relevant to confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    #[serde(skip)]
    pub match_id: EntityId,
    #[serde(default)]
    pub player_one: Option<UserId>,
    #[serde(default)]
    pub player_two: Option<UserId>,
    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default)]
    pub round_closed: bool,
    #[serde(default)]
    pub confirmation_override: Option<ConfirmationStatus>,
}

impl MatchRecord {
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Result<Self> {
        let mut record: MatchRecord = serde_json::from_value(snapshot.payload.clone())
            .map_err(|e| Error::InvalidPayload(format!("match: {e}")))?;
        record.match_id = snapshot.entity_id.clone();
        Ok(record)
    }

    /// Both players, when the match has them.
    pub fn players(&self) -> Option<[UserId; 2]> {
        match (&self.player_one, &self.player_two) {
            (Some(one), Some(two)) => Some([one.clone(), two.clone()]),
            _ => None,
        }
    }
}

/// Adjudicated state of a match result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    #[default]
    Pending,
    Partial,
    Confirmed,
    Disputed,
    Completed,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Partial => "partial",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Disputed => "disputed",
            ConfirmationStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == ConfirmationStatus::Completed
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfirmationStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConfirmationStatus::Pending),
            "partial" => Ok(ConfirmationStatus::Partial),
            "confirmed" => Ok(ConfirmationStatus::Confirmed),
            "disputed" => Ok(ConfirmationStatus::Disputed),
            "completed" => Ok(ConfirmationStatus::Completed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationEvent {
    /// A submission was acknowledged by or pulled from the remote store
    ScoreSynced(ScoreSubmission),
    /// The round was closed administratively
    RoundClosed,
    /// An administrator set the status after manual review
    Override(ConfirmationStatus),
}

/// A status change that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConfirmationStatus,
    pub to: ConfirmationStatus,
}

/// Confirmation state of one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConfirmation {
    pub match_id: EntityId,
    pub status: ConfirmationStatus,
    /// Latest synced submission per player
    pub submissions: BTreeMap<UserId, ScoreSubmission>,
    /// Players of the match, once the match record has been seen
    #[serde(default)]
    pub players: Option<[UserId; 2]>,
    /// Newest match revision processed
    #[serde(default)]
    pub observed_match_revision: Option<Revision>,
    /// Last override value acted on
    #[serde(default)]
    pub applied_override: Option<ConfirmationStatus>,
}

impl MatchConfirmation {
    pub fn new(match_id: impl Into<EntityId>) -> Self {
        Self {
            match_id: match_id.into(),
            status: ConfirmationStatus::Pending,
            submissions: BTreeMap::new(),
            players: None,
            observed_match_revision: None,
            applied_override: None,
        }
    }

    /// Both submissions, when the match is disputed.
    pub fn disputed_submissions(&self) -> Option<(&ScoreSubmission, &ScoreSubmission)> {
        if self.status != ConfirmationStatus::Disputed {
            return None;
        }
        let mut iter = self.submissions.values();
        match (iter.next(), iter.next()) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Feed one event into the machine.
    pub fn apply(
        &mut self,
        event: ConfirmationEvent,
        tolerance: &ScoreTolerance,
    ) -> Result<Option<Transition>> {
        match event {
            ConfirmationEvent::ScoreSynced(submission) => self.record_score(submission, tolerance),
            ConfirmationEvent::RoundClosed => Ok(self.transition(ConfirmationStatus::Completed)),
            ConfirmationEvent::Override(status) => self.override_status(status),
        }
    }

    /// Process a reconciled match snapshot. Each revision is processed once.
    pub fn observe_match(
        &mut self,
        record: &MatchRecord,
        revision: Revision,
        tolerance: &ScoreTolerance,
    ) -> Result<Option<Transition>> {
        if self.observed_match_revision.is_some_and(|seen| seen >= revision) {
            return Ok(None);
        }
        self.observed_match_revision = Some(revision);
        if let Some(players) = record.players() {
            self.players = Some(players);
        }

        if record.round_closed {
            return self.apply(ConfirmationEvent::RoundClosed, tolerance);
        }
        match record.confirmation_override {
            Some(status) if self.applied_override != Some(status) => {
                self.applied_override = Some(status);
                self.apply(ConfirmationEvent::Override(status), tolerance)
            }
            _ => Ok(None),
        }
    }

    fn record_score(
        &mut self,
        submission: ScoreSubmission,
        tolerance: &ScoreTolerance,
    ) -> Result<Option<Transition>> {
        if submission.match_id != self.match_id {
            return Err(Error::InvalidPayload(format!(
                "submission for match {} fed to match {}",
                submission.match_id, self.match_id
            )));
        }
        self.check_player(&submission.player_id)?;

        if self.status.is_terminal() {
            return Ok(None);
        }
        if let Some(existing) = self.submissions.get(&submission.player_id) {
            if existing.revision >= submission.revision {
                return Ok(None);
            }
        }
        self.submissions
            .insert(submission.player_id.clone(), submission);

        // Confirmed and disputed only move by override or round close
        match self.status {
            ConfirmationStatus::Pending | ConfirmationStatus::Partial => {
                let derived = self.derive(tolerance);
                Ok(self.transition(derived))
            }
            _ => Ok(None),
        }
    }

    fn check_player(&self, player_id: &str) -> Result<()> {
        let known = match &self.players {
            Some(players) => players.iter().any(|p| p == player_id),
            None => self.submissions.contains_key(player_id) || self.submissions.len() < 2,
        };
        if known {
            Ok(())
        } else {
            Err(Error::UnknownPlayer {
                match_id: self.match_id.clone(),
                player_id: player_id.to_string(),
            })
        }
    }

    fn derive(&self, tolerance: &ScoreTolerance) -> ConfirmationStatus {
        let mut scores = self.submissions.values().map(|s| &s.score);
        match (scores.next(), scores.next()) {
            (None, _) => ConfirmationStatus::Pending,
            (Some(_), None) => ConfirmationStatus::Partial,
            (Some(a), Some(b)) if tolerance.agrees(a, b) => ConfirmationStatus::Confirmed,
            (Some(_), Some(_)) => ConfirmationStatus::Disputed,
        }
    }

    fn override_status(&mut self, status: ConfirmationStatus) -> Result<Option<Transition>> {
        if self.status.is_terminal() {
            return Err(Error::IllegalTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        if status == ConfirmationStatus::Pending {
            self.submissions.clear();
        }
        Ok(self.transition(status))
    }

    fn transition(&mut self, to: ConfirmationStatus) -> Option<Transition> {
        if self.status == to {
            return None;
        }
        let from = self.status;
        self.status = to;
        Some(Transition { from, to })
    }
}
