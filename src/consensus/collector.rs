//! ThresholdCollector: one vote per participant per round, and the quorum
//! queries each round's `end_block` is built on.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::types::{Event, ParticipantId, Payload, RoundId};

/// Identical votes needed out of `n` participants: `ceil((2n + 1) / 3)`.
pub fn consensus_threshold(n: usize) -> usize {
    (2 * n + 3) / 3
}

/// False iff no value can reach `quorum`, even if every participant that
/// has not voted yet joins the current leader.
pub fn is_majority_possible<T: PartialEq>(votes: &[T], total: usize, quorum: usize) -> bool {
    if votes.is_empty() {
        return true;
    }
    let largest = largest_tally(votes);
    let remaining = total.saturating_sub(votes.len());
    largest + remaining >= quorum
}

fn largest_tally<T: PartialEq>(votes: &[T]) -> usize {
    votes
        .iter()
        .map(|candidate| votes.iter().filter(|v| *v == candidate).count())
        .max()
        .unwrap_or(0)
}

/// Result of offering a vote to a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted,
    /// The participant already voted in this round.
    Duplicate,
    UnknownParticipant,
    /// The payload belongs to a different round.
    WrongRound,
    /// The vote targeted a round instance that has already ended.
    Stale,
}

/// Vote log for one round instance.
#[derive(Debug, Clone)]
pub struct ThresholdCollector {
    round: RoundId,
    participants: BTreeSet<ParticipantId>,
    quorum: usize,
    votes: BTreeMap<ParticipantId, Payload>,
}

impl ThresholdCollector {
    pub fn new(round: RoundId, participants: BTreeSet<ParticipantId>, quorum: usize) -> Self {
        Self {
            round,
            participants,
            quorum,
            votes: BTreeMap::new(),
        }
    }

    pub fn round(&self) -> RoundId {
        self.round
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn collection(&self) -> &BTreeMap<ParticipantId, Payload> {
        &self.votes
    }

    pub fn votes_received(&self) -> usize {
        self.votes.len()
    }

    /// Record one vote. Anything other than `Accepted` leaves the log as it was.
    pub fn cast(&mut self, sender: &ParticipantId, payload: Payload) -> VoteOutcome {
        if !self.participants.contains(sender) {
            warn!(round = %self.round, sender = %sender, "Vote from unknown participant ignored");
            return VoteOutcome::UnknownParticipant;
        }
        if payload.round() != self.round {
            warn!(
                round = %self.round,
                sender = %sender,
                payload_round = %payload.round(),
                "Vote for another round ignored"
            );
            return VoteOutcome::WrongRound;
        }
        if let Payload::DecisionMaking { event } = &payload {
            if !matches!(event, Event::Done | Event::Error | Event::Transact) {
                warn!(
                    round = %self.round,
                    sender = %sender,
                    event = %event,
                    "Decision vote with an event the round cannot emit ignored"
                );
                return VoteOutcome::WrongRound;
            }
        }
        if self.votes.contains_key(sender) {
            debug!(round = %self.round, sender = %sender, "Duplicate vote ignored");
            return VoteOutcome::Duplicate;
        }

        self.votes.insert(sender.clone(), payload);
        debug!(
            round = %self.round,
            sender = %sender,
            received = self.votes.len(),
            quorum = self.quorum,
            "Vote recorded"
        );
        VoteOutcome::Accepted
    }

    /// The most common payload and its tally. Ties go to the value first
    /// cast by the lowest participant id, so every replica picks the same one.
    pub fn most_voted(&self) -> Option<(&Payload, usize)> {
        let mut best: Option<(&Payload, usize)> = None;
        for candidate in self.votes.values() {
            let count = self.votes.values().filter(|v| *v == candidate).count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((candidate, count));
            }
        }
        best
    }

    pub fn is_threshold_reached(&self) -> bool {
        self.most_voted()
            .map_or(false, |(_, count)| count >= self.quorum)
    }

    /// The payload that reached quorum, if any.
    pub fn threshold_payload(&self) -> Option<&Payload> {
        self.most_voted()
            .filter(|(_, count)| *count >= self.quorum)
            .map(|(payload, _)| payload)
    }

    pub fn is_majority_possible(&self) -> bool {
        let votes: Vec<&Payload> = self.votes.values().collect();
        is_majority_possible(&votes, self.participants.len(), self.quorum)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
