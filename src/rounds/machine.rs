//! Applies votes, block ends and events to the active round.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::decisions::{end_block, BlockOutcome};
use super::{check_post_conditions, transition, INITIAL_ROUND};
use crate::consensus::collector::{ThresholdCollector, VoteOutcome};
use crate::consensus::store::{DataLog, SynchronizedData};
use crate::types::{Event, ParticipantId, Payload, RoundId, SwappingError};

/// One taken transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub period: u64,
    pub from: RoundId,
    pub event: Event,
    pub to: RoundId,
    pub at: DateTime<Utc>,
}

/// The active round, its vote collector and the data log of the period.
#[derive(Debug)]
pub struct RoundStateMachine {
    round: RoundId,
    round_seq: u64,
    height: u64,
    quorum: usize,
    log: DataLog,
    collector: ThresholdCollector,
    history: Vec<TransitionRecord>,
    last_event: Option<Event>,
}

impl RoundStateMachine {
    pub fn new(data: SynchronizedData, quorum: usize) -> Self {
        let collector =
            ThresholdCollector::new(INITIAL_ROUND, data.participants().clone(), quorum);
        Self {
            round: INITIAL_ROUND,
            round_seq: 0,
            height: 0,
            quorum,
            log: DataLog::new(data),
            collector,
            history: Vec::new(),
            last_event: None,
        }
    }

    pub fn round(&self) -> RoundId {
        self.round
    }

    /// Monotonic id of the active round instance; bumps on every
    /// transition, self-loops included.
    pub fn round_seq(&self) -> u64 {
        self.round_seq
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn data(&self) -> &SynchronizedData {
        self.log.latest()
    }

    pub fn log(&self) -> &DataLog {
        &self.log
    }

    pub fn collector(&self) -> &ThresholdCollector {
        &self.collector
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn last_event(&self) -> Option<Event> {
        self.last_event
    }

    pub fn is_finished(&self) -> bool {
        self.round.is_final()
    }

    pub fn process_payload(&mut self, sender: &ParticipantId, payload: Payload) -> VoteOutcome {
        if self.is_finished() {
            warn!(round = %self.round, sender = %sender, "Vote after period end ignored");
            return VoteOutcome::WrongRound;
        }
        self.collector.cast(sender, payload)
    }

    /// Evaluate the vote log. Returns the fired event, or `None` while the
    /// round is still collecting.
    pub fn end_block(&mut self) -> Result<Option<Event>, SwappingError> {
        if self.is_finished() {
            return Ok(None);
        }
        self.height += 1;

        match end_block(self.round, self.log.latest(), &self.collector)? {
            BlockOutcome::Pending => Ok(None),
            BlockOutcome::NoMajority => {
                warn!(round = %self.round, "No majority possible, retrying round");
                self.process_event(Event::NoMajority)?;
                Ok(Some(Event::NoMajority))
            }
            BlockOutcome::Decided { data, event } => {
                let next = transition(self.round, event)?;
                check_post_conditions(next, &data)?;
                self.log.push(data);
                self.advance(event, next);
                Ok(Some(event))
            }
        }
    }

    /// Fire an event that carries no new data (timeouts and no-majority).
    pub fn process_event(&mut self, event: Event) -> Result<RoundId, SwappingError> {
        let next = transition(self.round, event)?;
        check_post_conditions(next, self.log.latest())?;
        self.advance(event, next);
        Ok(next)
    }

    fn advance(&mut self, event: Event, next: RoundId) {
        let record = TransitionRecord {
            period: self.log.latest().period(),
            from: self.round,
            event,
            to: next,
            at: Utc::now(),
        };
        info!(
            period = record.period,
            from = %record.from,
            event = %event,
            to = %next,
            "Round transition"
        );
        self.history.push(record);

        self.round = next;
        self.round_seq += 1;
        self.last_event = Some(event);
        self.collector =
            ThresholdCollector::new(next, self.log.latest().participants().clone(), self.quorum);
    }

    /// Open the next period from the cross-period keys of the current data.
    pub fn start_next_period(&mut self) -> Result<(), SwappingError> {
        if !self.is_finished() {
            return Err(SwappingError::Consensus(format!(
                "cannot start a new period from non-final round {}",
                self.round
            )));
        }
        let next = self.log.latest().next_period();
        debug!(period = next.period(), "Starting period");
        self.log.reset(next);
        self.round = INITIAL_ROUND;
        self.round_seq += 1;
        self.last_event = None;
        self.collector =
            ThresholdCollector::new(INITIAL_ROUND, self.log.latest().participants().clone(), self.quorum);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
