//! In-process block delivery shared by every local replica.
//!
//! `LocalNetwork` owns the single [`RoundStateMachine`] all replicas vote
//! into, so every replica observes the same vote set and the same decided
//! data. Round changes are broadcast over a `watch` channel; the round
//! timeout is enforced by whichever waiter notices it first. A round's
//! deadline is fixed by the first wait on it, and every later wait on the
//! same round shares that deadline.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::collector::VoteOutcome;
use super::store::SynchronizedData;
use crate::rounds::machine::{RoundStateMachine, TransitionRecord};
use crate::types::{Event, ParticipantId, Payload, RoundId, SwappingError};

/// Seconds between blocks.
pub const BLOCK_INTERVAL_SECS: i64 = 1;

/// What a replica sees of the active round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundView {
    pub round: RoundId,
    pub round_seq: u64,
    pub period: u64,
    pub height: u64,
    /// Consensus timestamp of the block the round started in.
    pub timestamp: i64,
    pub data: SynchronizedData,
    pub last_event: Option<Event>,
}

/// The consensus-submission interface behaviours and the scheduler use.
#[async_trait]
pub trait ConsensusClient: Send + Sync {
    fn current_view(&self) -> RoundView;

    /// Cast `payload` into the round instance `round_seq`.
    async fn cast_vote(
        &self,
        sender: &ParticipantId,
        round_seq: u64,
        payload: Payload,
    ) -> Result<VoteOutcome, SwappingError>;

    /// Wait until round instance `round_seq` ends, by decision, no-majority
    /// or timeout, and return the view that replaced it.
    async fn await_round_decision(&self, round_seq: u64) -> Result<RoundView, SwappingError>;

    /// Open period `period + 1` once `period` has reached a final round.
    /// Idempotent: later callers get the already-opened period.
    async fn start_next_period(&self, period: u64) -> Result<RoundView, SwappingError>;
}

pub struct LocalNetwork {
    machine: Mutex<RoundStateMachine>,
    views: watch::Sender<RoundView>,
    genesis_timestamp: i64,
    round_timeout: Duration,
    /// `(round_seq, deadline)` of the round currently being waited on.
    deadline: Mutex<Option<(u64, Instant)>>,
}

impl LocalNetwork {
    pub fn new(data: SynchronizedData, quorum: usize, round_timeout: Duration) -> Self {
        Self::with_genesis(data, quorum, round_timeout, chrono::Utc::now().timestamp())
    }

    /// Network whose first block carries `genesis_timestamp`.
    pub fn with_genesis(
        data: SynchronizedData,
        quorum: usize,
        round_timeout: Duration,
        genesis_timestamp: i64,
    ) -> Self {
        let machine = RoundStateMachine::new(data, quorum);
        let (views, _) = watch::channel(view_of(&machine, genesis_timestamp));
        Self {
            machine: Mutex::new(machine),
            views,
            genesis_timestamp,
            round_timeout,
            deadline: Mutex::new(None),
        }
    }

    pub fn round_timeout(&self) -> Duration {
        self.round_timeout
    }

    pub async fn history(&self) -> Vec<TransitionRecord> {
        self.machine.lock().await.history().to_vec()
    }

    pub async fn data(&self) -> SynchronizedData {
        self.machine.lock().await.data().clone()
    }

    /// Deadline of round instance `round_seq`, anchored on first request.
    async fn deadline_for(&self, round_seq: u64) -> Instant {
        let mut deadline = self.deadline.lock().await;
        match *deadline {
            Some((seq, at)) if seq == round_seq => at,
            _ if self.views.borrow().round_seq == round_seq => {
                let at = Instant::now() + self.round_timeout;
                *deadline = Some((round_seq, at));
                at
            }
            // Ended already, the wait below returns at once
            _ => Instant::now() + self.round_timeout,
        }
    }

    fn publish(&self, machine: &RoundStateMachine) {
        self.views.send_replace(view_of(machine, self.genesis_timestamp));
    }

    /// Fire `round_timeout` for `round_seq` unless that round already ended.
    async fn fire_timeout(&self, round_seq: u64) -> Result<RoundView, SwappingError> {
        let mut machine = self.machine.lock().await;
        if machine.round_seq() == round_seq && !machine.is_finished() {
            warn!(round = %machine.round(), round_seq, "Round timed out");
            machine.process_event(Event::RoundTimeout)?;
            self.publish(&machine);
        }
        Ok(view_of(&machine, self.genesis_timestamp))
    }
}

fn view_of(machine: &RoundStateMachine, genesis_timestamp: i64) -> RoundView {
    let height = machine.height();
    RoundView {
        round: machine.round(),
        round_seq: machine.round_seq(),
        period: machine.data().period(),
        height,
        timestamp: genesis_timestamp + height as i64 * BLOCK_INTERVAL_SECS,
        data: machine.data().clone(),
        last_event: machine.last_event(),
    }
}

#[async_trait]
impl ConsensusClient for LocalNetwork {
    fn current_view(&self) -> RoundView {
        self.views.borrow().clone()
    }

    async fn cast_vote(
        &self,
        sender: &ParticipantId,
        round_seq: u64,
        payload: Payload,
    ) -> Result<VoteOutcome, SwappingError> {
        let mut machine = self.machine.lock().await;
        if machine.round_seq() != round_seq {
            debug!(sender = %sender, round_seq, current = machine.round_seq(), "Stale vote dropped");
            return Ok(VoteOutcome::Stale);
        }

        let outcome = machine.process_payload(sender, payload);
        if outcome != VoteOutcome::Accepted {
            return Ok(outcome);
        }

        match machine.end_block() {
            Ok(Some(_)) => {
                self.publish(&machine);
                Ok(outcome)
            }
            Ok(None) => Ok(outcome),
            Err(e) => {
                error!(round = %machine.round(), error = %e, "Round decision rejected");
                Err(e)
            }
        }
    }

    async fn await_round_decision(&self, round_seq: u64) -> Result<RoundView, SwappingError> {
        let deadline = self.deadline_for(round_seq).await;
        let mut rx = self.views.subscribe();
        let waited = tokio::time::timeout_at(deadline, async {
            rx.wait_for(|view| view.round_seq != round_seq)
                .await
                .map(|view| view.clone())
        })
        .await;

        match waited {
            Ok(Ok(view)) => Ok(view),
            Ok(Err(_)) => Err(SwappingError::Consensus("view channel closed".to_string())),
            Err(_) => self.fire_timeout(round_seq).await,
        }
    }

    async fn start_next_period(&self, period: u64) -> Result<RoundView, SwappingError> {
        let mut machine = self.machine.lock().await;
        if machine.data().period() == period && machine.is_finished() {
            machine.start_next_period()?;
            self.publish(&machine);
        }
        Ok(view_of(&machine, self.genesis_timestamp))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn network(timeout: Duration) -> LocalNetwork {
        let participants: BTreeSet<ParticipantId> =
            ["a", "b", "c", "d"].into_iter().map(ParticipantId::from).collect();
        LocalNetwork::with_genesis(
            SynchronizedData::new(participants, Address::zero()),
            3,
            timeout,
            1_700_000_000,
        )
    }

    fn strategy(text: &str) -> Payload {
        Payload::StrategyEvaluation {
            strategy: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_stale_vote_dropped() {
        let net = network(Duration::from_secs(5));
        let outcome = net
            .cast_vote(&ParticipantId::from("a"), 7, strategy("x"))
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Stale);
    }

    #[tokio::test]
    async fn test_decision_wakes_waiters() {
        let net = Arc::new(network(Duration::from_secs(30)));
        let waiter = {
            let net = net.clone();
            tokio::spawn(async move { net.await_round_decision(0).await })
        };

        for voter in ["a", "b", "c", "d"] {
            net.cast_vote(&ParticipantId::from(voter), 0, strategy("x"))
                .await
                .unwrap();
        }

        let view = waiter.await.unwrap().unwrap();
        // "x" is not a valid plan, so the period ends
        assert_eq!(view.round, RoundId::FinishedStrategyEvaluation);
        assert_eq!(view.last_event, Some(Event::Done));
        assert_eq!(view.round_seq, 1);
        assert_eq!(view.timestamp, 1_700_000_000 + view.height as i64);
    }

    #[tokio::test]
    async fn test_timeout_fires_once_per_round() {
        let net = Arc::new(network(Duration::from_millis(50)));
        let first = {
            let net = net.clone();
            tokio::spawn(async move { net.await_round_decision(0).await })
        };
        let second = {
            let net = net.clone();
            tokio::spawn(async move { net.await_round_decision(0).await })
        };

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a.round, RoundId::StrategyEvaluation);
        assert_eq!(a.round_seq, 1);
        assert_eq!(b.round_seq, 1);
        assert_eq!(a.last_event, Some(Event::RoundTimeout));
        assert_eq!(net.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_waits_share_one_deadline() {
        let net = network(Duration::from_millis(200));
        let started = Instant::now();

        // A wait abandoned midway must not push the deadline back
        let abandoned =
            tokio::time::timeout(Duration::from_millis(120), net.await_round_decision(0)).await;
        assert!(abandoned.is_err());

        let view = net.await_round_decision(0).await.unwrap();
        assert_eq!(view.last_event, Some(Event::RoundTimeout));
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_next_round_gets_fresh_deadline() {
        let net = network(Duration::from_millis(100));
        let first = net.await_round_decision(0).await.unwrap();
        assert_eq!(first.round_seq, 1);

        let started = Instant::now();
        let second = net.await_round_decision(1).await.unwrap();
        assert_eq!(second.round_seq, 2);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_start_next_period_is_idempotent() {
        let net = network(Duration::from_secs(30));
        for voter in ["a", "b", "c"] {
            net.cast_vote(&ParticipantId::from(voter), 0, strategy("x"))
                .await
                .unwrap();
        }
        let first = net.start_next_period(0).await.unwrap();
        let second = net.start_next_period(0).await.unwrap();
        assert_eq!(first.period, 1);
        assert_eq!(first.round, RoundId::StrategyEvaluation);
        assert_eq!(first.round_seq, second.round_seq);
        assert_eq!(net.current_view().period, 1);
    }

    #[tokio::test]
    async fn test_start_next_period_before_finish_is_noop() {
        let net = network(Duration::from_secs(30));
        let view = net.start_next_period(0).await.unwrap();
        assert_eq!(view.period, 0);
        assert_eq!(view.round_seq, 0);
    }
}
