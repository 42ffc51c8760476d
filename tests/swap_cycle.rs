//! Full swapping cycles through the replica set.

mod common;

use common::*;
use ethers::types::{H256, U256};
use std::time::Duration;

use swapping_agent::consensus::network::ConsensusClient;
use swapping_agent::consensus::store::keys;
use swapping_agent::tx::SettlementPayload;
use swapping_agent::types::{Event, Operation, RoundId, StrategyAction, StrategyPlan};

#[tokio::test]
async fn test_single_replica_enters_and_prepares_swap() {
    let cfg = config(&["solo"]);
    let net = network(&cfg, Duration::from_secs(5));
    let chain = profitable_chain();
    let mut schedulers = replicas(&cfg, &net, &[chain.clone()]);

    let report = run_period(&mut schedulers).await.remove(0).unwrap();
    assert_eq!(report.final_round, RoundId::FinishedTxPreparation);

    let data = &report.data;
    assert_eq!(data.amounts().unwrap(), amounts(&[500, 10, 10, 1_100]));
    assert_eq!(data.tx_submitter(), Some("tx_preparation"));

    let plan = StrategyPlan::from_canonical(data.most_voted_strategy().unwrap()).unwrap();
    assert_eq!(plan.action, StrategyAction::Enter);
    assert_eq!(plan.token_a.amount_after_swap, Some(U256::from(10u64)));
    assert_eq!(plan.deadline, GENESIS + 300);

    let settlement = SettlementPayload::decode(data.most_voted_tx_hash().unwrap()).unwrap();
    assert_ne!(settlement.safe_tx_hash, H256::zero());
    assert_eq!(settlement.operation, Operation::DelegateCall);
    assert_eq!(settlement.to, params(&cfg).multisend_address);

    // Native balance is below the floor: approval and swap only
    assert_eq!(chain.call_count("build_deposit_tx"), 0);
    assert_eq!(chain.call_count("build_approval_tx"), 1);
    assert_eq!(chain.call_count("build_swap_tx"), 1);

    let events: Vec<Event> = net.history().await.iter().map(|r| r.event).collect();
    assert_eq!(
        events,
        vec![Event::DoneEnter, Event::Done, Event::Transact, Event::Done]
    );
}

#[tokio::test]
async fn test_replicas_agree_on_every_key() {
    let cfg = config(&["a", "b", "c", "d"]);
    let net = network(&cfg, Duration::from_secs(5));
    let chains: Vec<MockChain> = (0..4).map(|_| profitable_chain()).collect();
    let mut schedulers = replicas(&cfg, &net, &chains);

    let reports: Vec<_> = run_period(&mut schedulers)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    for report in &reports {
        assert_eq!(report.final_round, RoundId::FinishedTxPreparation);
        assert_eq!(report.data, reports[0].data);
    }

    let data = net.data().await;
    let votes = data.collection(keys::PARTICIPANT_TO_TX_ROUND).unwrap();
    assert!(votes.len() >= cfg.quorum());
    let first = votes.values().next().unwrap();
    assert!(votes.values().all(|v| v == first));
}

#[tokio::test]
async fn test_wrap_leg_precedes_approval_when_native_above_floor() {
    let cfg = config(&["solo"]);
    let net = network(&cfg, Duration::from_secs(5));
    let chain = profitable_chain();
    chain.set_native_balance(U256::from(10u64) * U256::exp10(18));
    let mut schedulers = replicas(&cfg, &net, &[chain.clone()]);

    let report = run_period(&mut schedulers).await.remove(0).unwrap();
    assert_eq!(report.final_round, RoundId::FinishedTxPreparation);

    let built: Vec<String> = chain
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("build_"))
        .collect();
    assert_eq!(built, vec!["build_deposit_tx", "build_approval_tx", "build_swap_tx"]);

    let settlement = SettlementPayload::decode(report.data.most_voted_tx_hash().unwrap()).unwrap();
    // multiSend(bytes) selector
    assert_eq!(&settlement.data[..4], &[0x8d, 0x80, 0xff, 0x0a]);
}

#[tokio::test]
async fn test_second_period_swaps_back() {
    let cfg = config(&["solo"]);
    let net = network(&cfg, Duration::from_secs(5));
    let chain = profitable_chain();
    let mut schedulers = replicas(&cfg, &net, &[chain.clone()]);

    let first = run_period(&mut schedulers).await.remove(0).unwrap();
    assert_eq!(first.final_round, RoundId::FinishedTxPreparation);
    let view = net.start_next_period(first.period).await.unwrap();
    assert_eq!(view.period, 1);
    assert!(view.data.most_voted_tx_hash().is_none());
    assert!(view.data.most_voted_strategy().is_some());

    // The entry settled: the safe now holds the traded token
    chain.set_balance(addr(WETH), 10);
    chain.quote(1_100, &[addr(WXDAI), addr(WETH)], &[1_100, 12]);

    let second = run_period(&mut schedulers).await.remove(0).unwrap();
    assert_eq!(second.period, 1);
    assert_eq!(second.final_round, RoundId::FinishedTxPreparation);

    let plan = StrategyPlan::from_canonical(second.data.most_voted_strategy().unwrap()).unwrap();
    assert_eq!(plan.action, StrategyAction::SwapBack);
    assert_eq!(plan.token_a.amount_received, Some(U256::from(10u64)));
    assert_eq!(plan.token_base.amount_min_after_swap_back, Some(U256::from(1_100u64)));
    assert_eq!(second.data.amounts().unwrap(), amounts(&[10, 1_100, 1_100, 12]));
}

#[tokio::test]
async fn test_swap_back_before_settlement_prices_entry_direction() {
    let cfg = config(&["solo"]);
    let net = network(&cfg, Duration::from_secs(5));
    let chain = profitable_chain();
    let mut schedulers = replicas(&cfg, &net, &[chain.clone()]);

    let first = run_period(&mut schedulers).await.remove(0).unwrap();
    net.start_next_period(first.period).await.unwrap();

    // No token balance yet
    let second = run_period(&mut schedulers).await.remove(0).unwrap();
    let plan = StrategyPlan::from_canonical(second.data.most_voted_strategy().unwrap()).unwrap();
    assert_eq!(plan.action, StrategyAction::SwapBack);
    assert_eq!(plan.token_a.amount_received, None);
    assert_eq!(second.data.amounts().unwrap(), amounts(&[500, 10, 10, 1_100]));
}

#[tokio::test]
async fn test_unprofitable_round_trip_ends_at_decision() {
    let cfg = config(&["solo"]);
    let net = network(&cfg, Duration::from_secs(5));
    let chain = MockChain::new();
    chain.quote(1_000, &[addr(WXDAI), addr(WETH)], &[1_000, 10]);
    chain.quote(10, &[addr(WETH), addr(WXDAI)], &[10, 990]);
    let mut schedulers = replicas(&cfg, &net, &[chain.clone()]);

    let report = run_period(&mut schedulers).await.remove(0).unwrap();
    assert_eq!(report.final_round, RoundId::FinishedDecisionMaking);
    assert!(report.data.most_voted_tx_hash().is_none());
    assert_eq!(chain.call_count("get_safe_tx_hash"), 0);
}
