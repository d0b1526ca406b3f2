//! Gas gate and bridge saga against mock chains.

mod common;

use std::time::Duration;
use tokio::time::Instant;

use common::*;
use lbtc_operator::bridge::{BridgeSaga, BridgeStatus};
use lbtc_operator::error::FlowError;
use lbtc_operator::gas::GasGate;
use lbtc_operator::types::Chain;

// ============================================================================
// Gas gate
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_gate_waits_for_price_under_ceiling() {
    let chain = MockChain::new(Chain::Ethereum).with_gas_prices(&[gwei(50), gwei(40), gwei(10)]);
    let gate = GasGate::new(Duration::from_secs(60), Some(Duration::from_secs(3600)));

    let started = Instant::now();
    gate.await_acceptable_price(&chain, Some(20)).await.unwrap();

    assert_eq!(*chain.gas_price_reads.lock().unwrap(), 3);
    assert!(started.elapsed() >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_gate_gives_up_after_max_wait() {
    let chain = MockChain::new(Chain::Ethereum).with_gas_prices(&[gwei(80)]);
    let gate = GasGate::new(Duration::from_secs(60), Some(Duration::from_secs(600)));

    let err = gate.await_acceptable_price(&chain, Some(20)).await.unwrap_err();
    assert!(matches!(err, FlowError::GasPriceTimeout { ceiling_gwei: 20, .. }));
    assert_eq!(err.kind(), "gas_price_timeout");
}

#[tokio::test(start_paused = true)]
async fn test_gate_without_ceiling_never_reads_price() {
    let chain = MockChain::new(Chain::Ethereum).with_gas_prices(&[gwei(500)]);
    let gate = GasGate::default();

    gate.await_acceptable_price(&chain, None).await.unwrap();
    assert_eq!(*chain.gas_price_reads.lock().unwrap(), 0);
}

// ============================================================================
// Bridge saga
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_bridge_submits_quote_and_settles() {
    let source = MockChain::new(Chain::Base);
    let bridge = MockBridge::new();
    let schedules = fast_schedules();
    let saga = BridgeSaga {
        aggregator: &bridge,
        source: &source,
        destination: Chain::Ethereum,
        gate: &schedules.gas_gate,
        receipts: &schedules.receipts,
        schedule: &schedules.bridge,
        max_gas_gwei: None,
    };

    let tx_hash = saga.run().await.unwrap();
    assert!(!tx_hash.is_zero());

    let sent = source.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].value, Some(milli_eth(2)));
    assert_eq!(sent[0].max_fee_per_gas, Some(gwei(2) + gwei(1) * 13 / 10));
    assert_eq!(*bridge.quotes_requested.lock().unwrap(), 1);
    assert_eq!(*bridge.status_checks.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bridge_keeps_polling_while_pending() {
    let source = MockChain::new(Chain::Optimism);
    let bridge = MockBridge::new();
    bridge.statuses.lock().unwrap().extend([
        BridgeStatus::Pending("waiting".into()),
        BridgeStatus::Pending("pending".into()),
    ]);
    let schedules = fast_schedules();
    let saga = BridgeSaga {
        aggregator: &bridge,
        source: &source,
        destination: Chain::Ethereum,
        gate: &schedules.gas_gate,
        receipts: &schedules.receipts,
        schedule: &schedules.bridge,
        max_gas_gwei: None,
    };

    saga.run().await.unwrap();
    assert_eq!(*bridge.status_checks.lock().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_bridge_gives_up_when_amount_exceeds_capacity() {
    let source = MockChain::new(Chain::Base);
    let bridge = MockBridge::new();
    *bridge.amounts.lock().unwrap() = [(milli_eth(5), milli_eth(1))].into();
    let schedules = fast_schedules();
    let saga = BridgeSaga {
        aggregator: &bridge,
        source: &source,
        destination: Chain::Ethereum,
        gate: &schedules.gas_gate,
        receipts: &schedules.receipts,
        schedule: &schedules.bridge,
        max_gas_gwei: None,
    };

    let err = saga.submit().await.unwrap_err();
    assert!(matches!(err, FlowError::BridgeCapacity { attempts: 5, .. }));
    assert_eq!(*bridge.config_fetches.lock().unwrap(), 5);
    assert_eq!(*bridge.quotes_requested.lock().unwrap(), 0);
    assert_eq!(source.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bridge_capacity_recovers_on_refetch() {
    let source = MockChain::new(Chain::Base);
    let bridge = MockBridge::new();
    *bridge.amounts.lock().unwrap() = [
        (milli_eth(5), milli_eth(1)),
        (milli_eth(2), milli_eth(1000)),
    ]
    .into();
    let schedules = fast_schedules();
    let saga = BridgeSaga {
        aggregator: &bridge,
        source: &source,
        destination: Chain::Ethereum,
        gate: &schedules.gas_gate,
        receipts: &schedules.receipts,
        schedule: &schedules.bridge,
        max_gas_gwei: None,
    };

    saga.submit().await.unwrap();
    assert_eq!(*bridge.config_fetches.lock().unwrap(), 2);
    assert_eq!(source.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_route_is_rejected() {
    let source = MockChain::new(Chain::Arbitrum);
    let bridge = MockBridge::new();
    *bridge.enabled.lock().unwrap() = false;
    let schedules = fast_schedules();
    let saga = BridgeSaga {
        aggregator: &bridge,
        source: &source,
        destination: Chain::Ethereum,
        gate: &schedules.gas_gate,
        receipts: &schedules.receipts,
        schedule: &schedules.bridge,
        max_gas_gwei: None,
    };

    let err = saga.submit().await.unwrap_err();
    assert!(matches!(err, FlowError::BridgeDisabled { .. }));
    assert_eq!(source.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_quote_is_reported() {
    let source = MockChain::new(Chain::Base);
    let bridge = MockBridge::new();
    *bridge.quote.lock().unwrap() = None;
    let schedules = fast_schedules();
    let saga = BridgeSaga {
        aggregator: &bridge,
        source: &source,
        destination: Chain::Ethereum,
        gate: &schedules.gas_gate,
        receipts: &schedules.receipts,
        schedule: &schedules.bridge,
        max_gas_gwei: None,
    };

    let err = saga.submit().await.unwrap_err();
    assert_eq!(err.kind(), "no_quote");
    assert_eq!(source.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refund_fails_settlement() {
    let source = MockChain::new(Chain::Base);
    let bridge = MockBridge::new();
    bridge
        .statuses
        .lock()
        .unwrap()
        .push_back(BridgeStatus::Refund("solver refunded".into()));
    let schedules = fast_schedules();
    let saga = BridgeSaga {
        aggregator: &bridge,
        source: &source,
        destination: Chain::Ethereum,
        gate: &schedules.gas_gate,
        receipts: &schedules.receipts,
        schedule: &schedules.bridge,
        max_gas_gwei: None,
    };

    let err = saga.run().await.unwrap_err();
    match err {
        FlowError::BridgeFailed { status, detail } => {
            assert_eq!(status, "refund");
            assert_eq!(detail, "solver refunded");
        }
        other => panic!("expected BridgeFailed, got {other:?}"),
    }
    // the source transaction went out before settlement failed
    assert_eq!(source.sent_count(), 1);
}
