//! Full node flows: two-phase liquidity and swaps, quoting, snapshots, restart

use e2e_tests::{account, token, TestNode};
use pool_state::PoolError;
use quote_aggregator::Venue;
use types::{OperationParams, TxState};

fn add_liquidity(node: &TestNode, usdc: u128, weth: u128) -> OperationParams {
    OperationParams::AddLiquidity {
        token_a: token("USDC"),
        token_b: token("WETH"),
        amount_a_desired: usdc,
        amount_b_desired: weth,
        amount_a_min: 0,
        amount_b_min: 0,
        recipient: account("alice"),
        deadline: node.deadline(),
    }
}

#[tokio::test]
async fn test_two_phase_flows_survive_restart() {
    let node = TestNode::start().unwrap();
    let coordinator = node.node.coordinator.clone();

    let add = coordinator
        .create(&account("alice"), add_liquidity(&node, 4_000_000, 1_000_000))
        .unwrap();
    let settled = node.settle(&add).await.unwrap();
    assert_eq!(settled.state, TxState::Tx2Complete);

    let registry = node.node.engine.registry().clone();
    let pool_id = registry.get(&token("USDC"), &token("WETH")).unwrap();
    let positions = node.node.engine.positions().clone();
    assert_eq!(positions.shares_of(&pool_id, &account("alice")), 1_999_000);

    let path = [token("WETH"), token("USDC")];
    let quoted = node.node.router.get_amounts_out(10_000, &path).unwrap();
    let swap = coordinator
        .create(
            &account("bob"),
            OperationParams::Swap {
                token_in: token("WETH"),
                token_out: token("USDC"),
                amount_in: 10_000,
                min_amount_out: quoted[1],
                recipient: account("bob"),
                deadline: node.deadline(),
            },
        )
        .unwrap();
    let settled = node.settle(&swap).await.unwrap();
    assert_eq!(settled.state, TxState::Tx2Complete);
    assert!(settled.tx2_ref.is_some());
    assert_eq!(node.node.engine.treasury().balance_of(&token("WETH")), 5);

    let before = registry.pool(&pool_id).unwrap();
    node.node.take_snapshots();
    assert_eq!(node.node.snapshots.history(&pool_id).len(), 1);

    let node = node.restart().unwrap();
    let after = node.node.engine.registry().pool(&pool_id).unwrap();
    assert_eq!(after.reserves(), before.reserves());
    assert_eq!(after.total_shares(), before.total_shares());
    assert_eq!(
        node.node.engine.positions().shares_of(&pool_id, &account("alice")),
        1_999_000
    );
    assert_eq!(node.node.engine.treasury().balance_of(&token("WETH")), 5);
    assert_eq!(node.node.snapshots.history(&pool_id).len(), 1);

    let coordinator = &node.node.coordinator;
    assert_eq!(coordinator.get(&add).unwrap().state, TxState::Tx2Complete);
    assert_eq!(coordinator.get(&swap).unwrap().state, TxState::Tx2Complete);
}

#[tokio::test]
async fn test_interrupted_settlement_finishes_after_restart() {
    let node = TestNode::start().unwrap();
    let add = node
        .node
        .coordinator
        .create(&account("alice"), add_liquidity(&node, 4_000_000, 1_000_000))
        .unwrap();
    node.settle(&add).await.unwrap();

    let swap = node
        .node
        .coordinator
        .create(
            &account("bob"),
            OperationParams::Swap {
                token_in: token("USDC"),
                token_out: token("WETH"),
                amount_in: 40_000,
                min_amount_out: 1,
                recipient: account("bob"),
                deadline: node.deadline(),
            },
        )
        .unwrap();
    node.node.coordinator.mark_tx1_complete(&swap, "tx1-bob").unwrap();

    // Crash between TX1 and TX2; nothing is saved on the way down
    let node = node.crash().unwrap();
    let pending = node.node.coordinator.get(&swap).unwrap();
    assert_eq!(pending.state, TxState::Tx1Complete);
    assert_eq!(pending.tx1_ref.as_deref(), Some("tx1-bob"));

    let settled = node.node.coordinator.attempt_tx2(&swap).await.unwrap();
    assert_eq!(settled.state, TxState::Tx2Complete);
    assert_eq!(node.node.engine.treasury().balance_of(&token("USDC")), 20);
}

#[tokio::test]
async fn test_settled_state_survives_a_crash() {
    let node = TestNode::start().unwrap();
    let add = node
        .node
        .coordinator
        .create(&account("alice"), add_liquidity(&node, 4_000_000, 1_000_000))
        .unwrap();
    node.settle(&add).await.unwrap();

    let path = [token("USDC"), token("WETH")];
    node.node
        .router
        .swap_exact_tokens_for_tokens(&account("bob"), 40_000, 0, &path, &account("bob"), node.deadline())
        .unwrap();
    let pool_id = node
        .node
        .engine
        .registry()
        .get(&token("USDC"), &token("WETH"))
        .unwrap();
    let before = node.node.engine.registry().pool(&pool_id).unwrap();

    // no persist, no shutdown hook
    let node = node.crash().unwrap();
    let engine = &node.node.engine;
    let after = engine.registry().pool(&pool_id).unwrap();
    assert_eq!(after.reserves(), before.reserves());
    assert_eq!(after.total_shares(), before.total_shares());
    assert_eq!(engine.positions().shares_of(&pool_id, &account("alice")), 1_999_000);
    assert_eq!(engine.treasury().balance_of(&token("USDC")), 20);
    assert_eq!(
        node.node.coordinator.get(&add).unwrap().state,
        TxState::Tx2Complete
    );
}

#[tokio::test]
async fn test_aggregator_sees_native_pool() {
    let node = TestNode::start().unwrap();
    let add = node
        .node
        .coordinator
        .create(&account("alice"), add_liquidity(&node, 4_000_000, 1_000_000))
        .unwrap();
    node.settle(&add).await.unwrap();

    let quote = node
        .node
        .aggregator
        .get_best_quote(&token("USDC"), &token("WETH"), 100_000)
        .await
        .unwrap();
    assert_eq!(quote.venue, Some(Venue::Native));
    assert_eq!(quote.fee_taken, 300);
    assert!(quote.amount_out > 0 && quote.amount_out < 25_000);

    let missing = node
        .node
        .aggregator
        .get_best_quote(&token("USDC"), &token("DAI"), 100_000)
        .await
        .unwrap();
    assert!(!missing.has_route());
}

#[tokio::test]
async fn test_router_rejects_expired_calls() {
    let node = TestNode::start().unwrap();
    let lp = account("lp");
    let router = &node.node.router;
    router
        .add_liquidity(
            &lp,
            &token("USDC"),
            &token("WETH"),
            4_000_000,
            1_000_000,
            0,
            0,
            &lp,
            node.deadline(),
        )
        .unwrap();

    let result = router.swap_exact_tokens_for_tokens(
        &account("bob"),
        1_000,
        0,
        &[token("USDC"), token("WETH")],
        &account("bob"),
        1,
    );
    assert!(matches!(result, Err(PoolError::Expired { .. })));
}

#[tokio::test]
async fn test_state_file_is_versioned_json() {
    let node = TestNode::start().unwrap();
    let add = node
        .node
        .coordinator
        .create(&account("alice"), add_liquidity(&node, 4_000_000, 1_000_000))
        .unwrap();
    node.settle(&add).await.unwrap();
    node.node.persist().unwrap();

    let raw = std::fs::read_to_string(node.data_dir().join("pool_state.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["pools"].as_array().unwrap().len(), 1);
    assert!(node.data_dir().join("pending_transactions.json").exists());
}
