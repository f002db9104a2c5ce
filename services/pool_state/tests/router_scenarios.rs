//! Router scenarios across several pools

use pool_state::{
    EventBus, FeeSchedule, LiquidityEngine, LiquidityLedger, PoolError, PoolEvent, PoolRegistry,
    Router, Treasury,
};
use std::sync::Arc;
use std::thread;
use types::{AccountId, Clock, ManualClock, TokenId};

fn token(s: &str) -> TokenId {
    TokenId::new(s).unwrap()
}

fn account(s: &str) -> AccountId {
    AccountId::new(s).unwrap()
}

struct Harness {
    router: Router,
    events: EventBus,
    deadline: u64,
}

/// AAA/BBB, BBB/CCC and CCC/DDD pools, all seeded by `lp`
fn harness() -> Harness {
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    let events = EventBus::default();
    let fees = FeeSchedule::default();
    let engine = LiquidityEngine::new(
        Arc::new(PoolRegistry::new(fees.lp_fee_bps, events.clone())),
        Arc::new(LiquidityLedger::new()),
        Arc::new(Treasury::new(account("treasury"))),
        fees,
        clock.clone(),
    );
    let router = Router::new(Arc::new(engine));
    let deadline = clock.unix_seconds() + 60;

    let lp = account("lp");
    for (x, y) in [("AAA", "BBB"), ("BBB", "CCC"), ("CCC", "DDD")] {
        router
            .add_liquidity(
                &lp,
                &token(x),
                &token(y),
                50_000_000,
                50_000_000,
                0,
                0,
                &lp,
                deadline,
            )
            .unwrap();
    }
    Harness {
        router,
        events,
        deadline,
    }
}

#[test]
fn test_multi_hop_matches_quote() {
    let h = harness();
    let path = [token("AAA"), token("BBB"), token("CCC")];
    let quoted = h.router.get_amounts_out(100_000, &path).unwrap();
    assert_eq!(quoted.len(), 3);

    let receipt = h
        .router
        .swap_exact_tokens_for_tokens(&account("bob"), 100_000, 0, &path, &account("bob"), h.deadline)
        .unwrap();
    assert_eq!(receipt.amounts, quoted);
    assert_eq!(receipt.pools.len(), 2);
    assert_eq!(receipt.protocol_fee, 50);
    assert_eq!(h.router.engine().treasury().balance_of(&token("AAA")), 50);
    assert_eq!(h.router.engine().treasury().balance_of(&token("BBB")), 0);
}

#[test]
fn test_multi_hop_failure_changes_nothing() {
    let h = harness();
    let engine = h.router.engine();
    let before = engine.registry().pools();

    // last hop has no pool
    let err = h
        .router
        .swap_exact_tokens_for_tokens(
            &account("bob"),
            100_000,
            0,
            &[token("AAA"), token("BBB"), token("EEE")],
            &account("bob"),
            h.deadline,
        )
        .unwrap_err();
    assert!(matches!(err, PoolError::NotFound(_)));

    // every hop fine, final output below the minimum
    let path = [token("AAA"), token("BBB"), token("CCC"), token("DDD")];
    let quoted = h.router.get_amounts_out(100_000, &path).unwrap();
    let err = h
        .router
        .swap_exact_tokens_for_tokens(
            &account("bob"),
            100_000,
            quoted[3] + 1,
            &path,
            &account("bob"),
            h.deadline,
        )
        .unwrap_err();
    assert!(matches!(err, PoolError::Math(_)));

    assert_eq!(engine.registry().pools(), before);
    assert_eq!(engine.treasury().balance_of(&token("AAA")), 0);
}

#[test]
fn test_exact_output_multi_hop() {
    let h = harness();
    let path = [token("AAA"), token("BBB"), token("CCC")];
    let needed = h.router.get_amounts_in(250_000, &path).unwrap();

    let receipt = h
        .router
        .swap_tokens_for_exact_tokens(
            &account("bob"),
            250_000,
            needed[0],
            &path,
            &account("bob"),
            h.deadline,
        )
        .unwrap();
    assert_eq!(receipt.amount_out(), 250_000);
    assert_eq!(receipt.amount_in(), needed[0]);

    let forward = h.router.get_amounts_out(needed[0], &path).unwrap();
    assert!(forward[2] >= 250_000);
}

#[test]
fn test_invalid_paths() {
    let h = harness();
    assert_eq!(
        h.router.get_amounts_out(1_000, &[token("AAA")]),
        Err(PoolError::InvalidPath("path needs at least two tokens"))
    );
    assert!(h
        .router
        .get_amounts_out(1_000, &[token("AAA"), token("AAA")])
        .is_err());
}

#[test]
fn test_parallel_swaps_on_different_pools() {
    let h = harness();
    let router = h.router.clone();
    let deadline = h.deadline;

    let workers: Vec<_> = [("AAA", "BBB"), ("CCC", "DDD")]
        .into_iter()
        .map(|(x, y)| {
            let router = router.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    router
                        .swap_exact_tokens_for_tokens(
                            &account("trader"),
                            10_000,
                            0,
                            &[token(x), token(y)],
                            &account("trader"),
                            deadline,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let engine = router.engine();
    for (x, y) in [("AAA", "BBB"), ("CCC", "DDD")] {
        let pool_id = engine.registry().get(&token(x), &token(y)).unwrap();
        let pool = engine.registry().pool(&pool_id).unwrap();
        assert_eq!(pool.reserve_of(&token(x)).unwrap(), 50_000_000 + 50 * 9_995);
    }
    let untouched = engine.registry().get(&token("BBB"), &token("CCC")).unwrap();
    assert_eq!(
        engine.registry().pool(&untouched).unwrap().reserves(),
        (50_000_000, 50_000_000)
    );
}

#[tokio::test]
async fn test_swap_publishes_swap_then_sync() {
    let h = harness();
    let mut rx = h.events.subscribe();

    h.router
        .swap_exact_tokens_for_tokens(
            &account("bob"),
            10_000,
            0,
            &[token("AAA"), token("BBB")],
            &account("bob"),
            h.deadline,
        )
        .unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert!(matches!(
        first,
        PoolEvent::Swap {
            amount0_in: 9_995,
            amount1_in: 0,
            ..
        }
    ));
    assert!(matches!(second, PoolEvent::Sync { .. }));
}
