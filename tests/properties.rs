//! Property tests: the book and the primitives against simple models.

use std::collections::{HashMap, VecDeque};

use flash_core::queue::spsc;
use flash_core::{LockFreeHashMap, MatchingEngine, Order, OrderStatus, PriceScale, Side};
use proptest::prelude::*;
use rust_decimal::Decimal;

#[derive(Clone, Debug)]
enum Op {
    Limit { side: Side, price: u64, qty: u32 },
    Market { side: Side, qty: u32 },
    Cancel { pick: usize },
}

fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (side(), 95u64..105, 1u32..50).prop_map(|(side, price, qty)| Op::Limit { side, price, qty }),
        1 => (side(), 1u32..100).prop_map(|(side, qty)| Op::Market { side, qty }),
        3 => any::<usize>().prop_map(|pick| Op::Cancel { pick }),
    ]
}

fn check_book(engine: &MatchingEngine) {
    if let (Some(bid), Some(ask)) = (engine.best_bid(), engine.best_ask()) {
        assert!(bid < ask, "crossed book {} / {}", bid, ask);
    }

    let snapshot = engine.get_order_book_snapshot(None);
    let mut resting = 0usize;
    for (side, levels) in [(Side::Buy, &snapshot.bids), (Side::Sell, &snapshot.asks)] {
        for level in levels {
            let orders = engine.orders_at(side, level.price);
            assert!(!orders.is_empty(), "empty level left in book");
            assert_eq!(orders.len(), level.order_count as usize);
            assert_eq!(
                orders.iter().map(|o| o.remaining_quantity as u64).sum::<u64>(),
                level.quantity
            );
            for pair in orders.windows(2) {
                assert!(pair[0].timestamp <= pair[1].timestamp, "FIFO order broken");
            }
            resting += orders.len();
        }
    }
    assert_eq!(resting, engine.order_count());
    assert_eq!(snapshot.best_bid, snapshot.bids.first().map(|l| l.price));
    assert_eq!(snapshot.best_ask, snapshot.asks.first().map(|l| l.price));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_book_invariants_hold(ops in prop::collection::vec(op(), 1..300)) {
        let mut engine = MatchingEngine::new("PROP", 1_000);
        let mut placed: Vec<u64> = Vec::new();
        let mut next_id = 1u64;

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Limit { side, price, qty } => {
                    let mut order = Order::limit(next_id, "PROP", side, qty, price, 1);
                    order.timestamp = step as u64 + 1;
                    let result = engine.add_order(order);
                    prop_assert!(!result.is_rejected());
                    for trade in &result.trades {
                        // Executions never at a worse price than the limit
                        match side {
                            Side::Buy => prop_assert!(trade.price <= price),
                            Side::Sell => prop_assert!(trade.price >= price),
                        }
                    }
                    prop_assert_eq!(
                        result.total_matched + result.order.remaining_quantity as u64,
                        qty as u64
                    );
                    placed.push(next_id);
                    next_id += 1;
                }
                Op::Market { side, qty } => {
                    let mut order = Order::market(next_id, "PROP", side, qty, 2);
                    order.timestamp = step as u64 + 1;
                    let result = engine.add_order(order);
                    prop_assert!(matches!(result.order.status, OrderStatus::Filled | OrderStatus::Cancelled));
                    prop_assert!(engine.get_order(next_id).is_none());
                    next_id += 1;
                }
                Op::Cancel { pick } => {
                    if !placed.is_empty() {
                        let id = placed[pick % placed.len()];
                        let was_resting = engine.get_order(id).is_some();
                        prop_assert_eq!(engine.cancel_order(id), was_resting);
                        prop_assert!(engine.get_order(id).is_none());
                    }
                }
            }
            check_book(&engine);
        }
    }

    #[test]
    fn test_hashmap_matches_model(ops in prop::collection::vec((0u8..3, 0u64..64, any::<u32>()), 1..400)) {
        let map = LockFreeHashMap::<u64, u32>::with_capacity(1_024);
        let mut model: HashMap<u64, u32> = HashMap::new();

        for (kind, key, value) in ops {
            match kind {
                0 => prop_assert_eq!(map.put(key, value).unwrap(), model.insert(key, value)),
                1 => prop_assert_eq!(map.remove(&key), model.remove(&key)),
                _ => prop_assert_eq!(map.get(&key), model.get(&key).copied()),
            }
            prop_assert_eq!(map.len(), model.len());
        }
    }

    #[test]
    fn test_spsc_matches_model(ops in prop::collection::vec(any::<Option<u16>>(), 1..500), capacity in 1usize..40) {
        let (mut tx, mut rx) = spsc::channel::<u16>(capacity);
        let limit = tx.capacity();
        let mut model: VecDeque<u16> = VecDeque::new();

        for op in ops {
            match op {
                Some(v) => {
                    let accepted = tx.try_push(v).is_ok();
                    prop_assert_eq!(accepted, model.len() < limit);
                    if accepted {
                        model.push_back(v);
                    }
                }
                None => prop_assert_eq!(rx.try_pop().ok(), model.pop_front()),
            }
            prop_assert_eq!(rx.len(), model.len());
        }
    }

    #[test]
    fn test_price_scale_round_trip(ticks in 0u64..1_000_000_000, decimals in 0u32..9) {
        let scale = PriceScale::with_decimals(decimals).unwrap();
        let price = scale.from_ticks(ticks).unwrap();
        prop_assert_eq!(scale.to_ticks(price).unwrap(), ticks);
    }

    #[test]
    fn test_price_scale_rejects_off_tick(ticks in 0u64..1_000_000, decimals in 0u32..6) {
        let scale = PriceScale::with_decimals(decimals).unwrap();
        let half_tick = scale.tick() / Decimal::from(2);
        prop_assert!(scale.to_ticks(scale.from_ticks(ticks).unwrap() + half_tick).is_err());
    }
}
