//! Determinism Test - Golden Master verification.
//!
//! Verifies that the engine produces identical results across runs
//! when given the same input sequence (with fixed timestamps).

use flash_core::{Command, Engine, ModifyOrder, Order, OrderType, OutputEvent, Side};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const SYMBOL: &str = "DET";

/// Generate a deterministic sequence of commands
fn generate_commands(seed: u64, count: usize) -> Vec<Command> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut commands = Vec::with_capacity(count);
    let mut active_orders: Vec<u64> = Vec::new();
    let mut next_order_id = 1u64;

    for step in 0..count {
        let roll: f64 = rng.gen();
        if active_orders.is_empty() || roll < 0.65 {
            let order_id = next_order_id;
            next_order_id += 1;

            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let qty = rng.gen_range(1..500);
            let mut order = if rng.gen_bool(0.05) {
                Order::market(order_id, SYMBOL, side, qty, rng.gen_range(1..100))
            } else {
                Order::limit(
                    order_id,
                    SYMBOL,
                    side,
                    qty,
                    rng.gen_range(9500..10500) * 100,
                    rng.gen_range(1..100),
                )
            };
            order.timestamp = step as u64 + 1;
            commands.push(Command::Place(order));

            if order.order_type == OrderType::Limit {
                active_orders.push(order_id);
            }
        } else if roll < 0.9 {
            let idx = rng.gen_range(0..active_orders.len());
            let order_id = active_orders.swap_remove(idx);
            commands.push(Command::Cancel { order_id });
        } else {
            let idx = rng.gen_range(0..active_orders.len());
            let order_id = active_orders[idx];
            let new_order_id = next_order_id;
            next_order_id += 1;
            active_orders[idx] = new_order_id;
            commands.push(Command::Modify(ModifyOrder {
                order_id,
                new_order_id,
                new_price: rng.gen_range(9500..10500) * 100,
                new_qty: rng.gen_range(1..500),
            }));
        }
    }

    commands
}

/// Hash every observable field of the outputs except wall-clock ones.
fn hash_events(events: &[OutputEvent]) -> u64 {
    let mut hasher = DefaultHasher::new();

    for event in events {
        match event {
            OutputEvent::Result(r) => {
                "Result".hash(&mut hasher);
                r.order.order_id.hash(&mut hasher);
                r.order.status.hash(&mut hasher);
                r.order.remaining_quantity.hash(&mut hasher);
                r.reject_reason.hash(&mut hasher);
                r.total_matched.hash(&mut hasher);
                for t in &r.trades {
                    (t.trade_id, t.buy_order_id, t.sell_order_id, t.price, t.quantity).hash(&mut hasher);
                }
                for u in &r.book_updates {
                    (u.side, u.price, u.new_qty, u.new_count).hash(&mut hasher);
                }
            }
            OutputEvent::Cancelled(o) => {
                "Cancelled".hash(&mut hasher);
                o.order_id.hash(&mut hasher);
                o.remaining_quantity.hash(&mut hasher);
            }
            OutputEvent::CancelRejected { order_id } => {
                "CancelRejected".hash(&mut hasher);
                order_id.hash(&mut hasher);
            }
        }
    }

    hasher.finish()
}

/// Run the engine with a command sequence and return hashes
fn run_engine(commands: &[Command]) -> (u64, u64) {
    let mut engine = Engine::new(SYMBOL, 100_000);
    let mut all_events = Vec::with_capacity(commands.len());

    for cmd in commands {
        all_events.push(engine.process_command(*cmd));
    }

    (hash_events(&all_events), engine.state_hash())
}

#[test]
fn test_determinism_small() {
    const SEED: u64 = 0xDEADBEEF;
    const COUNT: usize = 1000;
    const RUNS: usize = 10;

    let commands = generate_commands(SEED, COUNT);
    let (first_event_hash, first_state_hash) = run_engine(&commands);

    for run in 1..RUNS {
        let (event_hash, state_hash) = run_engine(&commands);
        assert_eq!(event_hash, first_event_hash, "Event hash mismatch on run {}", run);
        assert_eq!(state_hash, first_state_hash, "State hash mismatch on run {}", run);
    }

    println!("  Event hash: {:#018x}", first_event_hash);
    println!("  State hash: {:#018x}", first_state_hash);
}

#[test]
fn test_determinism_large() {
    const SEED: u64 = 0xCAFEBABE;
    const COUNT: usize = 100_000;
    const RUNS: usize = 3;

    let commands = generate_commands(SEED, COUNT);
    let (first_event_hash, first_state_hash) = run_engine(&commands);

    for run in 1..RUNS {
        let (event_hash, state_hash) = run_engine(&commands);
        assert_eq!(event_hash, first_event_hash, "Event hash mismatch on run {}", run);
        assert_eq!(state_hash, first_state_hash, "State hash mismatch on run {}", run);
    }
}

#[test]
fn test_different_seeds_produce_different_results() {
    let (hash1, _) = run_engine(&generate_commands(1, 1000));
    let (hash2, _) = run_engine(&generate_commands(2, 1000));

    assert_ne!(hash1, hash2, "Different seeds should produce different results");
}

#[test]
fn test_snapshot_is_reproducible() {
    let commands = generate_commands(0xABCD, 5000);

    let snapshot = |commands: &[Command]| {
        let mut engine = Engine::new(SYMBOL, 100_000);
        for cmd in commands {
            engine.process_command(*cmd);
        }
        let mut snap = engine.matcher.get_order_book_snapshot(Some(20));
        snap.timestamp = 0;
        snap
    };

    assert_eq!(snapshot(&commands), snapshot(&commands));
}
