use std::error::Error;
use std::time::{Duration, Instant};

use clap::Parser;
use flash_core::{Command, Engine, EngineConfig, Order, Side};
use hdrhistogram::Histogram;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Measure per-command latency of a single matching engine.
#[derive(Parser, Debug)]
#[command(name = "latency-report")]
struct Args {
    /// Commands to time
    #[arg(short, long, default_value_t = 1_000_000)]
    iterations: u64,

    /// Arena capacity (maximum resting orders)
    #[arg(short, long, default_value_t = 100_000)]
    capacity: u32,

    /// Number of distinct price ticks the flow is spread across
    #[arg(long, default_value_t = 100)]
    price_range: u64,

    /// Pin the benchmark thread to the last core
    #[arg(long)]
    pin: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = EngineConfig {
        order_capacity: args.capacity,
        index_capacity: args.capacity as usize,
        pin_workers: args.pin,
    };

    let mut engine = Engine::with_config("BENCH", &config);
    if args.pin && !engine.pin_to_core() {
        info!("core pinning unavailable, running unpinned");
    }
    engine.warm_up();

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000, 3)?;
    let price_range = args.price_range.max(1);

    info!(iterations = args.iterations, capacity = args.capacity, "running latency benchmark");

    let mut total_duration = Duration::ZERO;
    let mut cancel_cursor = 1u64;

    for order_id in 1..=args.iterations {
        let side = if order_id % 2 == 0 { Side::Buy } else { Side::Sell };
        let cmd = Command::Place(Order::limit(order_id, "BENCH", side, 10, 10_000 + order_id % price_range, 1));

        // Critical measurement section
        let start = Instant::now();
        std::hint::black_box(engine.process_command(cmd));
        let elapsed = start.elapsed();

        histogram.saturating_record(elapsed.as_nanos() as u64);
        total_duration += elapsed;

        // Keep the arena from filling up on long runs
        if engine.order_count() + 1 >= args.capacity as usize {
            while engine.order_count() * 2 > args.capacity as usize && cancel_cursor < order_id {
                engine.process_command(Command::Cancel { order_id: cancel_cursor });
                cancel_cursor += 1;
            }
        }
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", args.iterations);
    println!(
        "Throughput: {:.2} ops/sec",
        args.iterations as f64 / total_duration.as_secs_f64().max(f64::EPSILON)
    );
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");

    println!("\nDistribution:");
    for v in histogram.iter_log(100, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:8} ns: {:10} count", v.value_iterated_to(), count);
        }
    }

    let stats = engine.matcher.get_performance_stats();
    println!("\n=== Engine ===");
    println!("Trades:         {}", stats.counters.trades);
    println!("Volume:         {}", stats.counters.volume);
    println!("Resting orders: {}", stats.resting_orders);
    println!("Bid / ask lvls: {} / {}", stats.bid_levels, stats.ask_levels);

    Ok(())
}
