//! Replay an order-flow CSV through one matching engine.
//!
//! Expected columns (header row required):
//! `action,order_id,side,order_type,price,quantity,client_id,new_order_id,timestamp`
//!
//! `action` is `place`, `cancel` or `modify`. Prices are decimals converted
//! to ticks with `--decimals`; `timestamp` is optional RFC 3339.

use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::Parser;
use flash_core::{
    Command, Engine, EngineConfig, LevelSummary, ModifyOrder, Order, OrderType, OutputEvent, PriceError, PriceScale, Side,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "replay")]
struct Args {
    /// Order-flow CSV file
    input: PathBuf,

    /// Symbol the flow belongs to
    #[arg(short, long, default_value = "REPLAY")]
    symbol: String,

    /// Decimal places in one price tick
    #[arg(short, long, default_value_t = 2)]
    decimals: u32,

    /// Arena capacity (maximum resting orders)
    #[arg(short, long, default_value_t = 1_000_000)]
    capacity: u32,

    /// Write executed trades to this CSV file
    #[arg(short, long)]
    trades: Option<PathBuf>,

    /// Levels per side in the final snapshot
    #[arg(long, default_value_t = 10)]
    depth: usize,
}

#[derive(Debug, Deserialize)]
struct ReplayRow {
    action: String,
    order_id: u64,
    side: Option<String>,
    order_type: Option<String>,
    price: Option<Decimal>,
    quantity: Option<u32>,
    client_id: Option<u64>,
    new_order_id: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
}

impl ReplayRow {
    fn side(&self) -> Option<Side> {
        match self.side.as_deref()?.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Some(Side::Buy),
            "sell" | "ask" => Some(Side::Sell),
            _ => None,
        }
    }

    fn order_type(&self) -> Option<OrderType> {
        match self.order_type.as_deref().unwrap_or("limit").to_ascii_lowercase().as_str() {
            "limit" => Some(OrderType::Limit),
            "market" => Some(OrderType::Market),
            "stop" => Some(OrderType::Stop),
            "stop_limit" => Some(OrderType::StopLimit),
            "ioc" => Some(OrderType::Ioc),
            "fok" => Some(OrderType::Fok),
            _ => None,
        }
    }

    fn ticks(&self, scale: &PriceScale) -> Result<u64, Box<dyn Error>> {
        match self.price {
            Some(price) => Ok(scale.to_ticks(price)?),
            None => Ok(0),
        }
    }

    /// Convert to an engine command. `None` for rows that cannot be replayed.
    fn to_command(&self, symbol: &str, scale: &PriceScale) -> Result<Option<Command>, Box<dyn Error>> {
        let cmd = match self.action.to_ascii_lowercase().as_str() {
            "place" | "new" => {
                let (Some(side), Some(order_type)) = (self.side(), self.order_type()) else {
                    return Ok(None);
                };
                let mut order = Order::new(
                    self.order_id,
                    symbol,
                    side,
                    order_type,
                    self.quantity.unwrap_or(0),
                    self.ticks(scale)?,
                    self.client_id.unwrap_or(0),
                );
                if let Some(ts) = self.timestamp {
                    order.timestamp = ts.timestamp_nanos_opt().map_or(0, |ns| ns.max(0) as u64);
                }
                Command::Place(order)
            }
            "cancel" => Command::Cancel {
                order_id: self.order_id,
            },
            "modify" | "replace" => Command::Modify(ModifyOrder {
                order_id: self.order_id,
                new_order_id: self.new_order_id.unwrap_or(self.order_id),
                new_price: self.ticks(scale)?,
                new_qty: self.quantity.unwrap_or(0),
            }),
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let scale = PriceScale::with_decimals(args.decimals)?;
    let config = EngineConfig {
        order_capacity: args.capacity,
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_config(&args.symbol, &config);

    let mut reader = csv::Reader::from_reader(File::open(&args.input)?);
    let mut trade_writer = match &args.trades {
        Some(path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };

    info!(input = %args.input.display(), symbol = %args.symbol, "replaying");
    let started = Instant::now();
    let (mut rows, mut skipped, mut rejected) = (0u64, 0u64, 0u64);

    for (line, record) in reader.deserialize::<ReplayRow>().enumerate() {
        let row = match record {
            Ok(row) => row,
            Err(e) => {
                warn!(line = line + 2, error = %e, "unreadable row");
                skipped += 1;
                continue;
            }
        };
        let cmd = match row.to_command(&args.symbol, &scale) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => {
                debug!(line = line + 2, action = %row.action, "row not replayable");
                skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(line = line + 2, error = %e, "bad price");
                skipped += 1;
                continue;
            }
        };
        rows += 1;

        match engine.process_command(cmd) {
            OutputEvent::Result(result) => {
                if let Some(reason) = result.reject_reason {
                    debug!(order_id = result.order.order_id, ?reason, "rejected");
                    rejected += 1;
                }
                if let Some(writer) = trade_writer.as_mut() {
                    for trade in &result.trades {
                        writer.serialize(trade)?;
                    }
                }
            }
            OutputEvent::CancelRejected { order_id } => {
                debug!(order_id, "cancel of unknown order");
                rejected += 1;
            }
            OutputEvent::Cancelled(_) => {}
        }
    }

    if let Some(mut writer) = trade_writer {
        writer.flush()?;
    }

    let elapsed = started.elapsed();
    info!(rows, skipped, rejected, elapsed_ms = elapsed.as_millis() as u64, "replay finished");

    let stats = engine.matcher.get_performance_stats();
    let snapshot = engine.matcher.get_order_book_snapshot(Some(args.depth));

    println!("\n=== Replay: {} ===", args.symbol);
    println!("Commands:       {rows} ({skipped} skipped, {rejected} rejected)");
    println!("Trades:         {}", stats.counters.trades);
    println!("Volume:         {}", stats.counters.volume);
    println!("Resting orders: {}", stats.resting_orders);
    println!("P50 / P99:      {} / {} ns", stats.latency.p50_ns, stats.latency.p99_ns);

    let price = |level: Option<&LevelSummary>| -> Result<String, PriceError> {
        level.map_or(Ok(String::new()), |l| Ok(scale.from_ticks(l.price)?.to_string()))
    };
    println!("\n{:>14} {:>12} | {:<14} {:<12}", "bid", "qty", "ask", "qty");
    for i in 0..snapshot.bids.len().max(snapshot.asks.len()) {
        let bid = snapshot.bids.get(i);
        let ask = snapshot.asks.get(i);
        println!(
            "{:>14} {:>12} | {:<14} {:<12}",
            price(bid)?,
            bid.map(|l| l.quantity.to_string()).unwrap_or_default(),
            price(ask)?,
            ask.map(|l| l.quantity.to_string()).unwrap_or_default(),
        );
    }
    println!("Spread: {}", scale.from_ticks(snapshot.spread)?);

    Ok(())
}
