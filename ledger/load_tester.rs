use ledger::MemoryRepository;
use ledger::store::GameStore;
use ledger::types::LedgerPolicy;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Load testing tool for sustained ledger throughput
fn main() {
    println!("=== Game Ledger Load Testing ===\n");

    test_sustained_buys();
    test_mixed_workload();
    test_contended_ledger();
    test_independent_ledgers();
}

fn new_store() -> GameStore {
    GameStore::new(Arc::new(MemoryRepository::new()), LedgerPolicy::default())
}

fn test_sustained_buys() {
    println!("📈 Testing sustained buys...");

    let store = new_store();
    let game_id = Uuid::new_v4();
    if let Err(e) = store.create_ledger(1, game_id, Decimal::from(u64::MAX)) {
        println!("   Failed to create ledger: {}\n", e);
        return;
    }

    let duration = Duration::from_secs(5);
    let start = Instant::now();
    let mut operations: u64 = 0;

    while start.elapsed() < duration {
        let price = Decimal::from(100 + operations % 1000);
        let _ = store.buy(1, game_id, "btc", price, Decimal::ONE);
        operations += 1;
    }

    let elapsed = start.elapsed();
    println!("   Operations: {}", operations);
    println!("   Duration: {:.2}s", elapsed.as_secs_f64());
    println!(
        "   Throughput: {:.0} ops/sec",
        operations as f64 / elapsed.as_secs_f64()
    );
    if let Ok(summary) = store.summary(1, game_id) {
        println!("   Holdings: {}\n", summary.num_coins);
    }
}

fn test_mixed_workload() {
    println!("🔄 Testing mixed buy/sell workload...");

    let store = new_store();
    let game_id = Uuid::new_v4();
    if let Err(e) = store.create_ledger(1, game_id, Decimal::from(1_000_000_000u64)) {
        println!("   Failed to create ledger: {}\n", e);
        return;
    }

    let duration = Duration::from_secs(5);
    let start = Instant::now();
    let mut lots = Vec::new();
    let mut operations: u64 = 0;
    let mut sells = 0;
    let mut rejected = 0;

    while start.elapsed() < duration {
        if operations % 3 == 0 || lots.is_empty() {
            if store
                .buy(1, game_id, "eth", Decimal::from(10), Decimal::from(5))
                .is_ok()
            {
                if let Ok(handle) = store.find_ledger(1, game_id) {
                    if let Ok(ledger) = handle.lock() {
                        if let Some(holding) = ledger.list_holdings().last() {
                            lots.push(holding.id);
                        }
                    }
                }
            }
        } else {
            let lot = lots[(operations as usize) % lots.len()];
            match store.sell(1, game_id, lot, Decimal::from(11), Decimal::from(2)) {
                Ok(_) => sells += 1,
                Err(_) => {
                    rejected += 1;
                    lots.retain(|id| *id != lot);
                }
            }
        }
        operations += 1;
    }

    let elapsed = start.elapsed();
    println!("   Operations: {}", operations);
    println!("   Sells: {}", sells);
    println!("   Rejected sells: {}", rejected);
    println!("   Duration: {:.2}s", elapsed.as_secs_f64());
    println!(
        "   Throughput: {:.0} ops/sec\n",
        operations as f64 / elapsed.as_secs_f64()
    );
}

fn run_threads(store: Arc<GameStore>, games: Vec<Uuid>, num_threads: u64) -> u64 {
    let operations = Arc::new(AtomicU64::new(0));
    let duration = Duration::from_secs(5);
    let mut handles = vec![];

    for thread_id in 0..num_threads {
        let store = Arc::clone(&store);
        let ops = Arc::clone(&operations);
        let game_id = games[(thread_id as usize) % games.len()];

        handles.push(thread::spawn(move || {
            let start = Instant::now();
            let mut local_ops = 0;
            while start.elapsed() < duration {
                let _ = store.buy(1, game_id, "sol", Decimal::ONE, Decimal::ONE);
                local_ops += 1;
            }
            ops.fetch_add(local_ops, Ordering::Relaxed);
        }));
    }

    for handle in handles {
        if handle.join().is_err() {
            println!("   A worker thread panicked");
        }
    }

    operations.load(Ordering::Relaxed)
}

fn test_contended_ledger() {
    println!("⚡ Testing contended access to one ledger...");

    let store = Arc::new(new_store());
    let game_id = Uuid::new_v4();
    if let Err(e) = store.create_ledger(1, game_id, Decimal::from(u64::MAX)) {
        println!("   Failed to create ledger: {}\n", e);
        return;
    }

    let num_threads = 4;
    let total_ops = run_threads(store.clone(), vec![game_id], num_threads);

    println!("   Threads: {}", num_threads);
    println!("   Total operations: {}", total_ops);
    if let Ok(summary) = store.summary(1, game_id) {
        // Every accepted buy must be counted exactly once
        println!(
            "   Transactions: {} (matches: {})\n",
            summary.num_transactions,
            summary.num_transactions == total_ops
        );
    }
}

fn test_independent_ledgers() {
    println!("🧩 Testing independent ledgers...");

    let store = Arc::new(new_store());
    let games: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for game_id in &games {
        if let Err(e) = store.create_ledger(1, *game_id, Decimal::from(u64::MAX)) {
            println!("   Failed to create ledger: {}\n", e);
            return;
        }
    }

    let total_ops = run_threads(store.clone(), games.clone(), 4);
    let counted: u64 = store
        .games_for_user(1)
        .iter()
        .map(|(_, summary)| summary.num_transactions)
        .sum();

    println!("   Ledgers: {}", games.len());
    println!("   Total operations: {}", total_ops);
    println!("   Transactions: {} (matches: {})\n", counted, counted == total_ops);
}
