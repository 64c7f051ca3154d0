mod api;
mod config;
mod error;
mod ledger;
mod transaction;
mod utils;

use api::SharedLedger;
use config::Config;
use ledger::{MineOutcome, ResourceLedger};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::select;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use transaction::TransactionRequest;

type ConsoleInput = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load_or_default(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.system.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Habitat resource ledger v{} starting", env!("CARGO_PKG_VERSION"));

    let ledger: SharedLedger = Arc::new(Mutex::new(ResourceLedger::new()?));

    let ledger_api = ledger.clone();
    let bind_address = config.api.bind_address;
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(bind_address, ledger_api).await {
            error!("API server stopped: {}", e);
        }
    });

    if config.ledger.mining_interval_secs > 0 {
        let period = Duration::from_secs(config.ledger.mining_interval_secs);
        spawn_scheduled_mining(ledger.clone(), period);
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("\nOptions:");
        println!("1. Add Transaction");
        println!("2. Mine Block");
        println!("3. View Chain");
        println!("4. View Pending Transactions");
        println!("5. Resource History");
        println!("6. Verify Chain");
        println!("7. Exit");

        select! {
            line = stdin.next_line() => {
                let choice = match line {
                    Ok(Some(line_str)) => line_str,
                    Ok(None) | Err(_) => "7".to_string(),
                };

                match choice.trim() {
                    "1" => {
                        let request = read_transaction(&mut stdin).await?;
                        if ledger.lock().await.add_transaction(request) {
                            println!("Transaction queued.");
                        } else {
                            println!("Transaction rejected: missing or invalid fields.");
                        }
                    }
                    "2" => {
                        let result = ledger.lock().await.mine_block();
                        println!("{}", mine_report(result));
                    }
                    "3" => {
                        for block in ledger.lock().await.chain() {
                            println!("{:#?}", block);
                        }
                    }
                    "4" => {
                        for tx in ledger.lock().await.pending_transactions() {
                            println!("{:#?}", tx);
                        }
                    }
                    "5" => {
                        let resource = prompt(&mut stdin, "Resource:").await?;
                        let history = ledger.lock().await.get_resource_history(resource.trim());
                        if history.is_empty() {
                            println!("No history for '{}'.", resource.trim());
                        }
                        for entry in history {
                            println!(
                                "{:.6} | {} | block {}",
                                entry.timestamp, entry.amount, entry.block_hash
                            );
                        }
                    }
                    "6" => {
                        let ledger = ledger.lock().await;
                        if ledger.verify_chain() {
                            println!(
                                "Chain valid ({} blocks, tip {}).",
                                ledger.len(),
                                ledger.latest_block().hash
                            );
                        } else {
                            println!("Chain INVALID.");
                        }
                    }
                    "7" | "exit" => break,
                    _ => println!("Invalid choice."),
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

/// Console line for a mining attempt. Failures are reported, not fatal.
fn mine_report(result: error::Result<MineOutcome>) -> String {
    match result {
        Ok(MineOutcome::Success { block_hash, transactions_count }) => {
            format!("Block {} mined with {} transactions.", block_hash, transactions_count)
        }
        Ok(MineOutcome::NoTransactions) => "No pending transactions.".to_string(),
        Err(e) => {
            error!("Mining from console failed: {}", e);
            format!("Mining failed: {}", e)
        }
    }
}

fn spawn_scheduled_mining(ledger: SharedLedger, period: Duration) {
    info!("Scheduled mining every {}s", period.as_secs());
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            if let Err(e) = ledger.lock().await.mine_block() {
                error!("Scheduled mining failed: {}", e);
            }
        }
    });
}

async fn prompt(stdin: &mut ConsoleInput, label: &str) -> std::io::Result<String> {
    println!("{}", label);
    Ok(stdin.next_line().await?.unwrap_or_default())
}

/// Ask for each field; blank answers are left out of the request.
async fn read_transaction(stdin: &mut ConsoleInput) -> std::io::Result<TransactionRequest> {
    let resource = prompt(stdin, "Resource (e.g. oxygen, water, power):").await?;
    let amount = prompt(stdin, "Amount:").await?;
    let source = prompt(stdin, "Source:").await?;
    let destination = prompt(stdin, "Destination:").await?;

    let field = |value: String| {
        let value = value.trim().to_string();
        if value.is_empty() { None } else { Some(value) }
    };
    Ok(TransactionRequest {
        resource: field(resource),
        amount: amount.trim().parse().ok(),
        source: field(source),
        destination: field(destination),
    })
}
