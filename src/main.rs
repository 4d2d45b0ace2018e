use log::{info, warn};

use powledger::blockchain::{Address, CancelToken, Ledger, Transaction, Wallet};
use powledger::config::LedgerConfig;

const CONFIG_ENV: &str = "POWLEDGER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "powledger.toml";

// Mine whatever is pending, giving up cleanly on Ctrl-C
async fn mine(ledger: &Ledger, miner_address: &Address) -> anyhow::Result<()> {
    let cancel = CancelToken::new();

    tokio::select! {
        mined = ledger.mine_pending(miner_address, &cancel) => match mined? {
            Some(block) => info!("Mined block {} ({} transactions)", block.index, block.transactions.len()),
            None => info!("No pending transactions to mine"),
        },
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            warn!("Interrupted; mining cancelled, pending transactions kept");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = LedgerConfig::load(&config_path)?.from_env()?;
    info!(
        "Starting ledger: difficulty {}, reward {}, admission {:?}",
        config.difficulty, config.mining_reward, config.admission
    );

    let ledger = Ledger::with_config(&config);

    // Create a test wallet with initial funds
    let wallet = Wallet::new();
    let recipient = Wallet::new();
    info!("Created test wallet with address: {}", wallet.address());

    ledger.stage_transaction(Transaction::new_coinbase(wallet.address().clone(), 1000))?;
    mine(&ledger, wallet.address()).await?;

    let mut transfer = Transaction::new(wallet.address().clone(), recipient.address().clone(), 50);
    transfer.sign(&wallet)?;
    ledger.stage_transaction(transfer)?;
    mine(&ledger, wallet.address()).await?;

    info!("Wallet balance: {}", ledger.balance_of(wallet.address()));
    info!("Recipient balance: {}", ledger.balance_of(recipient.address()));

    let stats = ledger.stats();
    info!(
        "Chain: {} blocks, {} transactions, {} pending, valid: {}",
        stats.total_blocks, stats.total_transactions, stats.pending_transactions, stats.is_valid
    );

    Ok(())
}
