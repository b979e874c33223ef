use clap::{Parser, ValueEnum};
use econ_runtime::application::economy::Economy;
use econ_runtime::config::EconomyConfig;
use econ_runtime::domain::catalog::Catalog;
use econ_runtime::domain::ports::{DataLayerBox, DataSnapshot};
use econ_runtime::domain::purchase::AppStore;
use econ_runtime::error::{EconomyError, Result as EconomyResult};
use econ_runtime::infrastructure::fake_store::FakePurchasingPlatform;
use econ_runtime::infrastructure::in_memory::InMemoryDataLayer;
use econ_runtime::interfaces::csv::command_reader::{Command, CommandReader, CommandType};
use econ_runtime::interfaces::csv::wallet_writer::WalletWriter;
use miette::{IntoDiagnostic, Result};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BACKGROUND_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Apple,
    Google,
}

impl From<StoreArg> for AppStore {
    fn from(store: StoreArg) -> Self {
        match store {
            StoreArg::Apple => AppStore::Apple,
            StoreArg::Google => AppStore::Google,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Economy definition: catalog JSON with optional settings
    catalog: PathBuf,

    /// Command script CSV (op, key, amount, id)
    commands: PathBuf,

    /// Player state JSON to start from. Starts empty when omitted.
    #[arg(long)]
    state: Option<PathBuf>,

    /// File where owned non-consumable products are persisted
    #[arg(long)]
    owned_products: Option<PathBuf>,

    /// Park purchases reported outside a transaction instead of redeeming them
    #[arg(long)]
    no_background_purchases: bool,

    /// Platform store to simulate
    #[arg(long, value_enum, default_value_t = StoreArg::Apple)]
    store: StoreArg,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EconomyConfig::from_path(&cli.catalog).into_diagnostic()?;
    if cli.owned_products.is_some() {
        config.settings.owned_products_path = cli.owned_products;
    }
    if cli.no_background_purchases {
        config.settings.process_background_purchases = false;
    }
    let settle_tick = config.settings.purchase_tick();

    let catalog = Arc::new(Catalog::from_config(config.catalog).into_diagnostic()?);
    let data_layer: DataLayerBox = match cli.state {
        Some(path) => {
            let json = fs::read_to_string(path).into_diagnostic()?;
            let snapshot: DataSnapshot = serde_json::from_str(&json).into_diagnostic()?;
            Arc::new(InMemoryDataLayer::with_snapshot(catalog.clone(), snapshot))
        }
        None => Arc::new(InMemoryDataLayer::new(catalog.clone())),
    };
    let store = Arc::new(FakePurchasingPlatform::new(cli.store.into()));

    let economy = Economy::builder(catalog, data_layer)
        .settings(config.settings)
        .purchasing(store.clone())
        .build()
        .await
        .into_diagnostic()?;

    // Process commands
    let file = File::open(cli.commands).into_diagnostic()?;
    for command in CommandReader::new(file).commands() {
        match command {
            Ok(command) => {
                if let Err(e) = run_command(&economy, &store, &command, settle_tick).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }
    economy.shutdown();

    // Output final state
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_balances(&economy.balances()).into_diagnostic()?;
    writer.write_items(&economy.items()).into_diagnostic()?;
    writer
        .write_owned_products(&economy.transactions().owned_products())
        .into_diagnostic()?;
    writer.flush().into_diagnostic()?;

    Ok(())
}

fn refused(command: &Command) -> EconomyError {
    EconomyError::InvalidArgument(format!(
        "{:?} of {:?} on '{}' would leave the balance out of bounds",
        command.command_type, command.amount, command.key
    ))
}

async fn run_command(
    economy: &Economy,
    store: &FakePurchasingPlatform,
    command: &Command,
    settle_tick: Duration,
) -> EconomyResult<()> {
    let key = command.key.as_str();
    match command.command_type {
        CommandType::Add => {
            if !economy.add_balance(key, command.amount()?)? {
                return Err(refused(command));
            }
        }
        CommandType::Remove => {
            if !economy.remove_balance(key, command.amount()?)? {
                return Err(refused(command));
            }
        }
        CommandType::Set => {
            if !economy.set_balance(key, command.amount()?)? {
                return Err(refused(command));
            }
        }
        CommandType::Grant => {
            economy.create_item(key, command.id.clone())?;
        }
        CommandType::Discard => {
            if !economy.remove_item(key) {
                return Err(EconomyError::InvalidArgument(format!(
                    "no item with id '{key}'"
                )));
            }
        }
        CommandType::Buy => {
            economy
                .begin_transaction_by_key(key, command.cost_item_ids())?
                .wait()
                .await?;
        }
        CommandType::Background => {
            let purchase = store.simulate_background_purchase(key)?;
            let settled = tokio::time::timeout(BACKGROUND_SETTLE_TIMEOUT, async {
                loop {
                    let confirmed = store
                        .confirmed()
                        .iter()
                        .any(|done| done.transaction_id == purchase.transaction_id);
                    let parked = economy
                        .unprocessed_purchases()
                        .iter()
                        .any(|parked| parked.transaction_id == purchase.transaction_id);
                    if confirmed || parked {
                        break;
                    }
                    tokio::time::sleep(settle_tick).await;
                }
            })
            .await;
            if settled.is_err() {
                return Err(EconomyError::Purchase {
                    product_id: key.to_string(),
                    reason: "unknown".to_string(),
                    message: "background purchase was not redeemed".to_string(),
                });
            }
        }
    }
    Ok(())
}
