use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kuberan::accounts::{AccountBalances, JsonFileAccountBook};
use kuberan::clock::{Clock, SystemClock};
use kuberan::config::{default_config_path, DisplayConfig, ResolvedConfig};
use kuberan::engine::Engine;
use kuberan::error::EngineError;
use kuberan::ledger::{DividendRequest, SplitRequest, TradeRequest, TransferRequest};
use kuberan::market_data::JsonlPriceStore;
use kuberan::models::{
    Account, AccountKind, AssetClass, DividendKind, Id, IdGenerator, PriceObservation, Security,
    UuidIdGenerator,
};
use kuberan::money::{format_minor_units, MinorUnits};
use kuberan::pagination::PageRequest;
use kuberan::portfolio::PortfolioSummary;
use kuberan::storage::{find_security, JsonFileStorage, Storage};

#[derive(Parser)]
#[command(name = "kuberan")]
#[command(about = "Investment ledger and portfolio accounting")]
struct Cli {
    /// Path to config file (defaults to ./kuberan.toml, then the XDG data dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved configuration
    Config,
    /// Manage accounts
    #[command(subcommand)]
    Account(AccountCommand),
    /// Manage securities
    #[command(subcommand)]
    Security(SecurityCommand),
    /// Record prices
    #[command(subcommand)]
    Price(PriceCommand),
    /// Record a buy
    Buy(TradeArgs),
    /// Record a sell
    Sell(TradeArgs),
    /// Record a dividend
    Dividend(DividendArgs),
    /// Record a split
    Split(SplitArgs),
    /// Move units between two investment accounts
    Transfer(TransferArgs),
    /// Ledger entries for one holding, newest first
    History(HistoryArgs),
    /// Soft-remove a ledger entry
    RemoveEntry {
        #[arg(long)]
        entry: String,
    },
    /// Value a user's portfolio as of now
    Portfolio {
        #[arg(long)]
        user: String,
    },
    /// Net-worth snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Subcommand)]
enum AccountCommand {
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        /// cash, investment, debt or credit_card
        #[arg(long)]
        kind: AccountKind,
        #[arg(long, default_value_t = 0)]
        balance: MinorUnits,
        #[arg(long, default_value = "USD")]
        currency: String,
        #[arg(long)]
        id: Option<String>,
    },
    List {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
enum SecurityCommand {
    Add {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        name: String,
        /// stock, etf, bond, crypto or reit
        #[arg(long)]
        asset_class: AssetClass,
        #[arg(long, default_value = "USD")]
        currency: String,
        #[arg(long)]
        exchange: Option<String>,
        #[arg(long)]
        id: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum PriceCommand {
    Record {
        /// Security id or symbol
        #[arg(long)]
        security: String,
        /// Price in minor units
        #[arg(long, allow_negative_numbers = true)]
        price: MinorUnits,
        /// RFC 3339 timestamp (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long, default_value = "manual")]
        source: String,
    },
}

#[derive(Args)]
struct TradeArgs {
    #[arg(long)]
    account: String,
    /// Security id or symbol
    #[arg(long)]
    security: String,
    #[arg(long)]
    quantity: Decimal,
    /// Price per unit in minor units
    #[arg(long)]
    price: MinorUnits,
    #[arg(long, default_value_t = 0)]
    fee: MinorUnits,
    /// Trade date (default: today)
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Cash account to settle against (default: the user's only cash account)
    #[arg(long)]
    settlement: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct DividendArgs {
    #[arg(long)]
    account: String,
    #[arg(long)]
    security: String,
    /// cash, special or stock
    #[arg(long, default_value = "cash")]
    kind: DividendKind,
    /// Cash paid, or declared value for stock dividends, in minor units
    #[arg(long)]
    amount: MinorUnits,
    /// Units received (stock dividends)
    #[arg(long)]
    quantity: Option<Decimal>,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    settlement: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct SplitArgs {
    #[arg(long)]
    account: String,
    #[arg(long)]
    security: String,
    #[arg(long)]
    ratio: Decimal,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct TransferArgs {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    security: String,
    #[arg(long)]
    quantity: Decimal,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long)]
    account: String,
    #[arg(long)]
    security: String,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 0)]
    page_size: u32,
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// Snapshot the given users, or every user with an active account
    Run {
        /// RFC 3339 timestamp (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long = "user")]
        users: Vec<String>,
    },
    List {
        #[arg(long)]
        user: String,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 0)]
        page_size: u32,
    },
}

struct App {
    config: ResolvedConfig,
    config_path: PathBuf,
    storage: Arc<JsonFileStorage>,
    accounts: Arc<JsonFileAccountBook>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    engine: Engine,
}

impl App {
    async fn open(config_path: PathBuf) -> Result<Self> {
        let config = ResolvedConfig::load_or_default(&config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

        let storage = Arc::new(JsonFileStorage::open(&config.data_dir).await?);
        let accounts = Arc::new(JsonFileAccountBook::open(&config.data_dir).await?);
        let prices = Arc::new(JsonlPriceStore::new(&config.data_dir));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidIdGenerator);

        let engine = Engine::new(
            storage.clone(),
            prices,
            accounts.clone(),
            clock.clone(),
            ids.clone(),
            config.engine_config(),
        );

        Ok(Self {
            config,
            config_path,
            storage,
            accounts,
            clock,
            ids,
            engine,
        })
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    fn new_or_given_id(&self, id: Option<String>) -> Result<Id> {
        match id {
            Some(id) => Ok(Id::from_string_checked(id)?),
            None => Ok(self.ids.new_id()),
        }
    }

    async fn security_id(&self, id_or_symbol: &str) -> Result<Id> {
        let security = find_security(self.storage.as_ref(), id_or_symbol)
            .await?
            .ok_or_else(|| EngineError::not_found("Security", id_or_symbol))?;
        Ok(security.id)
    }

    async fn trade_request(&self, args: TradeArgs) -> Result<TradeRequest> {
        Ok(TradeRequest {
            account_id: Id::from(args.account),
            security_id: self.security_id(&args.security).await?,
            quantity: args.quantity,
            price_per_unit: args.price,
            fee: args.fee,
            date: args.date.unwrap_or_else(|| self.today()),
            settlement_account_id: args.settlement.map(Id::from),
            notes: args.notes,
        })
    }

    async fn run(&self, command: Command) -> Result<Value> {
        let value = match command {
            Command::Config => json!({
                "config_file": self.config_path,
                "config": self.config,
            }),
            Command::Account(AccountCommand::Add {
                user,
                name,
                kind,
                balance,
                currency,
                id,
            }) => {
                let mut account =
                    Account::new(self.new_or_given_id(id)?, Id::from(user), name, kind)
                        .with_balance(balance);
                account.currency = currency;
                self.accounts.save_account(account.clone()).await?;
                serde_json::to_value(account)?
            }
            Command::Account(AccountCommand::List { user }) => {
                serde_json::to_value(self.accounts.list_accounts(&Id::from(user)).await?)?
            }
            Command::Security(SecurityCommand::Add {
                symbol,
                name,
                asset_class,
                currency,
                exchange,
                id,
            }) => {
                let security = Security {
                    id: self.new_or_given_id(id)?,
                    symbol,
                    name,
                    asset_class,
                    currency,
                    exchange,
                };
                serde_json::to_value(self.engine.add_security(security).await?)?
            }
            Command::Security(SecurityCommand::List) => {
                serde_json::to_value(self.storage.list_securities().await?)?
            }
            Command::Price(PriceCommand::Record {
                security,
                price,
                at,
                source,
            }) => {
                let observation = PriceObservation {
                    security_id: self.security_id(&security).await?,
                    price,
                    recorded_at: at.unwrap_or_else(|| self.clock.now()),
                    source,
                };
                let stored = self
                    .engine
                    .record_prices(std::slice::from_ref(&observation))
                    .await?;
                json!({ "stored": stored, "price": observation })
            }
            Command::Buy(args) => {
                let request = self.trade_request(args).await?;
                serde_json::to_value(self.engine.record_buy(request).await?)?
            }
            Command::Sell(args) => {
                let request = self.trade_request(args).await?;
                serde_json::to_value(self.engine.record_sell(request).await?)?
            }
            Command::Dividend(args) => {
                let request = DividendRequest {
                    account_id: Id::from(args.account),
                    security_id: self.security_id(&args.security).await?,
                    kind: args.kind,
                    total_amount: args.amount,
                    quantity: args.quantity,
                    date: args.date.unwrap_or_else(|| self.today()),
                    settlement_account_id: args.settlement.map(Id::from),
                    notes: args.notes,
                };
                serde_json::to_value(self.engine.record_dividend(request).await?)?
            }
            Command::Split(args) => {
                let request = SplitRequest {
                    account_id: Id::from(args.account),
                    security_id: self.security_id(&args.security).await?,
                    ratio: args.ratio,
                    date: args.date.unwrap_or_else(|| self.today()),
                    notes: args.notes,
                };
                serde_json::to_value(self.engine.record_split(request).await?)?
            }
            Command::Transfer(args) => {
                let request = TransferRequest {
                    from_account_id: Id::from(args.from),
                    to_account_id: Id::from(args.to),
                    security_id: self.security_id(&args.security).await?,
                    quantity: args.quantity,
                    date: args.date.unwrap_or_else(|| self.today()),
                    notes: args.notes,
                };
                serde_json::to_value(self.engine.record_transfer(request).await?)?
            }
            Command::History(args) => {
                let security_id = self.security_id(&args.security).await?;
                let page = self
                    .engine
                    .ledger_history(
                        &Id::from(args.account),
                        &security_id,
                        PageRequest::new(args.page, args.page_size),
                    )
                    .await?;
                serde_json::to_value(page)?
            }
            Command::RemoveEntry { entry } => {
                serde_json::to_value(self.engine.remove_entry(&Id::from(entry)).await?)?
            }
            Command::Portfolio { user } => {
                let summary = self.engine.compute_portfolio(&Id::from(user)).await?;
                portfolio_json(&summary, &self.config.display)?
            }
            Command::Snapshot(SnapshotCommand::Run { at, users }) => {
                let as_of = at.unwrap_or_else(|| self.clock.now());
                let users: Vec<Id> = if users.is_empty() {
                    self.accounts.distinct_users().await?
                } else {
                    users.into_iter().map(Id::from).collect()
                };
                serde_json::to_value(self.engine.compute_snapshots(as_of, &users).await)?
            }
            Command::Snapshot(SnapshotCommand::List {
                user,
                from,
                to,
                page,
                page_size,
            }) => {
                let page = self
                    .engine
                    .snapshot_history(
                        &Id::from(user),
                        from.unwrap_or(DateTime::<Utc>::MIN_UTC),
                        to.unwrap_or(DateTime::<Utc>::MAX_UTC),
                        PageRequest::new(page, page_size),
                    )
                    .await?;
                serde_json::to_value(page)?
            }
        };
        Ok(value)
    }
}

/// Portfolio JSON, with grouped display strings when configured.
fn portfolio_json(summary: &PortfolioSummary, display: &DisplayConfig) -> Result<Value> {
    let mut value = serde_json::to_value(summary)?;
    if display.currency_grouping {
        let show = |amount| format_minor_units(amount, display.currency_decimals);
        value["display"] = json!({
            "total_value": show(summary.total_value),
            "total_cost_basis": show(summary.total_cost_basis),
            "total_gain_loss": show(summary.total_gain_loss),
            "total_realized_gain_loss": show(summary.total_realized_gain_loss),
            "unpriced_cost_basis": show(summary.unpriced_cost_basis),
        });
    }
    Ok(value)
}

fn error_json(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<EngineError>() {
        Some(engine_err) => json!({
            "error": { "code": engine_err.code(), "message": engine_err.to_string() }
        }),
        None => json!({
            "error": { "code": "ERROR", "message": format!("{err:#}") }
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let result = match App::open(config_path).await {
        Ok(app) => app.run(cli.command).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&error_json(&err))?);
            std::process::exit(1);
        }
    }
}
