//! Ledger Demo
//!
//! Drives a small account ledger through the Missive message bus:
//!
//! - Commands (`OpenAccount`, `Deposit`, `Withdraw`) go through `send`
//! - Queries (`Balance`, `Statement`, `Summary`) go through `query`
//! - Events (`AccountOpened`) go through `publish`
//!
//! Handler types are registered with the catalog from a `linkme` slice, so the
//! bus finds them without any explicit wiring in `main`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package ledger-demo -- --config demos/ledger/missive.toml --history "status=Failed"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use missive::core::MessageRepository;
use missive::prelude::*;
use missive::runtime::logging;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Services
// ============================================================================

#[derive(Default)]
struct Ledger {
    balances: Mutex<BTreeMap<String, u64>>,
}

/// Append-only trail written by event handlers and read by queries.
#[derive(Default)]
struct AuditLog {
    entries: Mutex<Vec<String>>,
}

impl AuditLog {
    fn push(&self, entry: String) {
        self.entries.lock().push(entry);
    }

    fn for_owner(&self, owner: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.starts_with(owner))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Error)]
enum LedgerError {
    #[error("account {0} already exists")]
    AccountExists(String),
    #[error("account {0} does not exist")]
    UnknownAccount(String),
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAccount {
    owner: String,
}

#[derive(Debug, Serialize)]
struct Deposit {
    owner: String,
    amount: u64,
}

#[derive(Debug, Serialize)]
struct Withdraw {
    owner: String,
    amount: u64,
}

#[derive(Debug, Serialize)]
struct AccountOpened {
    owner: String,
}

#[derive(Debug, Serialize)]
struct Balance {
    owner: String,
}

#[derive(Debug, Serialize)]
struct Statement {
    owner: String,
}

/// Answers itself from the injected ledger.
#[derive(Debug, Serialize)]
struct Summary;

impl Summary {
    fn handle(&self, ledger: Arc<Ledger>, audit: Option<Arc<AuditLog>>) -> Reply<(usize, u64)> {
        let balances = ledger.balances.lock();
        if let Some(audit) = audit {
            audit.push(format!("* summary over {} accounts", balances.len()));
        }
        Reply((balances.len(), balances.values().sum()))
    }
}

// ============================================================================
// Handlers
// ============================================================================

struct AccountHandlers {
    ledger: Arc<Ledger>,
    audit: Option<Arc<AuditLog>>,
}

impl AccountHandlers {
    fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            audit: None,
        }
    }

    fn note(&self, entry: String) {
        if let Some(audit) = &self.audit {
            audit.push(entry);
        }
    }

    fn open(&self, cmd: Arc<OpenAccount>) -> Result<(), LedgerError> {
        let mut balances = self.ledger.balances.lock();
        if balances.contains_key(&cmd.owner) {
            return Err(LedgerError::AccountExists(cmd.owner.clone()));
        }
        balances.insert(cmd.owner.clone(), 0);
        Ok(())
    }

    fn deposit(&self, cmd: Arc<Deposit>) -> Result<u64, LedgerError> {
        let mut balances = self.ledger.balances.lock();
        let balance = balances
            .get_mut(&cmd.owner)
            .ok_or_else(|| LedgerError::UnknownAccount(cmd.owner.clone()))?;
        *balance += cmd.amount;
        self.note(format!("{} deposited {}", cmd.owner, cmd.amount));
        Ok(*balance)
    }

    fn withdraw(&self, cmd: Arc<Withdraw>) -> Result<u64, LedgerError> {
        let mut balances = self.ledger.balances.lock();
        let balance = balances
            .get_mut(&cmd.owner)
            .ok_or_else(|| LedgerError::UnknownAccount(cmd.owner.clone()))?;
        if *balance < cmd.amount {
            return Err(LedgerError::InsufficientFunds {
                balance: *balance,
                requested: cmd.amount,
            });
        }
        *balance -= cmd.amount;
        self.note(format!("{} withdrew {}", cmd.owner, cmd.amount));
        Ok(*balance)
    }

    fn balance(&self, query: Arc<Balance>) -> Reply<Option<u64>> {
        Reply(self.ledger.balances.lock().get(&query.owner).copied())
    }

    async fn statement(
        self: Arc<Self>,
        query: Arc<Statement>,
        audit: Arc<AuditLog>,
        token: CancellationToken,
    ) -> Reply<Vec<String>> {
        if token.is_cancelled() {
            return Reply(Vec::new());
        }
        Reply(audit.for_owner(&query.owner))
    }
}

struct NotificationHandlers {
    audit: Arc<AuditLog>,
}

impl NotificationHandlers {
    fn new(audit: Arc<AuditLog>) -> Self {
        Self { audit }
    }

    fn opened(&self, event: Arc<AccountOpened>) {
        info!(owner = %event.owner, "Welcome aboard");
        self.audit.push(format!("{} opened an account", event.owner));
    }
}

fn register_ledger(catalog: &mut HandlerCatalog) {
    catalog
        .register::<AccountHandlers>()
        .marker(MessageKind::Command)
        .marker(MessageKind::Query)
        .constructor(AccountHandlers::new)
        .property(|h: &mut AccountHandlers| &mut h.audit)
        .handles::<OpenAccount, _, _>(AccountHandlers::open)
        .handles::<Deposit, _, _>(AccountHandlers::deposit)
        .handles::<Withdraw, _, _>(AccountHandlers::withdraw)
        .handles::<Balance, _, _>(AccountHandlers::balance)
        .handles_async::<Statement, _, _>(AccountHandlers::statement);
    catalog
        .register::<NotificationHandlers>()
        .marker(MessageKind::Event)
        .constructor(NotificationHandlers::new)
        .handles::<AccountOpened, _, _>(NotificationHandlers::opened);
    catalog
        .register::<Summary>()
        .marker(MessageKind::Query)
        .handles::<Summary, _, _>(Summary::handle);
}

#[distributed_slice(HANDLER_MODULES)]
#[linkme(crate = missive::framework::linkme)]
static LEDGER: fn(&mut HandlerCatalog) = register_ledger;

fn positive(amount: u64) -> Result<(), String> {
    if amount == 0 {
        Err("amount must be positive".into())
    } else {
        Ok(())
    }
}

fn validation() -> ValidationMiddleware {
    ValidationMiddleware::new()
        .rule(|cmd: &OpenAccount| {
            if cmd.owner.trim().is_empty() {
                Err("owner cannot be empty".into())
            } else {
                Ok(())
            }
        })
        .rule(|cmd: &Deposit| positive(cmd.amount))
        .rule(|cmd: &Withdraw| positive(cmd.amount))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "ledger-demo", about = "Drive an account ledger through the message bus")]
struct Args {
    /// Configuration file; searches for missive.toml when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile.
    #[arg(short, long)]
    profile: Option<String>,

    /// Print recorded messages matching a filter such as "status=Failed,take=5".
    #[arg(long)]
    history: Option<String>,

    /// Keep the bus running until Ctrl+C.
    #[arg(long)]
    serve: bool,
}

async fn run_script(bus: &MessageBus) -> Result<()> {
    for owner in ["ada", "grace"] {
        bus.send_async(OpenAccount {
            owner: owner.into(),
        })
        .await?;
        bus.publish_async(AccountOpened {
            owner: owner.into(),
        })
        .await?;
    }

    bus.send(Deposit {
        owner: "ada".into(),
        amount: 120,
    })?;
    bus.send(Withdraw {
        owner: "ada".into(),
        amount: 30,
    })?;

    if let Err(e) = bus.send(Withdraw {
        owner: "grace".into(),
        amount: 500,
    }) {
        warn!(error = %e, "Withdrawal refused");
    }
    if let Err(e) = bus.send(Deposit {
        owner: "ada".into(),
        amount: 0,
    }) {
        warn!(error = %e, "Deposit refused");
    }

    let balance: Option<u64> = bus.query(Balance {
        owner: "ada".into(),
    })?;
    info!(owner = "ada", ?balance, "Balance");

    let statement: Vec<String> = bus
        .query_async(Statement {
            owner: "ada".into(),
        })
        .await?;
    for line in &statement {
        info!("  {line}");
    }

    let (accounts, total): (usize, u64) = bus.query(Summary)?;
    info!(accounts, total, "Ledger summary");
    Ok(())
}

fn print_history(bus: &MessageBus, filter: &str) -> Result<()> {
    let Some(repository) = bus.repository() else {
        warn!("Message recording is disabled; set pipeline.record_messages = true");
        return Ok(());
    };
    let query: MessageQuery = filter
        .parse()
        .with_context(|| format!("invalid history filter `{filter}`"))?;
    for record in repository.query(&query)? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile.as_str());
    }
    let config = loader.load().context("failed to load configuration")?;
    logging::init_from_config(&config.logging);

    let services = Arc::new(ServiceRegistry::new());
    services
        .singleton(Ledger::default())
        .singleton(AuditLog::default());

    let bus = MessageBus::builder()
        .resolver(services)
        .config(config.pipeline.clone())
        .validation(validation())
        .build()?;

    run_script(&bus).await?;

    if let Some(filter) = &args.history {
        print_history(&bus, filter)?;
    }

    if args.serve {
        bus.run_until_ctrl_c().await?;
    } else {
        bus.shutdown();
    }
    Ok(())
}
