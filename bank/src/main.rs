//! Entry point for `bank`.
//!
//! Runs either the bank **server** or a one-shot **client** command.  All
//! protocol work lives in the library crates; `main.rs` owns only process
//! setup (logging, argument parsing) and printing results.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bank::{BankClient, BankService, Credentials, Currency, Monitor};
use clap::{Args, Parser, Subcommand};
use udp_rpc::{
    ClientConfig, HistoryConfig, RetryPolicy, Semantics, Server, ServerConfig, SimulatorConfig,
};

/// Bank accounts over UDP with selectable invocation semantics.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the bank.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
        /// amo (at-most-once) or alo (at-least-once).
        #[arg(long, default_value = "amo")]
        semantics: Semantics,
        /// Probability of dropping each outgoing datagram.
        #[arg(long, default_value_t = 0.0)]
        loss_rate: f64,
        /// Seconds between sweeps of expired leases and stored replies.
        #[arg(long, default_value_t = 60)]
        sweep_secs: u64,
        /// How long a stored reply can be replayed.
        #[arg(long, default_value_t = 300)]
        history_ttl_secs: u64,
        /// Stored replies above which expired ones are evicted.
        #[arg(long, default_value_t = 10_000)]
        history_capacity: usize,
    },
    /// Send one request to a bank server.
    Client {
        #[command(flatten)]
        session: SessionArgs,
        #[command(subcommand)]
        command: Command,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// Server address.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,
    /// amo (at-most-once) or alo (at-least-once).
    #[arg(long, default_value = "amo")]
    semantics: Semantics,
    /// Probability of dropping each outgoing datagram.
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,
    /// Wait per attempt, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    attempt_ms: u64,
    /// Total retry budget, in seconds.
    #[arg(long, default_value_t = 30)]
    deadline_secs: u64,
}

impl SessionArgs {
    fn config(&self) -> ClientConfig {
        ClientConfig::new(self.server)
            .semantics(self.semantics)
            .retry(RetryPolicy {
                attempt_timeout: Duration::from_millis(self.attempt_ms),
                retry_deadline: Duration::from_secs(self.deadline_secs),
            })
            .faults(SimulatorConfig::lossy(self.loss_rate))
    }
}

#[derive(Args)]
struct Who {
    /// Account id.
    id: i32,
    holder: String,
    secret: String,
}

impl Who {
    fn credentials(&self) -> Credentials {
        Credentials::new(self.id, self.holder.clone(), self.secret.clone())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Open an account.
    Open {
        holder: String,
        secret: String,
        currency: Currency,
        #[arg(default_value_t = 0.0)]
        initial_balance: f64,
    },
    /// Close an account.
    Close {
        #[command(flatten)]
        who: Who,
    },
    /// Show the balance.
    Balance {
        #[command(flatten)]
        who: Who,
    },
    Deposit {
        #[command(flatten)]
        who: Who,
        currency: Currency,
        amount: f64,
    },
    Withdraw {
        #[command(flatten)]
        who: Who,
        currency: Currency,
        amount: f64,
    },
    /// Move money to another account in the same currency.
    Transfer {
        #[command(flatten)]
        who: Who,
        to_id: i32,
        currency: Currency,
        amount: f64,
    },
    /// Quote a currency conversion.
    Exchange {
        #[command(flatten)]
        who: Who,
        from: Currency,
        to: Currency,
        amount: f64,
    },
    /// Show account details.
    Info {
        #[command(flatten)]
        who: Who,
    },
    /// Print account updates for a while.
    Monitor {
        /// Lease length in seconds.
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            semantics,
            loss_rate,
            sweep_secs,
            history_ttl_secs,
            history_capacity,
        } => {
            let config = ServerConfig::new(bind)
                .semantics(semantics)
                .history(HistoryConfig {
                    ttl: Duration::from_secs(history_ttl_secs),
                    capacity: history_capacity,
                })
                .sweep_interval(Duration::from_secs(sweep_secs))
                .faults(SimulatorConfig::lossy(loss_rate));
            let server = Server::bind(config, BankService::new())
                .await
                .with_context(|| format!("binding {bind}"))?;
            server.run().await?;
        }
        Mode::Client { session, command } => run_client(&session, command).await?,
    }

    Ok(())
}

async fn run_client(session: &SessionArgs, command: Command) -> Result<()> {
    if let Command::Monitor { seconds } = command {
        let monitor = Monitor::register(session.config(), Duration::from_secs(seconds)).await?;
        println!("Monitoring for {seconds}s from {}", monitor.local_addr());
        while let Some(update) = monitor.next_update().await? {
            println!("update: {update}");
        }
        println!("Monitor lease ended");
        monitor.close();
        return Ok(());
    }

    let client = BankClient::connect(session.config()).await?;
    match command {
        Command::Open {
            holder,
            secret,
            currency,
            initial_balance,
        } => {
            let id = client
                .open_account(&holder, &secret, currency, initial_balance)
                .await?;
            println!("Account Created. ID: {id}");
        }
        Command::Close { who } => {
            println!("{}", client.close_account(&who.credentials()).await?);
        }
        Command::Balance { who } => {
            let balance = client.check_balance(&who.credentials()).await?;
            println!("Current Balance: {balance:.2}");
        }
        Command::Deposit {
            who,
            currency,
            amount,
        } => {
            let balance = client.deposit(&who.credentials(), currency, amount).await?;
            println!("New Balance: {balance:.2} {currency}");
        }
        Command::Withdraw {
            who,
            currency,
            amount,
        } => {
            let balance = client.withdraw(&who.credentials(), currency, amount).await?;
            println!("New Balance: {balance:.2} {currency}");
        }
        Command::Transfer {
            who,
            to_id,
            currency,
            amount,
        } => {
            let balance = client
                .transfer(&who.credentials(), to_id, currency, amount)
                .await?;
            println!("Transferred {amount:.2} {currency} to #{to_id}. New Balance: {balance:.2}");
        }
        Command::Exchange {
            who,
            from,
            to,
            amount,
        } => {
            let quoted = client.exchange(&who.credentials(), from, to, amount).await?;
            println!("{amount:.2} {from} = {quoted:.2} {to}");
        }
        Command::Info { who } => {
            println!("{}", client.account_info(&who.credentials()).await?);
        }
        Command::Monitor { .. } => {}
    }
    client.close();
    Ok(())
}
