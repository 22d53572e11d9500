use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use crypto_devs_mint::sim::{Mining, SimulatedSale, PRESALE_DURATION_SECS};
use crypto_devs_mint::{ClientConfig, MintClient, SaleState, UserAction};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Crypto Devs presale and public mint client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a whole sale against the in-process ledger and print every view and toast
    Demo {
        /// Client configuration (TOML); defaults are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override both polling intervals; the configured ones are kept when omitted
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Public mints to attempt after the presale
        #[arg(long, default_value_t = 3)]
        public_mints: u32,

        /// Probability that a contract read fails
        #[arg(long, default_value_t = 0.0)]
        read_failure_rate: f64,

        /// Seed for injected read failures
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Write the default configuration to a file
    GenerateConfig {
        #[arg(long, default_value = "crypto-devs.toml")]
        path: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::GenerateConfig { path } => {
            ClientConfig::default()
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote default configuration to {}", path.display());
            Ok(())
        }
        Command::Demo {
            config,
            interval_ms,
            public_mints,
            read_failure_rate,
            seed,
        } => {
            let mut config = match config {
                Some(path) => ClientConfig::load(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => ClientConfig::default(),
            };
            override_intervals(&mut config, interval_ms);
            run_demo(config, public_mints, read_failure_rate, seed).await
        }
    }
}

fn override_intervals(config: &mut ClientConfig, interval_ms: Option<u64>) {
    if let Some(ms) = interval_ms {
        config.polling.phase_interval_ms = ms;
        config.polling.token_interval_ms = ms;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run_demo(
    mut config: ClientConfig,
    public_mints: u32,
    read_failure_rate: f64,
    seed: u64,
) -> Result<()> {
    let sale = SimulatedSale::new(&config)?;
    sale.wallet.set_mining(Mining::Auto(Duration::from_millis(200)));
    if read_failure_rate > 0.0 {
        sale.wallet.set_read_failure_rate(read_failure_rate, seed);
    }
    config.contract.address = sale.wallet.contract_address();
    let settle = config.polling.phase_interval() * 20;

    let client = MintClient::new(config, sale.wallet.clone(), sale.clock.clone())?;
    let mut toasts = client.subscribe_notifications();
    let printer = tokio::spawn(async move {
        while let Ok(toast) = toasts.recv().await {
            println!("{toast}");
        }
    });

    client.start();
    show(&client);

    client.handle(UserAction::Connect).await?;
    let mut state = client.subscribe_state();
    settled(&mut state, settle, |s| s.is_owner).await?;
    show(&client);

    // The deployer opens the presale.
    act(&client, UserAction::StartPresale).await;
    show(&client);

    // Two whitelisted buyers and one who is not.
    for buyer in &sale.buyers {
        sale.wallet.select_account(*buyer);
        info!(account = %buyer, "switched wallet account");
        act(&client, UserAction::PresaleMint).await;
    }
    show(&client);

    let now = sale.clock.advance(PRESALE_DURATION_SECS);
    info!(now, "presale window elapsed");
    settled(&mut state, settle, |s| s.presale_ended).await?;
    show(&client);

    for _ in 0..public_mints {
        act(&client, UserAction::PublicMint).await;
    }
    let minted = sale.wallet.ledger(|ledger| ledger.token_ids());
    settled(&mut state, settle, |s| s.tokens_minted == minted).await?;
    show(&client);

    client.shutdown().await;
    drop(client);
    let _ = printer.await;

    let (minted, collected) = sale
        .wallet
        .ledger(|ledger| (ledger.token_ids(), ledger.collected()));
    println!(
        "sale closed with {minted} tokens minted, {} wei collected, {} blocks",
        collected,
        sale.wallet.block_number()
    );
    Ok(())
}

async fn act(client: &MintClient, action: UserAction) {
    if let Err(err) = client.handle(action).await {
        warn!(?action, error = %err, "action failed");
    }
}

async fn settled(
    state: &mut watch::Receiver<SaleState>,
    within: Duration,
    done: impl FnMut(&SaleState) -> bool,
) -> Result<()> {
    tokio::time::timeout(within, state.wait_for(done))
        .await
        .map_err(|_| anyhow!("sale state did not settle within {within:?}"))?
        .map_err(|_| anyhow!("sale state channel closed"))?;
    Ok(())
}

fn show(client: &MintClient) {
    println!("----------------------------------------");
    println!("{}", client.view());
    println!("----------------------------------------");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_intervals(args: &[&str]) -> Option<u64> {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Demo { interval_ms, .. } => interval_ms,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn configured_intervals_survive_without_flag() {
        let mut config = ClientConfig::default();
        config.polling.phase_interval_ms = 1_234;
        config.polling.token_interval_ms = 4_321;

        let interval_ms = demo_intervals(&["crypto-devs", "demo"]);
        assert_eq!(interval_ms, None);
        override_intervals(&mut config, interval_ms);
        assert_eq!(config.polling.phase_interval_ms, 1_234);
        assert_eq!(config.polling.token_interval_ms, 4_321);

        let interval_ms = demo_intervals(&["crypto-devs", "demo", "--interval-ms", "250"]);
        override_intervals(&mut config, interval_ms);
        assert_eq!(config.polling.phase_interval_ms, 250);
        assert_eq!(config.polling.token_interval_ms, 250);
    }
}
