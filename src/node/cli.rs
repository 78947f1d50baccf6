use crate::node::config::AppConfig;
use crate::node::gateway::Gateway;
use crate::quotes::{InMemQuoteProvider, PolicyQuote};
use crate::store::InMemTxStore;
use crate::utils::init_logging;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// CLI for gateway control.
#[derive(Parser)]
#[clap(name = "txgate", version)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[clap(long, default_value = "txgate.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Run the gateway
    Run,
    /// Parse and print the effective configuration, then exit
    CheckConfig,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.cmd {
        Cmd::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Cmd::Run => {
            init_logging();

            let store = Arc::new(InMemTxStore::new());
            let quotes = Arc::new(InMemQuoteProvider::new(Duration::from_secs(
                config.quotes.validity_minutes * 60,
            )));
            quotes.add(default_quote(&config));

            let (_gateway, service) = Gateway::start(config, store, quotes).await?;

            tokio::signal::ctrl_c().await?;
            println!("Shutting down gateway...");
            service.shutdown().await?;
            println!("Gateway stopped");
            Ok(())
        }
    }
}

/// Anonymous quote seeded from the config so submissions work without a
/// quote-management surface.
fn default_quote(config: &AppConfig) -> PolicyQuote {
    use crate::quotes::{Fee, FeeRate, FEE_TYPE_DATA, FEE_TYPE_STANDARD};
    PolicyQuote {
        id: 1,
        created_at: SystemTime::now(),
        valid_from: SystemTime::now(),
        identity: None,
        fees: vec![
            Fee {
                fee_type: FEE_TYPE_STANDARD.into(),
                mining_fee: FeeRate {
                    satoshis: config.quotes.standard_mining_sat_per_kb,
                    bytes: 1000,
                },
                relay_fee: FeeRate {
                    satoshis: config.quotes.standard_relay_sat_per_kb,
                    bytes: 1000,
                },
            },
            Fee {
                fee_type: FEE_TYPE_DATA.into(),
                mining_fee: FeeRate {
                    satoshis: config.quotes.data_mining_sat_per_kb,
                    bytes: 1000,
                },
                relay_fee: FeeRate {
                    satoshis: config.quotes.data_relay_sat_per_kb,
                    bytes: 1000,
                },
            },
        ],
        policies: None,
    }
}
