#![forbid(unsafe_code)]
//! Command-line front end for the ledger

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use std::path::PathBuf;
use tracing::Level;
use utxoledger::config::LedgerConfig;
use utxoledger::crypto::{address_from_hex, address_to_hex, KeyPair};
use utxoledger::miner::ProofOfWork;
use utxoledger::Ledger;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "ledger.toml")]
    config: PathBuf,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generates a new key pair and prints its secret and address
    Keygen,
    /// Creates a new chain whose genesis reward goes to ADDRESS
    CreateChain {
        #[arg(long)]
        address: String,
    },
    /// Prints the balance of an address
    GetBalance {
        #[arg(long)]
        address: String,
    },
    /// Sends AMOUNT from the key's address to another address
    Send {
        /// Hex-encoded secret key of the sender
        #[arg(long)]
        from_key: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },
    /// Prints every block from the tip back to genesis
    PrintChain {
        #[arg(long)]
        json: bool,
    },
    /// Rebuilds the UTXO index from the chain
    Reindex,
    /// Lists the unspent outputs of an address
    Utxos {
        #[arg(long)]
        address: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = LedgerConfig::load_or_default(&cli.config)?;
    let sealer = Box::new(ProofOfWork::from_config(&config.mining));

    match cli.command {
        Commands::Keygen => {
            let keypair = KeyPair::generate();
            println!("{}", "New key pair".bright_green().bold());
            println!("  Secret:  {}", keypair.secret_hex().bright_yellow());
            println!("  Address: {}", address_to_hex(&keypair.address()).bright_white());
            println!("{}", "Keep the secret safe; it cannot be recovered.".yellow());
        }
        Commands::CreateChain { address } => {
            let owner = address_from_hex(&address)?;
            let ledger = Ledger::create(config, owner, sealer)?;
            let tip = ledger.tip()?;
            println!("{}", "Chain created".bright_green().bold());
            println!("  Genesis: {}", hex::encode(tip.hash()?).bright_white());
        }
        Commands::GetBalance { address } => {
            let owner = address_from_hex(&address)?;
            let ledger = Ledger::open(config, sealer)?;
            let balance = ledger.get_balance(&owner)?;
            println!("Balance of {}: {}", address.cyan(), balance.to_string().bright_green().bold());
        }
        Commands::Send { from_key, to, amount } => {
            let from = KeyPair::from_secret_hex(&from_key)?;
            let to = address_from_hex(&to)?;
            let ledger = Ledger::open(config, sealer)?;
            let block = ledger.send(&from, to, amount)?;
            println!(
                "{} {} to {} in block {}",
                "Sent".bright_green().bold(),
                amount,
                address_to_hex(&to).cyan(),
                block.height()
            );
        }
        Commands::PrintChain { json } => {
            let ledger = Ledger::open(config, sealer)?;
            if json {
                println!("{}", ledger.export_chain_json()?);
            } else {
                let stdout = std::io::stdout();
                ledger.print_chain(&mut stdout.lock())?;
            }
        }
        Commands::Reindex => {
            let ledger = Ledger::open(config, sealer)?;
            let count = ledger.reset_utxo_set()?;
            println!(
                "{} {} unspent outputs indexed",
                "Done.".bright_green().bold(),
                count
            );
        }
        Commands::Utxos { address } => {
            let owner = address_from_hex(&address)?;
            let ledger = Ledger::open(config, sealer)?;
            let utxos = ledger.unspent_outputs(&owner)?;
            if utxos.is_empty() {
                println!("{}", "No unspent outputs".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Transaction")
                        .fg(TableColor::Cyan)
                        .add_attribute(Attribute::Bold),
                    Cell::new("Output")
                        .fg(TableColor::Cyan)
                        .add_attribute(Attribute::Bold),
                    Cell::new("Value")
                        .fg(TableColor::Cyan)
                        .add_attribute(Attribute::Bold),
                ]);
            for utxo in &utxos {
                table.add_row(vec![
                    Cell::new(hex::encode(utxo.txid)).fg(TableColor::White),
                    Cell::new(utxo.index).fg(TableColor::Grey),
                    Cell::new(utxo.output.value).fg(TableColor::Green),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
