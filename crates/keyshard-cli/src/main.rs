//! Keyshard CLI
//!
//! Command-line tool for splitting, sealing and recovering private keys.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use k256::SecretKey;
use keyshard_core::{
    crypto::parse_public_key,
    decrypt_share, encrypt_share, reconstruct_secret, recover_secret, shamir::verify_against_public_key,
    split, Address, EncryptedShare, ManualClock, RegistryConfig, Secret, Share, ShareRegistry,
    StaticKeyProvider,
};
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "keyshard")]
#[command(about = "Threshold key backup and recovery", version)]
struct Cli {
    /// Registry configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a secret into plain shares (JSON)
    Split {
        /// Secret, hex encoded (1..=32 bytes)
        #[arg(short, long)]
        secret: String,

        /// Number of shares
        #[arg(short = 'n', long, default_value_t = 5)]
        shares: usize,

        /// Shares required to reconstruct
        #[arg(short, long, default_value_t = 3)]
        threshold: usize,
    },

    /// Recombine plain shares from a JSON file
    Reconstruct {
        /// File written by `split`
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value_t = 3)]
        threshold: usize,

        /// Length of the original secret in bytes
        #[arg(short, long, default_value_t = 32)]
        len: usize,
    },

    /// Split a secret and encrypt each share for a public key
    Seal {
        #[arg(short, long)]
        secret: String,

        /// Recipient public key, SEC1 hex
        #[arg(short, long)]
        public_key: String,

        #[arg(short = 'n', long, default_value_t = 5)]
        shares: usize,

        #[arg(short, long, default_value_t = 3)]
        threshold: usize,
    },

    /// Decrypt sealed shares and recombine them
    Open {
        /// File written by `seal`
        #[arg(short, long)]
        input: PathBuf,

        /// Private key, hex
        #[arg(short, long)]
        key: String,

        #[arg(short, long, default_value_t = 3)]
        threshold: usize,

        #[arg(short, long, default_value_t = 32)]
        len: usize,
    },

    /// Run a full store / time-locked recovery flow in memory
    Simulate {
        #[arg(short = 'n', long, default_value_t = 5)]
        shares: usize,

        #[arg(short, long, default_value_t = 3)]
        threshold: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .pretty()
        .init();

    let config = match &cli.config {
        Some(path) => RegistryConfig::from_json_file(path)?,
        None => RegistryConfig::default(),
    };

    match cli.command {
        Commands::Split {
            secret,
            shares,
            threshold,
        } => {
            let shares = split(&parse_secret(&secret)?, shares, threshold)?;
            println!("{}", serde_json::to_string_pretty(&shares)?);
        }
        Commands::Reconstruct {
            input,
            threshold,
            len,
        } => {
            let shares: Vec<Share> = read_json(&input)?;
            let secret = reconstruct_secret(&shares, threshold, len)?;
            println!("0x{}", hex::encode(secret.as_bytes()));
        }
        Commands::Seal {
            secret,
            public_key,
            shares,
            threshold,
        } => {
            let public_key = parse_public_key(&decode_hex(&public_key)?)?;
            let blobs = split(&parse_secret(&secret)?, shares, threshold)?
                .iter()
                .map(|share| encrypt_share(&public_key, share))
                .collect::<keyshard_core::Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&blobs)?);
        }
        Commands::Open {
            input,
            key,
            threshold,
            len,
        } => {
            let key = parse_secret_key(&key)?;
            let blobs: Vec<EncryptedShare> = read_json(&input)?;
            let mut shares = Vec::with_capacity(blobs.len());
            for (index, blob) in blobs.iter().enumerate() {
                match decrypt_share(&key, blob) {
                    Ok(share) => shares.push(share),
                    Err(e) => warn!(index, error = %e, "Skipping share"),
                }
            }
            let secret = reconstruct_secret(&shares, threshold, len)?;
            println!("0x{}", hex::encode(secret.as_bytes()));
        }
        Commands::Simulate { shares, threshold } => {
            run_simulation(config, shares, threshold).await?;
        }
    }

    Ok(())
}

async fn run_simulation(config: RegistryConfig, total: usize, threshold: usize) -> Result<()> {
    info!(total, threshold, "Running in-memory recovery simulation...");

    let clock = Arc::new(ManualClock::starting_now());
    let registry = ShareRegistry::new(config)?.with_clock(clock.clone());
    let time_lock = registry.config().recovery_time_lock();
    let pause = chrono::Duration::seconds(registry.config().min_action_interval_secs + 1);

    let owner_key = SecretKey::random(&mut OsRng);
    let owner = Address::from_public_key(&owner_key.public_key());
    let helper = Address::from_public_key(&SecretKey::random(&mut OsRng).public_key());
    let secret = Secret::new(owner_key.to_bytes().to_vec());

    let blobs = split(&secret, total, threshold)?
        .iter()
        .map(|share| encrypt_share(&owner_key.public_key(), share))
        .collect::<keyshard_core::Result<Vec<_>>>()?;
    let fee = registry.fee_due(&owner);
    let handles = registry.store(owner, blobs, threshold, fee).await?;

    println!("\nOwner: {}", owner);
    println!("Custodians:");
    for handle in &handles {
        println!("  - #{}: {}", handle.index, handle.id);
    }

    clock.advance(pause);
    registry.add_recovery_address(owner, helper).await?;
    let request = registry.initiate_recovery(owner, helper).await?;
    println!("\nRecovery requested by {}, unlocks at {}", helper, request.expires_at);

    let provider = StaticKeyProvider::with_key(owner, owner_key.clone());
    match recover_secret(&registry, owner, helper, &provider, 32).await {
        Ok(_) => bail!("recovery succeeded before the time lock elapsed"),
        Err(e) => println!("Before time lock: refused ({})", e),
    }

    clock.advance(time_lock);
    let recovered = recover_secret(&registry, owner, helper, &provider, 32).await?;
    let matches = verify_against_public_key(&recovered, &owner_key.public_key())?;
    println!("After time lock: recovered key matches owner: {}", matches);

    registry.revoke_shares(owner).await?;
    println!("\nShares revoked");

    let log = registry.audit_log(Some(&owner)).await?;
    println!("\nAudit log:");
    println!("{}", serde_json::to_string_pretty(&log)?);

    Ok(())
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value)).context("invalid hex")
}

fn parse_secret(value: &str) -> Result<Secret> {
    Ok(Secret::new(decode_hex(value)?))
}

fn parse_secret_key(value: &str) -> Result<SecretKey> {
    SecretKey::from_slice(&decode_hex(value)?).context("invalid private key")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
