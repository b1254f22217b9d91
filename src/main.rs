use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use subghz_link::constants::BROADCAST_ADDRESS;
use subghz_link::link::buffer::TxPhase;
use subghz_link::util::decode_hex;
use subghz_link::{init_logger, log_info, CipherKey, Ether, LinkConfig, LinkEvent, RadioLink};
use tokio::time::{sleep, sleep_until, Instant};

const DEMO_KEY: [u8; 16] = [
    0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C,
];

#[derive(Parser)]
#[command(name = "subghz-cli")]
#[command(about = "CLI tool for the sub-GHz packet link")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective link configuration as JSON
    Config {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Exchange frames between two stations on a simulated ether
    Ping {
        #[arg(short, long, default_value = "5")]
        count: u32,
        /// Probability that a transmission is lost
        #[arg(short, long, default_value = "0.0")]
        loss: f64,
        #[arg(short, long, default_value = "1")]
        seed: u64,
        #[arg(short, long, default_value = "ping")]
        payload: String,
        /// 128-bit link key as 32 hex digits
        #[arg(short, long)]
        key: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn load_config(file: Option<&PathBuf>) -> Result<LinkConfig> {
    match file {
        Some(path) => LinkConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(LinkConfig::default()),
    }
}

fn parse_key(hex: Option<&str>) -> Result<CipherKey> {
    let Some(hex) = hex else {
        return Ok(CipherKey::new(DEMO_KEY));
    };
    let bytes = decode_hex(hex).context("decoding link key")?;
    CipherKey::from_slice(&bytes)
        .with_context(|| format!("link key must be 16 bytes, got {}", bytes.len()))
}

async fn ping(
    config: LinkConfig,
    key: CipherKey,
    count: u32,
    loss: f64,
    seed: u64,
    payload: &str,
) -> Result<()> {
    let ether = Ether::with_seed(seed);
    ether.set_loss(loss);

    let (origin, mut origin_events) = RadioLink::init(
        ether.attach_with_capacity(1, config.max_frame_size),
        config.clone(),
        key.clone(),
        1,
    )
    .context("starting station 0x01")?;
    let (peer, mut peer_events) = RadioLink::init(
        ether.attach_with_capacity(2, config.max_frame_size),
        config.clone(),
        key,
        2,
    )
    .context("starting station 0x02")?;

    let window = config.ack_timeout() * (config.retry_budget as u32 + 1) + Duration::from_millis(500);
    let mut delivered = 0;

    for i in 0..count {
        origin.try_send(BROADCAST_ADDRESS, payload.as_bytes())?;
        let deadline = Instant::now() + window;

        loop {
            tokio::select! {
                Some(event) = peer_events.recv() => {
                    if let LinkEvent::MessageAvailable { .. } = event {
                        let mut source = 0;
                        let mut buf = vec![0u8; config.max_payload()];
                        let n = peer.read(&mut source, &mut buf);
                        if n > 0 {
                            println!(
                                "ping {i}: 0x02 read {:?} from 0x{source:02X} (rssi {}, lqi {})",
                                String::from_utf8_lossy(&buf[..n]),
                                peer.rssi(),
                                peer.lqi()
                            );
                        }
                    }
                }
                Some(event) = origin_events.recv() => {
                    if let LinkEvent::DataSent { sequence, .. } = event {
                        println!("ping {i}: 0x01 data_sent seq={sequence}");
                        delivered += 1;
                        break;
                    }
                }
                _ = sleep_until(deadline) => {
                    println!("ping {i}: no ACK");
                    break;
                }
            }
        }

        while origin.tx_phase() != TxPhase::Free {
            sleep(Duration::from_millis(5)).await;
        }
    }

    println!("{delivered}/{count} acknowledged");
    println!("0x01 stats: {}", serde_json::to_string_pretty(&origin.stats())?);
    println!("0x02 stats: {}", serde_json::to_string_pretty(&peer.stats())?);

    origin.shutdown()?;
    peer.shutdown()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { file } => {
            let config = load_config(file.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Ping {
            count,
            loss,
            seed,
            payload,
            key,
            file,
        } => {
            let config = load_config(file.as_ref())?;
            let key = parse_key(key.as_deref())?;
            log_info(&format!("Pinging over simulated ether, loss {loss}, seed {seed}"));
            ping(config, key, count, loss, seed, &payload).await?;
        }
    }

    Ok(())
}
