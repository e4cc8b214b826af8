//! Decode a Renpho advertisement payload for diagnostics.
//!
//! Usage:
//!   cargo run --bin decode-adv -- 5250031c5257
//!   cargo run --bin decode-adv -- --rssi -70 --json "52 50 03 1c 52 57"

use clap::Parser;
use renpho_ble_bridge::bluetooth::{AdvertisementEvent, DeviceAddress};
use renpho_ble_bridge::coordinator::MergedUpdate;
use renpho_ble_bridge::device::parse_advertisement;
use renpho_ble_bridge::error::{BridgeError, Result};

#[derive(Parser)]
#[command(name = "decode-adv")]
#[command(about = "Decode a Renpho vendor advertisement payload")]
struct Cli {
    /// Payload as hex; spaces and colons are ignored
    payload: String,

    /// Address the payload was received from
    #[arg(long, default_value = "00:00:00:00:00:00")]
    address: String,

    /// Signal strength to record, in dBm
    #[arg(long, default_value_t = -60, allow_hyphen_values = true)]
    rssi: i16,

    /// Print the decoded values as JSON
    #[arg(long)]
    json: bool,
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        return Err(BridgeError::MalformedPayload(format!(
            "odd number of hex digits in {:?}",
            input
        )));
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| BridgeError::MalformedPayload(format!("invalid hex in {:?}", input)))
        })
        .collect()
}

fn run(cli: &Cli) -> Result<()> {
    let address: DeviceAddress = cli.address.parse()?;
    let payload = parse_hex(&cli.payload)?;
    let snapshot = parse_advertisement(&AdvertisementEvent::new(address, cli.rssi, payload))?;
    let update = MergedUpdate::merge(&snapshot, None);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&update)?);
    } else {
        println!("{}", update.title);
        for (key, value) in &update.values {
            let descriptor = key.descriptor();
            println!("  {:<16} {} {}", key.display_name(), value, descriptor.unit);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
