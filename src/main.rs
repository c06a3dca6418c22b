use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use loralink_rs::link::{BeaconHandle, BeaconOptions, EchoHandle, EchoOptions};
use loralink_rs::{
    config, init_logger, log_error, log_info, AppConfig, EventSink, LinkError, LogEventSink,
    RadioBackend, RadioHandle,
};

#[derive(Parser)]
#[command(name = "loralink")]
#[command(about = "LoRa point-to-point field-test responder")]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transmit the beacon message periodically
    Beacon {
        /// Message to transmit (default from configuration)
        #[arg(short, long)]
        message: Option<String>,
        /// Interval between transmissions in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },
    /// Echo every received frame back with a prefix
    Echo {
        /// Prefix prepended to each echoed payload
        #[arg(short, long)]
        prefix: Option<String>,
        /// Turnaround delay before echoing, in milliseconds
        #[arg(short, long)]
        delay_ms: Option<u64>,
    },
    /// Print backend version and active radio settings
    Info,
}

#[tokio::main]
async fn main() {
    init_logger();

    let cli = Cli::parse();
    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log_error(&format!("configuration error: {e}"));
            process::exit(2);
        }
    };
    let config = config::init_global(config);

    let radio = match RadioHandle::connect(config).await {
        Ok(radio) => radio,
        Err(e) => {
            log_error(&format!(
                "fatal: {:?} backend failed to initialize: {e}",
                config.lora_backend
            ));
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Beacon {
            message,
            interval_ms,
        } => run_beacon(&radio, config, message, interval_ms).await,
        Commands::Echo { prefix, delay_ms } => run_echo(&radio, config, prefix, delay_ms).await,
        Commands::Info => info(&radio).await,
    };

    let _ = radio.disconnect().await;
    if let Err(e) = result {
        log_error(&format!("{e}"));
        process::exit(1);
    }
}

async fn run_beacon(
    radio: &RadioHandle,
    config: &AppConfig,
    message: Option<String>,
    interval_ms: Option<u64>,
) -> Result<(), LinkError> {
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let beacon = BeaconHandle::spawn(Arc::new(radio.clone()), sink, &config.beacon);
    beacon
        .start(BeaconOptions {
            message: message.map(String::into_bytes),
            interval_ms,
        })
        .await?;
    log_info("beacon running; press ctrl-c to stop");

    wait_for_shutdown().await;

    beacon.stop().await?;
    let stats = beacon.stats().await?;
    log_info(&format!(
        "beacon stopped: {} transmissions submitted, {} failed",
        stats.tx_count, stats.tx_failures
    ));
    Ok(())
}

async fn run_echo(
    radio: &RadioHandle,
    config: &AppConfig,
    prefix: Option<String>,
    delay_ms: Option<u64>,
) -> Result<(), LinkError> {
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let echo = EchoHandle::spawn(Arc::new(radio.clone()), sink, &config.echo);
    echo.start(EchoOptions {
        prefix: prefix.map(String::into_bytes),
        delay_ms,
    })
    .await?;
    log_info("echo responder running; press ctrl-c to stop");

    wait_for_shutdown().await;

    echo.stop().await?;
    let stats = echo.stats().await?;
    log_info(&format!(
        "echo stopped: {} frames received, {} echoes submitted",
        stats.rx_count, stats.tx_count
    ));
    Ok(())
}

async fn info(radio: &RadioHandle) -> Result<(), LinkError> {
    let version = radio.version().await?;
    let settings = radio.get_radio_settings().await?;
    println!("backend:  {}", radio.backend_name());
    println!("version:  {version}");
    println!("frequency: {} Hz", settings.frequency_hz);
    println!("sf:        {}", settings.spreading_factor);
    println!("bandwidth: {} Hz", settings.bandwidth_hz);
    println!("coding:    4/{}", settings.coding_rate);
    println!("power:     {} dBm", settings.tx_power_dbm);
    println!("sync word: 0x{:02X}", settings.sync_word);
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log_error(&format!("signal wait failed: {e}"));
    }
}
