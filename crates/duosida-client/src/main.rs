//! `duosida` command-line entry point.
//!
//! ```text
//! duosida discover [--timeout SECS]
//! duosida status      --host H --device-id ID [--json]
//! duosida set-current --host H --device-id ID AMPS
//! duosida set         --host H --device-id ID <SETTING> VALUE
//! duosida monitor     --host H --device-id ID [--interval S] [--duration S] [--json]
//! ```
//!
//! Connection arguments fall back to `DUOSIDA_HOST`, `DUOSIDA_DEVICE_ID` and
//! `DUOSIDA_PORT`, then to the `[charger]` section of the config file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use duosida_client::infrastructure::storage::config::{load_config, AppConfig};
use duosida_client::{
    monitor, ChargerSession, DiscoveryClient, MonitorOptions, MonitorOutcome,
};
use duosida_core::domain::{ChargerIdentity, ChargerSetting, LedBrightness};

/// Pause between a write and the status read that follows it.
const POST_WRITE_DELAY: Duration = Duration::from_secs(1);

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "duosida",
    about = "Local-network control for Duosida EV chargers",
    version
)]
struct Cli {
    /// Config file to read instead of the platform default.
    #[arg(long, global = true, env = "DUOSIDA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find chargers on the local network.
    Discover {
        /// Seconds to wait for replies.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Read one telemetry snapshot.
    Status {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        json: bool,
    },
    /// Set the maximum charging current (6-32 A).
    SetCurrent {
        #[command(flatten)]
        target: Target,
        amps: u32,
    },
    /// Write a configuration value.
    Set {
        #[command(flatten)]
        target: Target,
        #[arg(value_enum)]
        setting: SettingName,
        /// Number for numeric settings, off|low|medium|high for LED
        /// brightness, on|off for direct mode.
        value: String,
    },
    /// Poll telemetry until Ctrl-C.
    Monitor {
        #[command(flatten)]
        target: Target,
        /// Seconds between readings.
        #[arg(long)]
        interval: Option<f64>,
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<f64>,
        /// One JSON object per line.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct Target {
    /// Charger IP address or hostname.
    #[arg(long, env = "DUOSIDA_HOST")]
    host: Option<String>,
    /// Charger device id (19 digits, printed by `discover`).
    #[arg(long, env = "DUOSIDA_DEVICE_ID")]
    device_id: Option<String>,
    /// Charger TCP port.
    #[arg(long, env = "DUOSIDA_PORT")]
    port: Option<u16>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SettingName {
    IdleTimeout,
    MaxTemperature,
    MaxVoltage,
    MinVoltage,
    LedBrightness,
    DirectMode,
}

impl SettingName {
    fn with_value(self, raw: &str) -> anyhow::Result<ChargerSetting> {
        let number = || -> anyhow::Result<u32> {
            raw.trim()
                .parse()
                .with_context(|| format!("'{raw}' is not a whole number"))
        };
        Ok(match self {
            SettingName::IdleTimeout => ChargerSetting::IdleTimeout(number()?),
            SettingName::MaxTemperature => ChargerSetting::MaxTemperature(number()?),
            SettingName::MaxVoltage => ChargerSetting::MaxVoltage(number()?),
            SettingName::MinVoltage => ChargerSetting::MinVoltage(number()?),
            SettingName::LedBrightness => {
                ChargerSetting::LedBrightness(raw.parse::<LedBrightness>()?)
            }
            SettingName::DirectMode => ChargerSetting::DirectMode(parse_switch(raw)?),
        })
    }
}

fn parse_switch(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => Err(anyhow!("'{other}' is not on/off")),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &AppConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Discover { timeout, json } => discover(config, timeout, json).await,
        Command::Status { target, json } => {
            let mut session = connect(config, &target).await?;
            let result = session.get_status().await;
            session.disconnect().await;
            let status = result.context("failed to read status")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{status}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::SetCurrent { target, amps } => {
            let setting = ChargerSetting::MaxCurrent(amps);
            setting.validate()?;
            write_setting(config, &target, setting).await
        }
        Command::Set {
            target,
            setting,
            value,
        } => {
            let setting = setting.with_value(&value)?;
            setting.validate()?;
            write_setting(config, &target, setting).await
        }
        Command::Monitor {
            target,
            interval,
            duration,
            json,
        } => {
            let mut options = config.monitor_options();
            if let Some(secs) = interval {
                options.interval = seconds(secs, "--interval")?;
            }
            options.max_duration = duration.map(|d| seconds(d, "--duration")).transpose()?;
            run_monitor(config, &target, options, json).await
        }
    }
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| anyhow!("{flag} must be a positive number of seconds"))
}

async fn connect(config: &AppConfig, target: &Target) -> anyhow::Result<ChargerSession> {
    let host = target
        .host
        .clone()
        .or_else(|| config.charger.host.clone())
        .context("no charger host: pass --host, set DUOSIDA_HOST or add [charger] host")?;
    let device_id = target
        .device_id
        .clone()
        .or_else(|| config.charger.device_id.clone())
        .context(
            "no device id: pass --device-id, set DUOSIDA_DEVICE_ID or add [charger] device_id",
        )?;

    let mut session = ChargerSession::new(config.session_config(target.port));
    session.connect(&host, &device_id).await?;
    Ok(session)
}

async fn discover(config: &AppConfig, timeout: Option<u64>, json: bool) -> anyhow::Result<ExitCode> {
    let timeout = Duration::from_secs(timeout.unwrap_or(config.discovery.timeout_secs));
    if !json {
        println!("Discovering Duosida chargers (timeout: {}s)...\n", timeout.as_secs());
    }

    let client = DiscoveryClient::new(config.discovery_config());
    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_ctrl_c(stop_tx);
    let chargers = client.discover_until(timeout, stop_rx).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chargers)?);
    } else if chargers.is_empty() {
        println!("No devices found.");
        println!("\nPossible reasons:");
        println!("  - No Duosida chargers on this network");
        println!("  - Charger is on a different subnet");
        println!("  - Firewall blocking UDP port 48890/48899");
    } else {
        println!("Found {} device(s):\n", chargers.len());
        for (i, charger) in chargers.iter().enumerate() {
            print_identity(i + 1, charger);
        }
    }

    Ok(if chargers.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_identity(index: usize, charger: &ChargerIdentity) {
    println!("  {index}. {}", charger.ip);
    if !charger.device_id.is_empty() {
        println!("     Device ID: {}", charger.device_id);
    }
    println!("     MAC: {}", charger.mac);
    if let Some(model) = &charger.model {
        println!("     Type: {model}");
    }
    if let Some(firmware) = &charger.firmware {
        println!("     Firmware: {firmware}");
    }
    println!();
}

async fn write_setting(
    config: &AppConfig,
    target: &Target,
    setting: ChargerSetting,
) -> anyhow::Result<ExitCode> {
    let mut session = connect(config, target).await?;

    if let Err(e) = session.set_setting(setting).await {
        session.disconnect().await;
        return Err(e).with_context(|| format!("failed to set {}", setting.name()));
    }
    println!("Set {setting}");

    tokio::time::sleep(POST_WRITE_DELAY).await;
    match session.get_status().await {
        Ok(status) => println!("\nNew status:\n{status}"),
        Err(e) => eprintln!("warning: could not read status after write: {e}"),
    }
    session.disconnect().await;
    Ok(ExitCode::SUCCESS)
}

async fn run_monitor(
    config: &AppConfig,
    target: &Target,
    options: MonitorOptions,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let mut session = connect(config, target).await?;
    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_ctrl_c(stop_tx);

    if !json {
        println!("Monitoring charger every {:?} (Ctrl+C to stop)...", options.interval);
    }

    let outcome = monitor(
        &mut session,
        options,
        |reading| match reading {
            Ok(status) if json => match serde_json::to_string(status) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("warning: could not serialise reading: {e}"),
            },
            Ok(status) => {
                println!("\n{}", "=".repeat(60));
                println!("{status}");
                println!("{}", "=".repeat(60));
            }
            Err(e) => eprintln!("[!] Error: {e}"),
        },
        stop_rx,
    )
    .await;

    session.disconnect().await;
    match outcome {
        MonitorOutcome::Stopped => Ok(ExitCode::SUCCESS),
        MonitorOutcome::Faulted(e) => Err(e).context("monitoring ended"),
    }
}

fn spawn_ctrl_c(stop_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });
}
