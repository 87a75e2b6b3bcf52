use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;

use airscout::config::Config;
use airscout::iface;
use airscout::report;
use airscout::session::ScanSession;

#[derive(Parser)]
#[command(name = "airscout")]
#[command(author, version, about = "Passive Wi-Fi scanner with guaranteed interface restoration")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scan session
    Scan {
        /// Interface to scan on (auto-detected when omitted)
        #[arg(short, long)]
        interface: Option<String>,

        /// Base directory for session output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Band flags for the capture tool (repeatable; e.g. bg, abg)
        #[arg(short, long)]
        band: Vec<String>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Disable the live results table
        #[arg(long)]
        no_live: bool,

        /// Print the final record set as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List wireless interfaces
    Interfaces,

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for the interface listing
#[derive(Tabled)]
struct InterfaceRow {
    #[tabled(rename = "Interface")]
    name: String,
    #[tabled(rename = "Phy")]
    phy: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "MAC")]
    mac: String,
}

pub async fn run_command(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Scan {
            interface,
            output,
            band,
            duration,
            no_live,
            json,
        } => cmd_scan(config, interface, output, band, duration, no_live, json).await,
        Commands::Interfaces => cmd_interfaces().map(|_| 0),
        Commands::GenConfig { output } => cmd_gen_config(output).map(|_| 0),
    }
}

async fn cmd_scan(
    mut config: Config,
    interface: Option<String>,
    output: Option<PathBuf>,
    band: Vec<String>,
    duration: Option<u64>,
    no_live: bool,
    json: bool,
) -> Result<i32> {
    if !band.is_empty() {
        config.capture.bands = band;
    }
    if let Some(dir) = output {
        config.general.output_dir = dir;
    }
    if no_live || json {
        config.general.live_view = false;
    }

    let interface = match interface.or_else(|| config.general.interface.clone()) {
        Some(name) => name,
        None => match iface::pick_interface() {
            Ok(name) => {
                println!("Auto-selected interface {}", name.cyan());
                name
            }
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                return Ok(2);
            }
        },
    };

    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let work_dir = config.general.output_dir.join(stamp);
    if let Err(e) = std::fs::create_dir_all(&work_dir) {
        eprintln!(
            "{} cannot create {}: {}",
            "Error:".red().bold(),
            work_dir.display(),
            e
        );
        return Ok(2);
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            if !signal_cancel.is_cancelled() {
                println!("\n{}", "Stopping scan...".yellow());
            }
            // Re-cancelling an already-cancelled token is a no-op, so a
            // second interrupt cannot trigger a second teardown.
            signal_cancel.cancel();
        }
    });
    if let Some(secs) = duration {
        let timer_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            timer_cancel.cancel();
        });
    }

    println!(
        "Scanning on {}; results in {}",
        interface.cyan().bold(),
        work_dir.display()
    );

    let live = config.general.live_view;
    let session = ScanSession::new(&config, interface.clone(), work_dir.clone(), live);
    let session_report = session.run(cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&session_report.records)?);
    } else {
        report::render_summary(&session_report, &interface);
    }

    if !session_report.records.is_empty() {
        match report::write_json(&session_report.records, &work_dir) {
            Ok(path) => println!("Records written to {}", path.display()),
            Err(e) => eprintln!(
                "{} failed to write records: {:#}",
                "Warning:".yellow().bold(),
                e
            ),
        }
    }

    Ok(session_report.exit_code())
}

fn cmd_interfaces() -> Result<()> {
    let interfaces =
        iface::list_interfaces().context("Failed to enumerate wireless interfaces")?;

    if interfaces.is_empty() {
        println!("No wireless interfaces found");
        return Ok(());
    }

    let rows: Vec<InterfaceRow> = interfaces
        .iter()
        .map(|i| InterfaceRow {
            name: i.name.clone(),
            phy: i
                .phy
                .map(|p| format!("phy{}", p))
                .unwrap_or_else(|| "-".to_string()),
            mode: i.mode.to_string(),
            channel: i
                .channel
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            mac: i.mac.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}
