//! # Lotus — Yoga Studio CRM
//!
//! Usage:
//!   lotus serve                          # HTTP API + background scheduler
//!   lotus run-scheduler                  # One automation pass, then exit
//!   lotus process-queue --channel email  # Drain due messages for one channel
//!   lotus trigger <lead-id> first-class  # Start a sequence for a lead
//!   lotus import clients.csv             # Import the studio client export
//!   lotus qr https://studio.example/join --out join.svg
//!   lotus init-config                    # Write a default config file

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use lotus_core::LotusConfig;
use lotus_core::types::{Channel, Segment, TriggerType};
use lotus_db::CrmDb;
use lotus_scheduler::SchedulerEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lotus", version, about = "🧘 Lotus — Yoga Studio CRM")]
struct Cli {
    /// Config file (defaults to LOTUS_CONFIG or ~/.lotus/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API (and the scheduler when enabled)
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one scheduler pass: queue, re-engagement, lead aging
    RunScheduler,
    /// Send due messages now
    ProcessQueue {
        /// Only this channel (whatsapp or email)
        #[arg(long)]
        channel: Option<Channel>,
    },
    /// Queue a sequence for a lead
    Trigger {
        lead_id: String,
        /// new-lead, intro-purchase, first-class, inactive-90-days, …
        trigger: TriggerType,
        /// Defaults to the lead's segment
        #[arg(long)]
        segment: Option<Segment>,
    },
    /// Import customers from a CSV export
    Import { file: PathBuf },
    /// Render a QR code as SVG
    Qr {
        url: String,
        /// Write the SVG here instead of printing a data URL
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "lotus=debug,lotus_gateway=debug,lotus_scheduler=debug,lotus_db=debug,tower_http=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<LotusConfig> {
    match path {
        Some(p) => {
            let mut config = LotusConfig::load_from(p)
                .with_context(|| format!("loading {}", p.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(LotusConfig::load()?),
    }
}

fn open_db(config: &LotusConfig) -> Result<Arc<CrmDb>> {
    let path = config.database_path();
    let db = CrmDb::open(&path).with_context(|| format!("opening {}", path.display()))?;
    tracing::debug!("🗄️ Database: {}", path.display());
    Ok(Arc::new(db))
}

fn engine(config: &LotusConfig, db: Arc<CrmDb>) -> SchedulerEngine {
    let senders = lotus_channels::build_senders(config);
    SchedulerEngine::new(db, senders, config.scheduler.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Command::InitConfig { force } => {
            let path = cli.config.unwrap_or_else(LotusConfig::default_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            LotusConfig::default().save_to(&path)?;
            println!("✅ Wrote {}", path.display());
        }
        Command::Qr { url, out } => match out {
            Some(out) => {
                let svg = lotus_intake::generate_qr_svg(&url)?;
                std::fs::write(&out, svg)?;
                println!("✅ QR code written to {}", out.display());
            }
            None => println!("{}", lotus_intake::generate_qr_data_url(&url)?),
        },
        Command::Serve { port } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let db = open_db(&config)?;
            println!("🧘 {} v{}", config.studio_name, env!("CARGO_PKG_VERSION"));
            println!("   🌐 API:      http://{}:{}", config.gateway.host, config.gateway.port);
            println!("   🗄️  Database: {}", config.database_path().display());
            println!(
                "   ⏰ Scheduler: {}",
                if config.scheduler.enabled {
                    format!("every {}s", config.scheduler.interval_secs)
                } else {
                    "disabled".to_string()
                }
            );
            lotus_gateway::start(lotus_gateway::AppState::new(config, db)).await?;
        }
        Command::RunScheduler => {
            let config = load_config(cli.config.as_deref())?;
            let db = open_db(&config)?;
            let report = engine(&config, db).run_once(Utc::now()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("scheduler run finished with errors");
            }
        }
        Command::ProcessQueue { channel } => {
            let config = load_config(cli.config.as_deref())?;
            let db = open_db(&config)?;
            let report = engine(&config, db).queue().process(channel, Utc::now()).await?;
            println!("📤 Sent {} message(s), {} failed", report.processed, report.failed);
        }
        Command::Trigger {
            lead_id,
            trigger,
            segment,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let db = open_db(&config)?;
            let segment = match segment {
                Some(s) => s,
                None => db.get_lead(&lead_id)?.segment.unwrap_or_default(),
            };
            let ids = db.trigger_sequence(&lead_id, trigger, segment, Utc::now())?;
            println!("▶️ Queued {} message(s) from the {trigger} sequence ({segment})", ids.len());
        }
        Command::Import { file } => {
            let config = load_config(cli.config.as_deref())?;
            let db = open_db(&config)?;
            let reader = std::fs::File::open(&file)
                .with_context(|| format!("opening {}", file.display()))?;
            let report = lotus_intake::import_customers(&db, reader, Utc::now())?;
            println!(
                "📥 {} row(s): {} imported, {} error(s)",
                report.total, report.imported, report.errors
            );
        }
    }

    Ok(())
}
