//! iplimit - per-source-IP rate limiting over iptables
//!
//! Runs the HTTP control plane, or performs a single rule-set operation from
//! the command line.
//!
//! # Usage
//!
//! ```bash
//! # Run the control API (default 0.0.0.0:9521)
//! iplimit serve
//! iplimit serve --listen 127.0.0.1:9521
//! iplimit serve --dry-run             # in-memory rule set, iptables untouched
//!
//! # One-off operations
//! iplimit limit 198.51.100.7
//! iplimit limit 10.0.0.0/24 --rate 30/min --burst 50
//! iplimit unlimit 198.51.100.7
//! iplimit check 198.51.100.7
//! iplimit list
//! ```
//!
//! # Security
//!
//! - Usually runs as root; otherwise only iptables and iptables-save are
//!   elevated through `sudo -n`
//! - Targets are validated as IPv4 addresses or CIDRs before any command runs
//! - Whitelisted addresses are never limited or banned
//! - Audit trail of every rule-set mutation

use clap::{Parser, Subcommand};
use iplimit::api::{self, AppState};
use iplimit::audit::AuditLog;
use iplimit::ban::BanClient;
use iplimit::config::{self, AppConfig};
use iplimit::core::backend::RuleBackend;
use iplimit::core::iptables::IptablesBackend;
use iplimit::core::memory::MemoryBackend;
use iplimit::notify::Notifier;
use iplimit::{RateLimit, RateLimitManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "iplimit")]
#[command(about = "Per-source-IP rate limiting over iptables", long_about = None)]
#[command(version, long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    /// Configuration file (default: config.json in the XDG config directory)
    #[arg(short, long, global = true, env = "IPLIMIT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to iplimit.log in the state directory
    #[arg(long, global = true)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control API
    Serve {
        /// Listen address (overrides the config file)
        #[arg(short, long, value_name = "ADDR")]
        listen: Option<SocketAddr>,
        /// Keep rules in memory instead of touching iptables
        #[arg(long)]
        dry_run: bool,
    },
    /// Install the rate-limit rule group for an IP or CIDR
    Limit {
        ip: String,
        /// Protected port
        #[arg(short, long)]
        port: Option<u16>,
        /// Steady rate, e.g. 10/min
        #[arg(short, long)]
        rate: Option<RateLimit>,
        /// Burst allowance
        #[arg(short, long)]
        burst: Option<u32>,
    },
    /// Remove the rate-limit rule group of an IP or CIDR
    Unlimit {
        ip: String,
        /// Protected port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show whether an IP or CIDR is limited
    Check { ip: String },
    /// List every limited IP and CIDR
    List,
}

fn main() -> ExitCode {
    let _ = iplimit::utils::ensure_dirs();
    let cli = Cli::parse();
    init_logging(cli.log_to_file);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` filtering (default `info`) to stderr, optionally mirrored to
/// a file in the state directory
fn init_logging(to_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = to_file
        .then(|| iplimit::utils::get_state_dir().map(|dir| dir.join("iplimit.log")))
        .flatten()
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        })
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

fn build_backend(config: &AppConfig, dry_run: bool) -> Arc<dyn RuleBackend> {
    if dry_run {
        warn!("Dry run: rules are kept in memory, iptables is not touched");
        return Arc::new(MemoryBackend::new());
    }

    if !nix::unistd::getuid().is_root() {
        info!("Not running as root, iptables commands will be elevated");
    }

    Arc::new(
        IptablesBackend::new(&config.iptables_path, &config.iptables_save_path)
            .with_table(&config.table)
            .with_timeout(config.command_timeout()),
    )
}

fn audit_log(config: &AppConfig) -> Option<AuditLog> {
    if !config.audit_enabled {
        return None;
    }
    match AuditLog::new() {
        Ok(audit) => Some(audit),
        Err(e) => {
            warn!("Audit log disabled: {e}");
            None
        }
    }
}

fn target(ip: &str) -> Result<String, Box<dyn std::error::Error>> {
    Ok(iplimit::validators::validate_target(ip)?)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = config::load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { listen, dry_run } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            if let Some(warning) = config.validate()? {
                warn!("{warning}");
            }
            serve(config, dry_run).await?;
        }
        Commands::Limit {
            ip,
            port,
            rate,
            burst,
        } => {
            let ip = target(&ip)?;
            config.policy.port = port.unwrap_or(config.policy.port);
            config.policy.rate = rate.unwrap_or(config.policy.rate);
            config.policy.burst = burst.unwrap_or(config.policy.burst);
            if let Some(warning) = config.validate()? {
                warn!("{warning}");
            }
            if config.whitelist().is_whitelisted(&ip) {
                return Err(format!("{ip} is whitelisted, refusing to limit it").into());
            }

            let manager = RateLimitManager::new(build_backend(&config, false), &config.chain);
            let result = manager.limit(&ip, &config.policy).await;
            if let Some(audit) = audit_log(&config) {
                match &result {
                    Ok(outcome) => audit.log_limit(&ip, Some(outcome.as_ref()), None).await,
                    Err(e) => audit.log_limit(&ip, None, Some(e.to_string())).await,
                }
            }
            let outcome = result?;
            println!("{ip}: {outcome}");
        }
        Commands::Unlimit { ip, port } => {
            let ip = target(&ip)?;
            config.policy.port = port.unwrap_or(config.policy.port);
            config.validate()?;

            let manager = RateLimitManager::new(build_backend(&config, false), &config.chain);
            let result = manager.unlimit(&ip, config.policy.port).await;
            if let Some(audit) = audit_log(&config) {
                match &result {
                    Ok(report) => {
                        audit
                            .log_unlimit(&ip, report.removed, report.still_present, None)
                            .await;
                    }
                    Err(e) => audit.log_unlimit(&ip, 0, false, Some(e.to_string())).await,
                }
            }

            let report = result?;
            println!("{ip}: removed {} rule(s)", report.removed);
            for failure in &report.failures {
                eprintln!("  failed: {} ({})", failure.line, failure.error);
            }
            if report.still_present {
                return Err(format!("rules for {ip} still exist after attempted deletion").into());
            }
        }
        Commands::Check { ip } => {
            let ip = target(&ip)?;
            let manager = RateLimitManager::new(build_backend(&config, false), &config.chain);
            if manager.exists(&ip).await? {
                println!("{ip}: limited");
            } else {
                println!("{ip}: not limited");
            }
        }
        Commands::List => {
            let manager = RateLimitManager::new(build_backend(&config, false), &config.chain);
            let limited = manager.list_limited().await?;
            if limited.is_empty() {
                println!("No limited IPs.");
            }
            for ip in limited {
                println!("{ip}");
            }
        }
    }
    Ok(())
}

async fn serve(config: AppConfig, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let manager = RateLimitManager::new(build_backend(&config, dry_run), &config.chain);

    match manager.snapshot().await {
        Ok(snapshot) => info!(
            rules = snapshot.rule_count(),
            backend = manager.backend().name(),
            "Rule set reachable"
        ),
        Err(e) => {
            warn!("Rule set not reachable at startup: {e}");
            if let Some(translation) = e.translation() {
                warn!("{}", translation.user_message);
                for suggestion in &translation.suggestions {
                    warn!("  - {suggestion}");
                }
            }
        }
    }

    let whitelist = config.whitelist();
    if !whitelist.is_empty() {
        info!("Whitelist: {}", whitelist.entries().join(", "));
    }
    let notifier = Notifier::from_config(&config.notify)?;
    if let Some(notifier) = &notifier {
        info!("Sending notifications to {}", notifier.webhook_url());
    }

    let state = Arc::new(AppState {
        manager,
        policy: config.policy,
        ban: BanClient::new(&config.ban)?.with_whitelist(whitelist.clone()),
        report: config.report.clone(),
        audit: audit_log(&config),
        whitelist,
        notifier,
    });

    info!(
        listen = %config.listen,
        chain = %config.chain,
        port = config.policy.port,
        rate = %config.policy.rate,
        burst = config.policy.burst,
        "Starting iplimit"
    );
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    api::serve(listener, state).await?;
    Ok(())
}
