//! loglens-agent - Loglens host agent
//!
//! Runs on a host, reads the log sources the registry has configured for it,
//! and ships every new line to the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use loglens_ingest::{
    AgentConfig, FingerprintStore, GroupTracker, HostId, HttpRegistry, HttpRegistryConfig,
    LineParser, MemoryRegistry, PassReport, Pipeline, Registry,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_CONFIG_PATH: &str = "/etc/loglens/agent.json";

#[derive(Parser)]
#[command(name = "loglens-agent")]
#[command(about = "Loglens host agent")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new log lines for this host
    Run {
        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Host id, overriding the config file
        #[arg(long, env = "LOGLENS_HOST_ID")]
        host_id: Option<i64>,

        /// Registry API URL, overriding the config file
        #[arg(long, env = "LOGLENS_API_URL")]
        api_url: Option<String>,

        /// Run a single pass even if an interval is configured
        #[arg(long)]
        once: bool,

        /// Use an in-memory registry and print what would be stored
        #[arg(long)]
        dry_run: bool,

        /// Registry fixture for --dry-run
        #[arg(long, requires = "dry_run")]
        fixture: Option<PathBuf>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,

        /// Registry API URL
        #[arg(long, default_value = "http://localhost:5000/api/")]
        api_url: String,

        /// Host id
        #[arg(long, default_value_t = 1)]
        host_id: i64,
    },

    /// Show how a provider pattern parses sample lines
    CheckPattern {
        /// Provider regex with named groups
        #[arg(long)]
        pattern: String,

        /// Lines to parse
        #[arg(required = true)]
        lines: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Run {
            config,
            host_id,
            api_url,
            once,
            dry_run,
            fixture,
        } => {
            let overrides = Overrides {
                host_id: host_id.map(HostId),
                api_url,
            };
            if dry_run {
                dry_run_pass(&config, &overrides, fixture.as_deref()).await?;
            } else {
                run_agent(&config, &overrides, once).await?;
            }
        }

        Commands::InitConfig {
            output,
            api_url,
            host_id,
        } => {
            init_config(&output, api_url, HostId(host_id))?;
        }

        Commands::CheckPattern { pattern, lines } => {
            check_pattern(&pattern, &lines)?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("loglens=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
struct Overrides {
    host_id: Option<HostId>,
    api_url: Option<String>,
}

fn load_config(path: &Path, overrides: &Overrides) -> anyhow::Result<AgentConfig> {
    let mut config = if path.exists() {
        AgentConfig::load(path)?
    } else {
        match (overrides.host_id, overrides.api_url.as_deref()) {
            (Some(host_id), Some(api_url)) => AgentConfig::new(host_id, api_url),
            _ => anyhow::bail!(
                "config file {} not found; pass --host-id and --api-url or run init-config",
                path.display()
            ),
        }
    };

    if let Some(host_id) = overrides.host_id {
        config.host_id = host_id;
    }
    if let Some(api_url) = &overrides.api_url {
        config.api_url.clone_from(api_url);
    }
    config.validate()?;
    Ok(config)
}

fn default_created_by() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("loglens-agent@{host}")
}

/// Cancels the returned token on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
        signal_token.cancel();
    });
    token
}

async fn run_agent(config_path: &Path, overrides: &Overrides, once: bool) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting loglens-agent");

    let config = load_config(config_path, overrides)?;
    info!(
        host = %config.host_id,
        api_url = %config.api_url,
        interval = ?config.pass_interval_secs,
        "loaded config"
    );

    let mut http =
        HttpRegistryConfig::new(config.api_url.clone()).with_timeout(config.request_timeout());
    if let Some(token) = &config.api_token {
        http = http.with_token(token.clone());
    }
    let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(http)?);

    let fingerprints = match &config.state_dir {
        Some(dir) => FingerprintStore::open(dir)
            .with_context(|| format!("failed to open state directory {}", dir.display()))?,
        None => FingerprintStore::in_memory(),
    };

    let pipeline = Pipeline::with_fingerprints(
        registry,
        Arc::new(fingerprints),
        config.pipeline_config(&default_created_by()),
    );
    let token = shutdown_token();
    let interval = if once {
        None
    } else {
        config.pass_interval_secs.map(Duration::from_secs)
    };

    loop {
        let report = pipeline.run_pass(config.host_id, &token).await;
        if report.consumer.dead_lettered > 0 {
            warn!(count = report.consumer.dead_lettered, "some lines could not be stored");
        }

        let Some(interval) = interval else { break };
        if token.is_cancelled() {
            break;
        }

        info!(delay = interval.as_secs(), "next pass in {} seconds", interval.as_secs());
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!("loglens-agent stopped");
    Ok(())
}

async fn dry_run_pass(
    config_path: &Path,
    overrides: &Overrides,
    fixture: Option<&Path>,
) -> anyhow::Result<()> {
    let config = if config_path.exists() {
        load_config(config_path, overrides)?
    } else {
        AgentConfig::new(
            overrides.host_id.unwrap_or(HostId(1)),
            overrides
                .api_url
                .clone()
                .unwrap_or_else(|| "http://localhost/".to_string()),
        )
    };

    let registry = Arc::new(match fixture {
        Some(path) => MemoryRegistry::load_fixture(path)
            .with_context(|| format!("failed to load fixture {}", path.display()))?,
        None => MemoryRegistry::new(),
    });

    let pipeline = Pipeline::new(registry.clone(), config.pipeline_config(&default_created_by()));
    let report = pipeline.run_pass(config.host_id, &shutdown_token()).await;

    for line in registry.lines() {
        println!("{}", serde_json::to_string(&line)?);
    }
    print_report(&report)?;
    Ok(())
}

fn print_report(report: &PassReport) -> anyhow::Result<()> {
    eprintln!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn init_config(output: &Path, api_url: String, host_id: HostId) -> anyhow::Result<()> {
    let mut config = AgentConfig::new(host_id, api_url);
    config.state_dir = Some(PathBuf::from("/var/lib/loglens"));
    config.pass_interval_secs = Some(60);
    config.validate()?;

    config.save(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the file to set your API token, then run:");
    println!("  loglens-agent run --config {}", output.display());

    Ok(())
}

fn check_pattern(pattern: &str, lines: &[String]) -> anyhow::Result<()> {
    let parser = LineParser::new("check-pattern", pattern)?;
    let mut groups = GroupTracker::new();

    for raw in lines {
        let parsed = parser.parse(&mut groups, raw);
        println!("{raw}");
        if parsed.matched {
            println!("  timestamp: {}", parsed.timestamp.to_rfc3339());
            println!("  level:     {}", parsed.level);
            println!("  thread:    {}", parsed.thread);
            println!("  source:    {}", parsed.source);
            println!("  text:      {}", parsed.message);
        } else {
            println!("  (no match, continues the previous entry)");
        }
        println!("  group:     {}", parsed.grouping_id);
        println!();
    }

    Ok(())
}
