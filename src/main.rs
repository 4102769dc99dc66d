//! `subsync` command line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subsync::config::{default_config_path, load_config};
use subsync::sync::{fetch_all, synchronize, HttpFetcher, SyncRequest, Target};

#[derive(Parser, Debug)]
#[command(name = "subsync", version)]
#[command(about = "Merge proxy subscriptions into Surge and Clash configs", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every source and render one document
    Sync {
        /// Output format: surge or clash
        #[arg(short, long, value_parser = parse_target)]
        target: Target,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate config, group rules and templates without fetching
    Check {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn parse_target(s: &str) -> Result<Target, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "subsync=debug" } else { "subsync=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Sync {
            target,
            config,
            output,
        } => run_sync(target, config, output).await,
        Command::Check { config } => run_check(config),
    }
}

async fn run_sync(target: Target, config: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let config_path = config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;

    let (manual, manual_warnings) = config.load_manual()?;
    let templates = config.templates_for(target)?;
    let fetcher = HttpFetcher::new(
        config.user_agent(target),
        config.fetch_timeout(),
        config.cache_ttl(),
    )?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, finishing with sources fetched so far");
            ctrl_c.cancel();
        }
    });

    let sources = config.source_specs();
    tracing::info!("fetching {} source(s) for {target}", sources.len());
    let payloads = fetch_all(&sources, &fetcher, config.fetch_timeout(), &token).await;

    let request = SyncRequest {
        sources: payloads,
        manual,
        rules: config.rule_set(),
        chain: config.chain_spec()?,
        templates,
        render: config.render_options(),
        generated_at: chrono::Utc::now(),
    };
    let out = synchronize(&request, target)?;

    let total = manual_warnings.len() + out.warnings.len();
    if total > 0 {
        tracing::warn!("sync finished with {total} warning(s)");
    }

    match output {
        Some(path) => {
            tokio::fs::write(&path, &out.document)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("wrote {}", path.display());
        }
        None => {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(out.document.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

fn run_check(config: Option<PathBuf>) -> Result<()> {
    let config_path = config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;
    config.check_groups()?;

    for target in [Target::Surge, Target::Clash] {
        match config.load_template(target) {
            Ok(_) => tracing::info!("{target} template ok"),
            Err(e) => tracing::warn!("{e:#}"),
        }
    }
    let (manual, warnings) = config.load_manual()?;
    tracing::info!(
        "config ok: {} source(s), {} group(s), {} manual node(s), {} manual warning(s)",
        config.sources.len(),
        config.groups.len(),
        manual.len(),
        warnings.len()
    );
    Ok(())
}
