// src/main.rs
//
// check-node-perf: reserve all the nodes of a cluster and check that they
// exhibit the same cpu, memory, disk and network performance
// -----------------------------------------------------------------------------

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info};

use check_node_perf::api::G5kClient;
use check_node_perf::config::Config;
use check_node_perf::constants::*;
use check_node_perf::deploy::DeployOptions;
use check_node_perf::outdir::{OutputDir, RunMetadata};
use check_node_perf::remote::SshRemote;
use check_node_perf::{acquire_hosts, prepare_hosts, run_benchmarks, BenchContext, BenchmarkKind};

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(
    name = "check-node-perf",
    version,
    about = "Reserve all the available nodes on a cluster and check that nodes exhibit same performance for cpu, disk, network"
)]
struct Cli {
    /// Cluster to reserve
    #[arg(long, default_value = DEFAULT_CLUSTER)]
    cluster: String,

    /// Reservation walltime (H:MM:SS)
    #[arg(short, long, default_value = DEFAULT_WALLTIME)]
    walltime: String,

    /// Name of the job to reuse or create
    #[arg(short, long, default_value = DEFAULT_JOB_NAME)]
    job: String,

    /// Debug output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long)]
    quiet: bool,

    /// Deploy even on hosts that already run the environment
    #[arg(long = "forcedeploy")]
    force_deploy: bool,

    /// Do not deploy; keep the hosts that already run the environment
    #[arg(long = "nodeploy")]
    no_deploy: bool,

    /// Output directory (default: check-node-perf_<timestamp>)
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// YAML configuration file (api, ssh, deployment, benchmarks sections)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Benchmarks to run, in this order
    #[arg(long, value_enum, value_delimiter = ',')]
    benchmarks: Option<Vec<BenchmarkKind>>,

    /// Kadeploy environment
    #[arg(long)]
    env_name: Option<String>,

    /// cpu benchmark: upper bound of the prime search
    #[arg(long)]
    max_prime: Option<u64>,

    /// latency benchmark: echo requests per destination
    #[arg(long)]
    n_ping: Option<u32>,

    /// SSH private key (its .pub must sit next to it)
    #[arg(long)]
    ssh_key: Option<String>,

    /// Grid'5000 API root
    #[arg(long)]
    api_url: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(env_name) = &self.env_name {
            cfg.deployment.env_name = env_name.clone();
        }
        if let Some(max_prime) = self.max_prime {
            cfg.benchmarks.max_prime = max_prime;
        }
        if let Some(n_ping) = self.n_ping {
            cfg.benchmarks.n_ping = n_ping;
        }
        if let Some(key) = &self.ssh_key {
            cfg.ssh.key_path = key.clone();
        }
        if let Some(url) = &self.api_url {
            cfg.api.base_url = url.clone();
        }
    }

    fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

// -----------------------------------------------------------------------------
// main
// -----------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    cfg.apply_env();
    cli.apply_overrides(&mut cfg);

    let outdir = OutputDir::create(cli.outdir.as_deref(), PROGRAM_NAME)?;
    init_logging(cli.log_level(), &outdir.log_path(PROGRAM_NAME))?;

    if let Err(e) = run(&cli, &cfg, &outdir).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: &Cli, cfg: &Config, outdir: &OutputDir) -> Result<()> {
    let started = Instant::now();
    let kinds = cli.benchmarks.clone().unwrap_or_else(|| BenchmarkKind::ALL.to_vec());
    let mut metadata = RunMetadata::new(&cli.job, &cli.cluster, &cli.walltime);
    metadata.benchmarks = kinds.iter().map(|k| k.name().to_string()).collect();

    let client = G5kClient::new(&cfg.api, &cfg.ssh)?;
    let remote = SshRemote::new(cfg.ssh.clone());

    let hosts = acquire_hosts(&client, &cli.job, &cli.cluster, &cli.walltime).await?;

    let deploy = DeployOptions::from_flags(
        &cfg.deployment.env_name,
        &cfg.deployment.check_command,
        cli.force_deploy,
        cli.no_deploy,
    );
    let hosts = prepare_hosts(&client, &remote, &hosts, &deploy, &cfg.ssh).await?;
    metadata.hosts = hosts.clone();

    let ctx = BenchContext {
        remote: &remote,
        inventory: &client,
        hosts: &hosts,
        params: &cfg.benchmarks,
    };
    run_benchmarks(&kinds, &ctx).await?;

    metadata.finalize(started.elapsed().as_secs_f64());
    let path = outdir.write_metadata(&metadata)?;
    info!("Run metadata saved to {}", path.display());
    Ok(())
}

/// Console plus a plain-text copy in the output directory; RUST_LOG wins over the flags
fn init_logging(level: &str, log_path: &std::path::Path) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_file = std::fs::File::create(log_path)
        .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("check_node_perf={},warn", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}
