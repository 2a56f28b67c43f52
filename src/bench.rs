// src/bench.rs
//! Benchmark runner
//!
//! Every benchmark builds one shell command, runs it on all hosts at once and
//! reduces each host's output to a single number. The reduction is appended to
//! the remote command as a shell pipeline and mirrored by [`OutputFilter`], so
//! raw and already-reduced outputs give the same value.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::BenchmarkConfig;
use crate::constants::{FIO_TOTAL_SIZE, MEMORY_BLOCK_SIZE};
use crate::host::Host;
use crate::inventory::{HostAttributes, Inventory};
use crate::remote::{ActionResult, RemoteExecutor};
use crate::report::{log_measurements, Measurement};

/// Keeps the first value of the `execution time (avg/stddev)` line of sysbench
pub const EXECUTION_TIME_FILTER: &str = r#"| grep "execution time" | awk '{print $4}' | cut -d / -f 1"#;

/// Keeps the average of the `rtt min/avg/max/mdev` line of ping
pub const PING_AVG_FILTER: &str = r#"| tail -1| awk '{print $4}' | cut -d '/' -f 2"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFilter {
    ExecutionTime,
    PingAverage,
}

impl OutputFilter {
    pub fn shell_suffix(self) -> &'static str {
        match self {
            OutputFilter::ExecutionTime => EXECUTION_TIME_FILTER,
            OutputFilter::PingAverage => PING_AVG_FILTER,
        }
    }

    /// Apply the reduction locally. Output without the expected line is
    /// returned trimmed, which covers output already reduced remotely.
    pub fn apply(self, output: &str) -> String {
        match self {
            OutputFilter::ExecutionTime => {
                let values: Vec<&str> = output
                    .lines()
                    .filter(|l| l.contains("execution time"))
                    .map(|l| {
                        let field = l.split_whitespace().nth(3).unwrap_or("");
                        field.split('/').next().unwrap_or("")
                    })
                    .collect();
                if values.is_empty() {
                    output.trim().to_string()
                } else {
                    values.join("\n")
                }
            }
            OutputFilter::PingAverage => match output.lines().rev().find(|l| l.contains("min/avg/max")) {
                Some(line) => {
                    let field = line.split_whitespace().nth(3).unwrap_or("");
                    field.split('/').nth(1).unwrap_or("").to_string()
                }
                None => output.trim().to_string(),
            },
        }
    }
}

// -----------------------------------------------------------------------------
// Commands
// -----------------------------------------------------------------------------

pub fn cpu_command(n_core: u32, max_prime: u64) -> String {
    format!(
        "sysbench --num-threads={} --test=cpu run --cpu-max-prime={} {}",
        n_core,
        max_prime,
        OutputFilter::ExecutionTime.shell_suffix()
    )
}

pub fn memory_command(ram_size: u64) -> String {
    format!(
        "sysbench --test=memory --memory-block-size={} --memory-total-size={} run {}",
        MEMORY_BLOCK_SIZE,
        ram_size,
        OutputFilter::ExecutionTime.shell_suffix()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FioAction {
    Prepare,
    Run,
    Cleanup,
}

impl FioAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FioAction::Prepare => "prepare",
            FioAction::Run => "run",
            FioAction::Cleanup => "cleanup",
        }
    }
}

/// Only the run phase is reduced; prepare and cleanup output is kept for error reports
pub fn fio_command(n_core: u32, action: FioAction) -> String {
    let filter = match action {
        FioAction::Run => OutputFilter::ExecutionTime.shell_suffix(),
        FioAction::Prepare | FioAction::Cleanup => "",
    };
    format!(
        "cd /tmp && sysbench --num-threads={} --test=fileio --file-total-size={} --file-test-mode=seqwr {} {}",
        n_core,
        FIO_TOTAL_SIZE,
        action.as_str(),
        filter
    )
    .trim_end()
    .to_string()
}

pub fn ping_command(n_ping: u32, destination: &str) -> String {
    format!(
        "ping -c {} {} {}",
        n_ping,
        destination,
        OutputFilter::PingAverage.shell_suffix()
    )
}

/// Every host, then the network equipment and the site of the first host
pub fn latency_destinations(hosts: &[Host], equipment: Option<&str>) -> Vec<String> {
    let mut dests: Vec<String> = hosts.iter().map(|h| h.address().to_string()).collect();
    if let Some(eq) = equipment {
        dests.push(eq.to_string());
    }
    if let Some(site) = hosts.first().and_then(Host::site) {
        dests.push(site.to_string());
    }
    dests
}

// -----------------------------------------------------------------------------
// Runner
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BenchmarkKind {
    Cpu,
    Memory,
    Fio,
    Latency,
    Bandwidth,
}

impl BenchmarkKind {
    /// Default run order
    pub const ALL: [BenchmarkKind; 5] = [
        BenchmarkKind::Cpu,
        BenchmarkKind::Memory,
        BenchmarkKind::Fio,
        BenchmarkKind::Latency,
        BenchmarkKind::Bandwidth,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BenchmarkKind::Cpu => "cpu",
            BenchmarkKind::Memory => "memory",
            BenchmarkKind::Fio => "fio",
            BenchmarkKind::Latency => "latency",
            BenchmarkKind::Bandwidth => "bandwidth",
        }
    }

    pub async fn run(self, ctx: &BenchContext<'_>) -> Result<Vec<Measurement>> {
        match self {
            BenchmarkKind::Cpu => cpu(ctx).await,
            BenchmarkKind::Memory => memory(ctx).await,
            BenchmarkKind::Fio => fio(ctx).await,
            BenchmarkKind::Latency => latency(ctx).await,
            BenchmarkKind::Bandwidth => bandwidth(ctx).await,
        }
    }
}

impl fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What every benchmark needs: where to run and how
pub struct BenchContext<'a> {
    pub remote: &'a dyn RemoteExecutor,
    pub inventory: &'a dyn Inventory,
    pub hosts: &'a [Host],
    pub params: &'a BenchmarkConfig,
}

impl BenchContext<'_> {
    /// Hardware of the first host; nodes of a cluster are assumed identical
    async fn reference_attributes(&self) -> Result<HostAttributes> {
        let first = self.hosts.first().context("No host to benchmark")?;
        self.inventory
            .host_attributes(first)
            .await
            .with_context(|| format!("Failed to get the attributes of {}", first))
    }
}

/// Run the benchmarks in order; stops at the first fatal error
pub async fn run_benchmarks(kinds: &[BenchmarkKind], ctx: &BenchContext<'_>) -> Result<Vec<Measurement>> {
    let mut all = Vec::new();
    for kind in kinds {
        info!("STARTING {} BENCHMARK", kind);
        all.extend(kind.run(ctx).await?);
        info!("{} BENCHMARK DONE", kind);
    }
    Ok(all)
}

fn report_action(label: &'static str, action: &ActionResult, filter: OutputFilter) -> Vec<Measurement> {
    let measurements: Vec<Measurement> = action
        .processes
        .iter()
        .map(|p| Measurement::new(label, p.host.clone(), filter.apply(&p.stdout)))
        .collect();
    log_measurements(&measurements);
    measurements
}

async fn cpu(ctx: &BenchContext<'_>) -> Result<Vec<Measurement>> {
    let n_core = ctx.reference_attributes().await?.smt_size;
    let cmd = cpu_command(n_core, ctx.params.max_prime);
    info!("Launching CPU benchmark with \n{}", cmd);
    let result = ctx.remote.run(&cmd, ctx.hosts).await?;
    Ok(report_action("CPU", &result, OutputFilter::ExecutionTime))
}

async fn memory(ctx: &BenchContext<'_>) -> Result<Vec<Measurement>> {
    let mem_size = ctx.reference_attributes().await?.ram_size;
    let cmd = memory_command(mem_size);
    info!("Launching MEM benchmark with \n{}", cmd);
    let result = ctx.remote.run(&cmd, ctx.hosts).await?;
    Ok(report_action("MEM", &result, OutputFilter::ExecutionTime))
}

async fn fio(ctx: &BenchContext<'_>) -> Result<Vec<Measurement>> {
    let n_core = ctx.reference_attributes().await?.smt_size;

    info!("Preparing FIO benchmark");
    let prepare = ctx.remote.run(&fio_command(n_core, FioAction::Prepare), ctx.hosts).await?;
    if !prepare.ok() {
        error!("Unable to prepare the data for FIO benchmark\n{}", prepare.outputs());
        bail!("FIO benchmark preparation failed");
    }

    let cmd = fio_command(n_core, FioAction::Run);
    info!("Launching FIO benchmark with \n{}", cmd);
    let run = ctx.remote.run(&cmd, ctx.hosts).await?;
    let measurements = report_action("FIO", &run, OutputFilter::ExecutionTime);

    info!("Cleaning FIO benchmark");
    let clean = ctx.remote.run(&fio_command(n_core, FioAction::Cleanup), ctx.hosts).await?;
    if !clean.ok() {
        error!("Unable to clean the data for FIO benchmark\n{}", clean.outputs());
        bail!("FIO benchmark cleanup failed");
    }

    Ok(measurements)
}

async fn latency(ctx: &BenchContext<'_>) -> Result<Vec<Measurement>> {
    let attrs = ctx.reference_attributes().await?;
    let equipment = attrs.network_equipments.first().map(String::as_str);
    if equipment.is_none() {
        warn!("No network equipment known for {}", ctx.hosts[0]);
    }
    let dests = latency_destinations(ctx.hosts, equipment);

    let mut all = Vec::new();
    for src in ctx.hosts {
        let targets: Vec<&String> = dests.iter().filter(|d| d.as_str() != src.address()).collect();
        let jobs = targets
            .iter()
            .map(|d| (src.clone(), ping_command(ctx.params.n_ping, d)))
            .collect();
        let result = ctx.remote.run_each(jobs).await?;

        // Processes come back in request order
        let measurements: Vec<Measurement> = targets
            .iter()
            .zip(&result.processes)
            .map(|(dest, p)| {
                Measurement::between("LAT", src.clone(), dest, OutputFilter::PingAverage.apply(&p.stdout))
            })
            .collect();
        log_measurements(&measurements);
        all.extend(measurements);
    }
    Ok(all)
}

async fn bandwidth(_ctx: &BenchContext<'_>) -> Result<Vec<Measurement>> {
    debug!("No bandwidth measurement defined");
    Ok(Vec::new())
}
