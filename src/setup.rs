// src/setup.rs
//! Host preparation: deployment, SSH trust between nodes, benchmark tool install

use anyhow::{bail, Result};
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::SshConfig;
use crate::constants::{BENCH_PACKAGE, REMOTE_SSH_DIR, SSH_CONFIG_COMMAND};
use crate::deploy::{deploy_hosts, DeployOptions, Deployer};
use crate::host::{hosts_list, sort_hosts, Host};
use crate::remote::{ActionResult, RemoteExecutor};

/// Deploy, configure SSH and install the benchmark tool.
/// Returns the hosts that were deployed, sorted; the others are dropped.
pub async fn prepare_hosts(
    deployer: &dyn Deployer,
    remote: &dyn RemoteExecutor,
    hosts: &[Host],
    deploy: &DeployOptions,
    ssh: &SshConfig,
) -> Result<Vec<Host>> {
    info!("Deploying hosts");
    let outcome = deploy_hosts(deployer, remote, hosts, deploy).await?;
    if !outcome.undeployed.is_empty() {
        warn!("{} have not been deployed", hosts_list(&outcome.undeployed));
    }
    let mut hosts = outcome.deployed;
    sort_hosts(&mut hosts);
    if hosts.is_empty() {
        bail!("No host has been deployed");
    }

    configure_ssh(remote, &hosts, ssh).await?;
    install_package(remote, &hosts, BENCH_PACKAGE).await?;

    Ok(hosts)
}

/// Copy our key pair onto every node and disable host key checking,
/// so that nodes can reach each other
pub async fn configure_ssh(remote: &dyn RemoteExecutor, hosts: &[Host], ssh: &SshConfig) -> Result<()> {
    let private_key = ssh.private_key();
    let public_key = ssh.public_key();
    for key in [private_key.as_str(), public_key.as_str()] {
        let copied = remote.put_file(hosts, Path::new(key), REMOTE_SSH_DIR).await?;
        check_step(&copied, "Unable to configure SSH")?;
    }

    let conf = remote.run(SSH_CONFIG_COMMAND, hosts).await?;
    check_step(&conf, "Unable to configure SSH")
}

pub async fn install_package(remote: &dyn RemoteExecutor, hosts: &[Host], package: &str) -> Result<()> {
    info!("Installing {}", package);
    let cmd = format!("apt-get update && apt-get install -y {}", package);
    let installed = remote.run(&cmd, hosts).await?;
    check_step(&installed, &format!("Unable to install {}", package))
}

fn check_step(action: &ActionResult, message: &str) -> Result<()> {
    if action.ok() {
        return Ok(());
    }
    let failed: Vec<Host> = action.failed().map(|p| p.host.clone()).collect();
    error!("{} on {}", message, hosts_list(&failed));
    for p in action.failed() {
        let detail = p.error.as_deref().unwrap_or_else(|| p.stderr.trim());
        error!("  {}: {}", p.host.address(), detail);
    }
    bail!("{}", message)
}
