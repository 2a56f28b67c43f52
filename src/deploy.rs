// src/deploy.rs
//! OS deployment policy
//!
//! 1. Optionally run the check command on every host; hosts where it succeeds
//!    already run the environment and are kept as they are
//! 2. Deploy the others up to `num_tries` times, each try on the hosts the
//!    previous one failed
//! 3. Whatever is left is undeployed

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::host::{hosts_list, sort_hosts, Host};
use crate::remote::RemoteExecutor;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOutcome {
    pub deployed: Vec<Host>,
    pub undeployed: Vec<Host>,
}

/// One deployment attempt of an environment on a set of hosts
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, hosts: &[Host], env_name: &str) -> Result<DeployOutcome>;
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub env_name: String,
    /// None disables the already-deployed check
    pub check_command: Option<String>,
    pub num_tries: u32,
}

impl DeployOptions {
    /// `force_deploy` skips the check, `no_deploy` skips the deployment itself
    pub fn from_flags(env_name: &str, check_command: &str, force_deploy: bool, no_deploy: bool) -> Self {
        Self {
            env_name: env_name.to_string(),
            check_command: (!force_deploy).then(|| check_command.to_string()),
            num_tries: u32::from(!no_deploy),
        }
    }
}

pub async fn deploy_hosts(
    deployer: &dyn Deployer,
    remote: &dyn RemoteExecutor,
    hosts: &[Host],
    opts: &DeployOptions,
) -> Result<DeployOutcome> {
    let mut deployed = Vec::new();
    let mut remaining: Vec<Host> = hosts.to_vec();

    if let Some(check) = &opts.check_command {
        let checked = remote.run(check, &remaining).await?;
        deployed.extend(checked.succeeded().map(|p| p.host.clone()));
        remaining.retain(|h| !deployed.contains(h));
        if !deployed.is_empty() {
            info!("Already deployed: {}", hosts_list(&deployed));
        }
    }

    for attempt in 1..=opts.num_tries {
        if remaining.is_empty() {
            break;
        }
        info!(
            "Deploying {} on {} hosts (try {}/{})",
            opts.env_name,
            remaining.len(),
            attempt,
            opts.num_tries
        );
        let outcome = deployer.deploy(&remaining, &opts.env_name).await?;
        debug!("Try {}: deployed {}", attempt, hosts_list(&outcome.deployed));
        deployed.extend(outcome.deployed.iter().cloned());
        remaining.retain(|h| !outcome.deployed.contains(h));
    }

    sort_hosts(&mut deployed);
    sort_hosts(&mut remaining);
    Ok(DeployOutcome {
        deployed,
        undeployed: remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_flags() {
        let opts = DeployOptions::from_flags("env", "check", false, false);
        assert_eq!(opts.check_command.as_deref(), Some("check"));
        assert_eq!(opts.num_tries, 1);

        let opts = DeployOptions::from_flags("env", "check", true, false);
        assert!(opts.check_command.is_none());
        assert_eq!(opts.num_tries, 1);

        let opts = DeployOptions::from_flags("env", "check", false, true);
        assert!(opts.check_command.is_some());
        assert_eq!(opts.num_tries, 0);
    }
}
