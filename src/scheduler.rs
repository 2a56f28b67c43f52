// src/scheduler.rs
//! Host acquisition
//!
//! Reuses the job named `job_name` when the current user already has one,
//! otherwise reserves every node of the cluster for the first window in which
//! they are all free. Then waits for the job to run and returns its nodes,
//! sorted by (cluster, index).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::JOB_TYPE_DEPLOY;
use crate::host::{hosts_list, sort_hosts, Host};
use crate::planning::{find_first_full_slot, format_walltime, parse_walltime, NodePlanning};

/// A scheduler job: (job id, site)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub id: i64,
    pub site: String,
}

impl JobRef {
    pub fn new(id: i64, site: impl Into<String>) -> Self {
        Self { id, site: site.into() }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.site, self.id)
    }
}

/// Reservation request, serialized as the OAR job submission body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    /// OAR resource expression, walltime included
    pub resources: String,
    pub types: Vec<String>,
    /// Start date as a UNIX timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<i64>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Submission {
    /// Deploy-type advance reservation of `nodes` nodes of `cluster`
    pub fn deploy_reservation(cluster: &str, nodes: usize, walltime: Duration, start: i64, name: &str) -> Self {
        Self {
            resources: format!(
                "{{cluster='{}'}}/nodes={},walltime={}",
                cluster,
                nodes,
                format_walltime(walltime)
            ),
            types: vec![JOB_TYPE_DEPLOY.to_string()],
            reservation: Some(start),
            name: name.to_string(),
            command: None,
        }
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Job of the current user with that name, in any site, not yet terminated
    async fn find_job_by_name(&self, name: &str) -> Result<Option<JobRef>>;

    /// Site hosting `cluster`
    async fn cluster_site(&self, cluster: &str) -> Result<String>;

    /// Busy intervals of every node of `cluster`
    async fn cluster_planning(&self, site: &str, cluster: &str) -> Result<Vec<NodePlanning>>;

    async fn submit(&self, site: &str, submission: &Submission) -> Result<JobRef>;

    /// Block until the job is running
    async fn wait_running(&self, job: &JobRef) -> Result<()>;

    async fn assigned_hosts(&self, job: &JobRef) -> Result<Vec<Host>>;
}

/// Resolve or create the reservation and return its hosts, sorted
pub async fn acquire_hosts(
    scheduler: &dyn Scheduler,
    job_name: &str,
    cluster: &str,
    walltime: &str,
) -> Result<Vec<Host>> {
    let job = match scheduler.find_job_by_name(job_name).await? {
        Some(job) => {
            info!("Using existing job {} named {}", job, job_name);
            job
        }
        None => {
            let job = make_reservation(scheduler, job_name, cluster, walltime).await?;
            info!("Reservation done {}:{}", job.site, job.id);
            job
        }
    };

    info!("Waiting for job start");
    scheduler.wait_running(&job).await?;

    let mut hosts = scheduler.assigned_hosts(&job).await?;
    sort_hosts(&mut hosts);
    info!("Hosts: {}", hosts_list(&hosts));

    Ok(hosts)
}

async fn make_reservation(
    scheduler: &dyn Scheduler,
    job_name: &str,
    cluster: &str,
    walltime: &str,
) -> Result<JobRef> {
    info!("No job running, making a reservation");
    let duration = parse_walltime(walltime)?;

    let site = scheduler.cluster_site(cluster).await?;
    let planning = scheduler.cluster_planning(&site, cluster).await?;
    let slot = find_first_full_slot(&planning, Utc::now().timestamp(), duration)
        .with_context(|| format!("No slot found for cluster {} with walltime {}", cluster, walltime))?;
    debug!("First slot for {}: {:?}", cluster, slot);

    let submission = Submission::deploy_reservation(cluster, slot.nodes, duration, slot.start, job_name);
    scheduler.submit(&site, &submission).await
}
