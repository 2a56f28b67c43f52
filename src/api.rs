// src/api.rs
//! Grid'5000 REST API client
//!
//! One client serves the three collaborators of a run:
//! - [`Scheduler`]: OAR jobs (`/sites/<site>/jobs`) and node status (`/sites/<site>/status`)
//! - [`Inventory`]: reference description of the nodes (`/sites/<site>/clusters/<cluster>/nodes/<node>`)
//! - [`Deployer`]: kadeploy deployments (`/sites/<site>/deployments`)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, SshConfig};
use crate::constants::{DEPLOYMENT_POLL_INTERVAL, DEPLOYMENT_PROCESSING};
use crate::deploy::{DeployOutcome, Deployer};
use crate::host::Host;
use crate::inventory::{HostAttributes, Inventory};
use crate::planning::{Interval, NodePlanning};
use crate::scheduler::{JobRef, Scheduler, Submission};

/// OAR states of a job that is neither finished nor failed
const ACTIVE_JOB_STATES: &str = "waiting,launching,running";

// -----------------------------------------------------------------------------
// JSON models
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct Named {
    pub uid: String,
}

#[derive(Debug, Deserialize)]
pub struct JobInfo {
    pub uid: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub assigned_nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SiteStatus {
    #[serde(default)]
    pub nodes: HashMap<String, NodeStatus>,
}

#[derive(Debug, Deserialize)]
pub struct NodeStatus {
    /// alive, absent, suspected or dead
    #[serde(default)]
    pub hard: String,
    #[serde(default)]
    pub reservations: Vec<StatusReservation>,
}

#[derive(Debug, Deserialize)]
pub struct StatusReservation {
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub scheduled_at: Option<i64>,
    #[serde(default)]
    pub walltime: i64,
}

#[derive(Debug, Deserialize)]
pub struct NodeDescription {
    pub architecture: Architecture,
    pub main_memory: MainMemory,
    #[serde(default)]
    pub network_adapters: Vec<NetworkAdapter>,
}

#[derive(Debug, Deserialize)]
pub struct Architecture {
    pub smt_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct MainMemory {
    pub ram_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct NetworkAdapter {
    #[serde(default)]
    pub switch: Option<String>,
    #[serde(default)]
    pub mounted: bool,
}

#[derive(Debug, Serialize)]
struct DeploymentRequest<'a> {
    nodes: Vec<&'a str>,
    environment: &'a str,
    key: String,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentInfo {
    pub uid: String,
    pub status: String,
    #[serde(default)]
    pub result: HashMap<String, NodeDeployment>,
}

#[derive(Debug, Deserialize)]
pub struct NodeDeployment {
    #[serde(default)]
    pub state: String,
}

impl From<NodeDescription> for HostAttributes {
    fn from(node: NodeDescription) -> Self {
        let mut adapters = node.network_adapters;
        // Mounted interfaces first, keeping the reference order otherwise
        adapters.sort_by_key(|a| !a.mounted);
        let mut network_equipments: Vec<String> = Vec::new();
        for switch in adapters.into_iter().filter_map(|a| a.switch) {
            if !network_equipments.contains(&switch) {
                network_equipments.push(switch);
            }
        }
        HostAttributes {
            smt_size: node.architecture.smt_size,
            ram_size: node.main_memory.ram_size,
            network_equipments,
        }
    }
}

/// Busy intervals of the nodes of `cluster` from a site status.
/// Reservations that have not started yet are placed at their scheduled date.
pub fn planning_from_status(status: &SiteStatus, cluster: &str, now: i64) -> Vec<NodePlanning> {
    let prefix = format!("{}-", cluster);
    let mut planning: Vec<NodePlanning> = status
        .nodes
        .iter()
        .filter(|(name, _)| name.starts_with(&prefix))
        .map(|(name, node)| NodePlanning {
            host: name.clone(),
            usable: matches!(node.hard.as_str(), "alive" | "absent"),
            busy: node
                .reservations
                .iter()
                .filter(|r| r.walltime > 0)
                .map(|r| {
                    let start = r
                        .started_at
                        .filter(|t| *t > 0)
                        .or(r.scheduled_at.filter(|t| *t > 0))
                        .unwrap_or(now);
                    Interval::new(start, start + r.walltime)
                })
                .collect(),
        })
        .collect();
    planning.sort_by(|a, b| a.host.cmp(&b.host));
    planning
}

/// Whether a job in OAR state `state` has started; an error when it never will
pub fn job_progress(state: &str) -> Result<bool> {
    match state.to_ascii_lowercase().as_str() {
        "running" => Ok(true),
        "error" | "terminated" | "toerror" => bail!("job is {} and will never run", state),
        _ => Ok(false),
    }
}

/// Split a deployment result into deployed and undeployed hosts
pub fn deployment_outcome(hosts: &[Host], info: &DeploymentInfo) -> DeployOutcome {
    let mut outcome = DeployOutcome::default();
    for host in hosts {
        let ok = info
            .result
            .get(host.address())
            .map(|r| r.state.eq_ignore_ascii_case("ok"))
            .unwrap_or(false);
        if ok {
            outcome.deployed.push(host.clone());
        } else {
            outcome.undeployed.push(host.clone());
        }
    }
    outcome
}

// -----------------------------------------------------------------------------
// Client
// -----------------------------------------------------------------------------

pub struct G5kClient {
    http: reqwest::Client,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
    job_owner: Option<String>,
    poll_interval: Duration,
    deploy_poll_interval: Duration,
    public_key_path: String,
}

impl G5kClient {
    pub fn new(api: &ApiConfig, ssh: &SshConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            user: api.user.clone(),
            password: api.password.clone(),
            job_owner: api.job_owner(),
            poll_interval: api.poll_interval(),
            deploy_poll_interval: DEPLOYMENT_POLL_INTERVAL,
            public_key_path: ssh.public_key(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, self.url(path))
            .header(ACCEPT, "application/json");
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.as_ref());
        }
        req
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!("GET {}{}", self.base_url, path);
        let resp = self
            .request(reqwest::Method::GET, path)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error", path))?;
        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to decode response of GET {}", path))
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        debug!("POST {}{}", self.base_url, path);
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?
            .error_for_status()
            .with_context(|| format!("POST {} returned an error", path))?;
        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to decode response of POST {}", path))
    }

    async fn sites(&self) -> Result<Vec<String>> {
        let sites: ItemList<Named> = self.get("/sites", &[]).await?;
        Ok(sites.items.into_iter().map(|s| s.uid).collect())
    }

    async fn job(&self, job: &JobRef) -> Result<JobInfo> {
        self.get(&format!("/sites/{}/jobs/{}", job.site, job.id), &[]).await
    }

    async fn deploy_site(&self, site: &str, hosts: &[Host], env_name: &str, key: &str) -> Result<DeployOutcome> {
        let request = DeploymentRequest {
            nodes: hosts.iter().map(Host::address).collect(),
            environment: env_name,
            key: key.to_string(),
        };
        let mut info: DeploymentInfo = self.post(&format!("/sites/{}/deployments", site), &request).await?;
        info!("Deployment {} started on {} ({} hosts)", info.uid, site, hosts.len());

        while info.status == DEPLOYMENT_PROCESSING {
            tokio::time::sleep(self.deploy_poll_interval).await;
            info = self.get(&format!("/sites/{}/deployments/{}", site, info.uid), &[]).await?;
        }
        if info.status != "terminated" {
            warn!("Deployment {} on {} ended with status {}", info.uid, site, info.status);
        }
        Ok(deployment_outcome(hosts, &info))
    }
}

#[async_trait]
impl Scheduler for G5kClient {
    async fn find_job_by_name(&self, name: &str) -> Result<Option<JobRef>> {
        let owner = self
            .job_owner
            .clone()
            .context("Unable to determine the job owner; set G5K_USER or USER")?;

        for site in self.sites().await? {
            let jobs: ItemList<JobInfo> = match self
                .get(
                    &format!("/sites/{}/jobs", site),
                    &[("user", owner.as_str()), ("state", ACTIVE_JOB_STATES)],
                )
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    // A site in maintenance must not prevent finding jobs elsewhere
                    warn!("Unable to list jobs on {}: {:#}", site, e);
                    continue;
                }
            };

            for job in jobs.items {
                let job_ref = JobRef::new(job.uid, site.clone());
                let job_name = match job.name {
                    Some(n) => n,
                    None => self.job(&job_ref).await?.name.unwrap_or_default(),
                };
                if job_name == name {
                    return Ok(Some(job_ref));
                }
            }
        }
        Ok(None)
    }

    async fn cluster_site(&self, cluster: &str) -> Result<String> {
        for site in self.sites().await? {
            let clusters: ItemList<Named> = self.get(&format!("/sites/{}/clusters", site), &[]).await?;
            if clusters.items.iter().any(|c| c.uid == cluster) {
                return Ok(site);
            }
        }
        bail!("Cluster {} not found in any site", cluster)
    }

    async fn cluster_planning(&self, site: &str, cluster: &str) -> Result<Vec<NodePlanning>> {
        let status: SiteStatus = self
            .get(&format!("/sites/{}/status", site), &[("disks", "no"), ("waiting", "yes")])
            .await?;
        Ok(planning_from_status(&status, cluster, Utc::now().timestamp()))
    }

    async fn submit(&self, site: &str, submission: &Submission) -> Result<JobRef> {
        debug!("Submitting {:?} on {}", submission, site);
        let job: JobInfo = self.post(&format!("/sites/{}/jobs", site), submission).await?;
        Ok(JobRef::new(job.uid, site))
    }

    async fn wait_running(&self, job: &JobRef) -> Result<()> {
        loop {
            let info = self.job(job).await?;
            if job_progress(&info.state).with_context(|| format!("Job {} cannot start", job))? {
                return Ok(());
            }
            debug!("Job {} is {}", job, info.state);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn assigned_hosts(&self, job: &JobRef) -> Result<Vec<Host>> {
        let info = self.job(job).await?;
        Ok(info.assigned_nodes.into_iter().map(Host::from).collect())
    }
}

#[async_trait]
impl Inventory for G5kClient {
    async fn host_attributes(&self, host: &Host) -> Result<HostAttributes> {
        let site = host
            .site()
            .with_context(|| format!("Cannot find the site of {}", host))?;
        let node: NodeDescription = self
            .get(
                &format!("/sites/{}/clusters/{}/nodes/{}", site, host.cluster(), host.shortname()),
                &[],
            )
            .await?;
        Ok(node.into())
    }
}

#[async_trait]
impl Deployer for G5kClient {
    async fn deploy(&self, hosts: &[Host], env_name: &str) -> Result<DeployOutcome> {
        let key = std::fs::read_to_string(&self.public_key_path)
            .with_context(|| format!("Failed to read public key: {}", self.public_key_path))?;

        let mut by_site: BTreeMap<String, Vec<Host>> = BTreeMap::new();
        for host in hosts {
            let site = host
                .site()
                .with_context(|| format!("Cannot find the site of {}", host))?;
            by_site.entry(site.to_string()).or_default().push(host.clone());
        }

        let mut outcome = DeployOutcome::default();
        for (site, site_hosts) in by_site {
            let part = self.deploy_site(&site, &site_hosts, env_name, key.trim()).await?;
            outcome.deployed.extend(part.deployed);
            outcome.undeployed.extend(part.undeployed);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, ssh: &SshConfig) -> G5kClient {
        let api = ApiConfig {
            base_url: server.uri(),
            user: Some("alice".to_string()),
            poll_interval: 0,
            ..Default::default()
        };
        let mut client = G5kClient::new(&api, ssh).unwrap();
        client.deploy_poll_interval = Duration::ZERO;
        client
    }

    async fn mount_get(server: &MockServer, at: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_job_progress() {
        assert!(job_progress("running").unwrap());
        assert!(job_progress("Running").unwrap());
        assert!(!job_progress("waiting").unwrap());
        assert!(!job_progress("launching").unwrap());
        assert!(!job_progress("toLaunch").unwrap());
        assert!(job_progress("Error").is_err());
        assert!(job_progress("terminated").is_err());
        assert!(job_progress("toError").is_err());
    }

    #[tokio::test]
    async fn test_wait_running_polls_until_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sites/reims/jobs/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uid": 42, "state": "waiting"})))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        mount_get(&server, "/sites/reims/jobs/42", json!({"uid": 42, "state": "running"})).await;

        let client = client_for(&server, &SshConfig::default());
        client.wait_running(&JobRef::new(42, "reims")).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_running_fails_on_final_state() {
        let server = MockServer::start().await;
        mount_get(&server, "/sites/reims/jobs/42", json!({"uid": 42, "state": "Error"})).await;

        let client = client_for(&server, &SshConfig::default());
        let err = client.wait_running(&JobRef::new(42, "reims")).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("reims:42"), "{}", msg);
        assert!(msg.contains("will never run"), "{}", msg);
    }

    #[tokio::test]
    async fn test_find_job_skips_site_with_failing_listing() {
        let server = MockServer::start().await;
        mount_get(&server, "/sites", json!({"items": [{"uid": "lille"}, {"uid": "reims"}]})).await;
        Mock::given(method("GET"))
            .and(path("/sites/lille/jobs"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sites/reims/jobs"))
            .and(query_param("user", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"uid": 6, "state": "running", "name": "other"},
                    {"uid": 7, "state": "running", "name": "check_node_perf"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, &SshConfig::default());
        let job = client.find_job_by_name("check_node_perf").await.unwrap();
        assert_eq!(job, Some(JobRef::new(7, "reims")));
    }

    #[tokio::test]
    async fn test_find_job_reads_name_from_job_detail() {
        let server = MockServer::start().await;
        mount_get(&server, "/sites", json!({"items": [{"uid": "reims"}]})).await;
        mount_get(&server, "/sites/reims/jobs", json!({"items": [{"uid": 8, "state": "waiting"}]})).await;
        Mock::given(method("GET"))
            .and(path("/sites/reims/jobs/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uid": 8, "state": "waiting", "name": "check_node_perf"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, &SshConfig::default());
        assert_eq!(
            client.find_job_by_name("check_node_perf").await.unwrap(),
            Some(JobRef::new(8, "reims"))
        );
        assert_eq!(client.find_job_by_name("another_job").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_deploy_polls_while_processing() {
        let server = MockServer::start().await;
        let key_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(key_dir.path().join("id_rsa.pub"), "ssh-rsa AAAAB3Nza alice@frontend\n").unwrap();
        let ssh = SshConfig {
            key_path: key_dir.path().join("id_rsa").display().to_string(),
            ..Default::default()
        };

        Mock::given(method("POST"))
            .and(path("/sites/reims/deployments"))
            .and(body_string_contains("ssh-rsa AAAAB3Nza alice@frontend"))
            .and(body_string_contains("wheezy-x64-prod"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uid": "D-1", "status": "processing"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sites/reims/deployments/D-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uid": "D-1", "status": "processing"})))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sites/reims/deployments/D-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uid": "D-1",
                "status": "terminated",
                "result": {
                    "stremi-1.reims.grid5000.fr": {"state": "OK"},
                    "stremi-2.reims.grid5000.fr": {"state": "KO"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, &ssh);
        let hosts = vec![
            Host::new("stremi-1.reims.grid5000.fr"),
            Host::new("stremi-2.reims.grid5000.fr"),
        ];
        let outcome = client.deploy(&hosts, "wheezy-x64-prod").await.unwrap();

        assert_eq!(outcome.deployed, vec![Host::new("stremi-1.reims.grid5000.fr")]);
        assert_eq!(outcome.undeployed, vec![Host::new("stremi-2.reims.grid5000.fr")]);
    }

    #[test]
    fn test_job_list_deserialization() {
        let json = r#"{
            "items": [
                {"uid": 1875612, "user": "alice", "state": "running", "name": "check_node_perf"},
                {"uid": 1875613, "user": "alice", "state": "waiting"}
            ],
            "total": 2, "offset": 0
        }"#;
        let jobs: ItemList<JobInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(jobs.items.len(), 2);
        assert_eq!(jobs.items[0].name.as_deref(), Some("check_node_perf"));
        assert!(jobs.items[1].name.is_none());
        assert!(jobs.items[1].assigned_nodes.is_empty());
    }

    #[test]
    fn test_job_detail_deserialization() {
        let json = r#"{
            "uid": 1875612, "state": "running", "name": "check_node_perf",
            "types": ["deploy"],
            "assigned_nodes": ["stremi-10.reims.grid5000.fr", "stremi-2.reims.grid5000.fr"]
        }"#;
        let job: JobInfo = serde_json::from_str(json).unwrap();
        assert_eq!(job.uid, 1875612);
        assert_eq!(job.assigned_nodes.len(), 2);
    }

    #[test]
    fn test_node_description_to_attributes() {
        let json = r#"{
            "uid": "stremi-1",
            "architecture": {"nb_cores": 24, "smt_size": 24},
            "main_memory": {"ram_size": 51539607552},
            "network_adapters": [
                {"device": "eth0", "mounted": false, "switch": "gw-reims-bis"},
                {"device": "eth1", "mounted": true, "switch": "gw-reims"},
                {"device": "ib0", "mounted": false}
            ]
        }"#;
        let node: NodeDescription = serde_json::from_str(json).unwrap();
        let attrs = HostAttributes::from(node);
        assert_eq!(attrs.smt_size, 24);
        assert_eq!(attrs.ram_size, 51_539_607_552);
        assert_eq!(attrs.network_equipments, vec!["gw-reims", "gw-reims-bis"]);
    }

    #[test]
    fn test_planning_from_status() {
        let json = r#"{
            "nodes": {
                "stremi-1.reims.grid5000.fr": {"hard": "alive", "soft": "busy",
                    "reservations": [{"uid": 1, "started_at": 1000, "scheduled_at": 900, "walltime": 3600}]},
                "stremi-2.reims.grid5000.fr": {"hard": "alive", "soft": "free",
                    "reservations": [{"uid": 2, "started_at": 0, "scheduled_at": 8000, "walltime": 600}]},
                "stremi-3.reims.grid5000.fr": {"hard": "dead", "soft": "unknown", "reservations": []},
                "granduc-1.luxembourg.grid5000.fr": {"hard": "alive", "soft": "free", "reservations": []}
            }
        }"#;
        let status: SiteStatus = serde_json::from_str(json).unwrap();
        let planning = planning_from_status(&status, "stremi", 500);

        assert_eq!(planning.len(), 3);
        assert_eq!(planning[0].host, "stremi-1.reims.grid5000.fr");
        assert_eq!(planning[0].busy, vec![Interval::new(1000, 4600)]);
        assert_eq!(planning[1].busy, vec![Interval::new(8000, 8600)]);
        assert!(planning[1].usable);
        assert!(!planning[2].usable);
    }

    #[test]
    fn test_deployment_outcome() {
        let json = r#"{
            "uid": "D-0a1b", "status": "terminated",
            "result": {
                "stremi-1.reims.grid5000.fr": {"state": "OK", "macro": null},
                "stremi-2.reims.grid5000.fr": {"state": "KO", "macro": "SetDeploymentEnv"}
            }
        }"#;
        let info: DeploymentInfo = serde_json::from_str(json).unwrap();
        let hosts = vec![
            Host::new("stremi-1.reims.grid5000.fr"),
            Host::new("stremi-2.reims.grid5000.fr"),
            Host::new("stremi-3.reims.grid5000.fr"),
        ];
        let outcome = deployment_outcome(&hosts, &info);
        assert_eq!(outcome.deployed, vec![Host::new("stremi-1.reims.grid5000.fr")]);
        assert_eq!(outcome.undeployed.len(), 2);
    }

    #[test]
    fn test_client_builds_from_default_config() {
        let client = G5kClient::new(&ApiConfig::default(), &SshConfig::default()).unwrap();
        assert_eq!(client.url("/sites"), "https://api.grid5000.fr/stable/sites");
        assert!(client.public_key_path.ends_with("id_rsa.pub"));
    }
}
