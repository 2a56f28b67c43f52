// src/config.rs
//
// Run configuration: built-in defaults, optionally overridden by a YAML file,
// then by environment variables and command line flags (see main.rs).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Grid'5000 REST API access
    #[serde(default)]
    pub api: ApiConfig,

    /// Connection parameters for every remote command
    #[serde(default)]
    pub ssh: SshConfig,

    /// OS deployment policy
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Benchmark parameters
    #[serde(default)]
    pub benchmarks: BenchmarkConfig,
}

impl Config {
    /// Load a YAML configuration file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Fill API credentials from the environment when the file left them empty
    pub fn apply_env(&mut self) {
        if self.api.user.is_none() {
            self.api.user = std::env::var(ENV_API_USER).ok();
        }
        if self.api.password.is_none() {
            self.api.password = std::env::var(ENV_API_PASSWORD).ok();
        }
    }
}

/// Grid'5000 REST API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// API root (default: https://api.grid5000.fr/stable)
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Basic auth user, also used to find our own jobs (default: $G5K_USER, then $USER)
    #[serde(default)]
    pub user: Option<String>,

    /// Basic auth password (default: $G5K_PASSWORD)
    #[serde(default)]
    pub password: Option<String>,

    /// HTTP timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout: u64,

    /// Seconds between two job state queries while waiting for the job start
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl ApiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// User owning the jobs we look for
    pub fn job_owner(&self) -> Option<String> {
        self.user.clone().or_else(|| std::env::var("USER").ok())
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            user: None,
            password: None,
            timeout: default_api_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// SSH connection parameters, passed explicitly to the remote executor
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SshConfig {
    /// Remote user (default: root)
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Path to SSH private key (default: ~/.ssh/id_rsa)
    /// The key pair is also copied onto every node
    #[serde(default = "default_ssh_key_path")]
    pub key_path: String,

    /// SSH connection timeout in seconds (default: 10)
    #[serde(default = "default_ssh_timeout")]
    pub timeout: u64,

    /// Concurrent sessions to a single host (default: 8)
    #[serde(default = "default_ssh_max_sessions")]
    pub max_sessions: usize,
}

impl SshConfig {
    /// Private key path with `~` expanded
    pub fn private_key(&self) -> String {
        shellexpand::tilde(&self.key_path).into_owned()
    }

    /// Public key path with `~` expanded
    pub fn public_key(&self) -> String {
        format!("{}.pub", self.private_key())
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            key_path: default_ssh_key_path(),
            timeout: default_ssh_timeout(),
            max_sessions: default_ssh_max_sessions(),
        }
    }
}

/// OS deployment configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeploymentConfig {
    /// Kadeploy environment name
    #[serde(default = "default_env_name")]
    pub env_name: String,

    /// Command that succeeds on a node already running the environment
    #[serde(default = "default_check_command")]
    pub check_command: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            env_name: default_env_name(),
            check_command: default_check_command(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BenchmarkConfig {
    /// cpu: upper bound of the prime search
    #[serde(default = "default_max_prime")]
    pub max_prime: u64,

    /// latency: echo requests per destination
    #[serde(default = "default_n_ping")]
    pub n_ping: u32,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            max_prime: default_max_prime(),
            n_ping: default_n_ping(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_api_timeout() -> u64 {
    DEFAULT_API_TIMEOUT_SECS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_ssh_key_path() -> String {
    DEFAULT_SSH_KEY_PATH.to_string()
}

fn default_ssh_timeout() -> u64 {
    DEFAULT_SSH_TIMEOUT_SECS
}

fn default_ssh_max_sessions() -> usize {
    DEFAULT_SSH_MAX_SESSIONS
}

fn default_env_name() -> String {
    DEFAULT_ENV_NAME.to_string()
}

fn default_check_command() -> String {
    DEFAULT_CHECK_DEPLOYED_COMMAND.to_string()
}

fn default_max_prime() -> u64 {
    DEFAULT_MAX_PRIME
}

fn default_n_ping() -> u32 {
    DEFAULT_N_PING
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let cfg = Config::from_yaml("").unwrap();
        assert_eq!(cfg.ssh.user, "root");
        assert_eq!(cfg.deployment.env_name, "wheezy-x64-prod");
        assert_eq!(cfg.benchmarks.max_prime, 100_000);
        assert_eq!(cfg.benchmarks.n_ping, 10);
        assert_eq!(cfg.api.base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
ssh:
  key_path: /home/me/.ssh/g5k
benchmarks:
  max_prime: 20000
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.ssh.key_path, "/home/me/.ssh/g5k");
        assert_eq!(cfg.ssh.user, "root");
        assert_eq!(cfg.ssh.timeout, 10);
        assert_eq!(cfg.ssh.max_sessions, 8);
        assert_eq!(cfg.benchmarks.max_prime, 20000);
        assert_eq!(cfg.benchmarks.n_ping, 10);
        assert_eq!(cfg.api.poll_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_benchmark_field_type_is_rejected() {
        let yaml = "benchmarks:\n  n_ping: lots\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_public_key_path() {
        let ssh = SshConfig {
            key_path: "/keys/id_rsa".to_string(),
            ..Default::default()
        };
        assert_eq!(ssh.private_key(), "/keys/id_rsa");
        assert_eq!(ssh.public_key(), "/keys/id_rsa.pub");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, "deployment:\n  env_name: debian11-min\n").unwrap();
        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.deployment.env_name, "debian11-min");
        assert!(cfg.deployment.check_command.contains("mount"));
    }
}
