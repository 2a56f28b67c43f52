// src/remote.rs
//! Parallel remote execution
//!
//! An action runs one command per (host, command) pair, all concurrently, and
//! waits for every one of them. Per-host failures never abort the action: they
//! are recorded in the [`ProcessResult`] and summarized by [`ActionResult::ok`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use ssh2::Session;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::SshConfig;
use crate::host::Host;

/// Outcome of one remote process
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub host: Host,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// None when the process never ran (connection or authentication failure)
    pub exit_status: Option<i32>,
    /// Connection-level failure
    pub error: Option<String>,
}

impl ProcessResult {
    pub fn ok(&self) -> bool {
        self.error.is_none() && self.exit_status == Some(0)
    }

    /// Process that could not be started at all
    pub fn failed(host: Host, command: String, error: impl Into<String>) -> Self {
        Self {
            host,
            command,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Outcome of a whole action, in the order the processes were requested
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub processes: Vec<ProcessResult>,
}

impl ActionResult {
    /// True when every process exited with status 0
    pub fn ok(&self) -> bool {
        self.processes.iter().all(ProcessResult::ok)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ProcessResult> {
        self.processes.iter().filter(|p| p.ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProcessResult> {
        self.processes.iter().filter(|p| !p.ok())
    }

    /// `<host>: <stdout>` for every process, one per line
    pub fn outputs(&self) -> String {
        self.processes
            .iter()
            .map(|p| format!("{}: {}", p.host.address(), p.stdout.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run every (host, command) pair concurrently
    async fn run_each(&self, jobs: Vec<(Host, String)>) -> Result<ActionResult>;

    /// Copy a local file into `remote_dir` on every host
    async fn put_file(&self, hosts: &[Host], local: &Path, remote_dir: &str) -> Result<ActionResult>;

    /// Run the same command on every host
    async fn run(&self, cmd: &str, hosts: &[Host]) -> Result<ActionResult> {
        let jobs = hosts.iter().map(|h| (h.clone(), cmd.to_string())).collect();
        self.run_each(jobs).await
    }
}

/// Blocking SSH session to one host
pub struct SshSession {
    session: Session,
    host: String,
}

impl SshSession {
    /// Connect and authenticate with the configured key
    pub fn connect(host: &str, ssh_config: &SshConfig) -> Result<Self> {
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{}:22", host)
        };

        debug!("Connecting to {}@{}", ssh_config.user, addr);

        let sock = addr
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}", addr))?
            .next()
            .with_context(|| format!("No address for {}", addr))?;
        let tcp = TcpStream::connect_timeout(&sock, Duration::from_secs(ssh_config.timeout))
            .with_context(|| format!("Failed to connect to {}", addr))?;

        let mut sess = Session::new()?;
        sess.set_tcp_stream(tcp);
        // Bounded handshake and authentication; commands themselves may run for long
        let timeout_ms = u32::try_from(ssh_config.timeout.saturating_mul(1000)).unwrap_or(u32::MAX);
        sess.set_timeout(timeout_ms);
        sess.handshake()
            .with_context(|| format!("SSH handshake with {} failed", addr))?;

        let key_path = ssh_config.private_key();
        let key_file = Path::new(&key_path);
        if !key_file.exists() {
            bail!("SSH key not found: {}", key_file.display());
        }

        sess.userauth_pubkey_file(&ssh_config.user, None, key_file, None)
            .context("SSH authentication failed")?;
        if !sess.authenticated() {
            bail!("SSH authentication failed for {}@{}", ssh_config.user, addr);
        }
        sess.set_timeout(0);

        Ok(SshSession {
            session: sess,
            host: addr,
        })
    }

    /// Execute a command and collect its output; a non-zero exit is not an error here
    pub fn exec(&self, cmd: &str) -> Result<(i32, String, String)> {
        debug!("SSH exec on {}: {}", self.host, cmd);

        let mut channel = self.session.channel_session()?;
        channel.exec(cmd)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        let exit_status = channel.exit_status()?;

        Ok((exit_status, stdout, stderr))
    }

    /// Copy a local file over SCP
    pub fn send_file(&self, local: &Path, remote_path: &Path) -> Result<()> {
        debug!("SCP {} -> {}:{}", local.display(), self.host, remote_path.display());

        let data = std::fs::read(local)
            .with_context(|| format!("Failed to read {}", local.display()))?;
        let mut channel = self.session.scp_send(remote_path, 0o600, data.len() as u64, None)?;
        channel.write_all(&data)?;
        channel.send_eof()?;
        channel.wait_eof()?;
        channel.close()?;
        channel.wait_close()?;
        Ok(())
    }
}

/// Remote executor over SSH; every process gets its own session, and at most
/// `ssh.max_sessions` of them are open to the same host at any time
#[derive(Clone)]
pub struct SshRemote {
    ssh: SshConfig,
}

impl SshRemote {
    pub fn new(ssh: SshConfig) -> Self {
        Self { ssh }
    }

    fn exec_one(ssh: &SshConfig, host: Host, cmd: String) -> ProcessResult {
        let outcome = SshSession::connect(host.address(), ssh).and_then(|s| s.exec(&cmd));
        match outcome {
            Ok((status, stdout, stderr)) => ProcessResult {
                host,
                command: cmd,
                stdout,
                stderr,
                exit_status: Some(status),
                error: None,
            },
            Err(e) => ProcessResult::failed(host, cmd, format!("{:#}", e)),
        }
    }

    fn send_one(ssh: &SshConfig, host: Host, local: &Path, remote_path: PathBuf) -> ProcessResult {
        let command = format!("scp {} {}", local.display(), remote_path.display());
        let outcome = SshSession::connect(host.address(), ssh).and_then(|s| s.send_file(local, &remote_path));
        match outcome {
            Ok(()) => ProcessResult {
                host,
                command,
                exit_status: Some(0),
                ..Default::default()
            },
            Err(e) => ProcessResult::failed(host, command, format!("{:#}", e)),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshRemote {
    async fn run_each(&self, jobs: Vec<(Host, String)>) -> Result<ActionResult> {
        let max_sessions = self.ssh.max_sessions.max(1);
        let mut limits: HashMap<Host, Arc<Semaphore>> = HashMap::new();

        let mut tasks = Vec::with_capacity(jobs.len());
        for (host, cmd) in jobs {
            let limit = Arc::clone(
                limits
                    .entry(host.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(max_sessions))),
            );
            let ssh = self.ssh.clone();
            tasks.push(async move {
                let _permit = limit.acquire_owned().await.context("Session limiter closed")?;
                tokio::task::spawn_blocking(move || Self::exec_one(&ssh, host, cmd))
                    .await
                    .context("Remote process task panicked")
            });
        }

        let processes = join_all(tasks).await.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(ActionResult { processes })
    }

    async fn put_file(&self, hosts: &[Host], local: &Path, remote_dir: &str) -> Result<ActionResult> {
        let file_name = local
            .file_name()
            .with_context(|| format!("Not a file: {}", local.display()))?;
        let remote_path = Path::new(remote_dir).join(file_name);

        let tasks = hosts.iter().cloned().map(|host| {
            let ssh = self.ssh.clone();
            let local = local.to_path_buf();
            let remote_path = remote_path.clone();
            tokio::task::spawn_blocking(move || Self::send_one(&ssh, host, &local, remote_path))
        });

        let mut processes = Vec::new();
        for joined in join_all(tasks).await {
            processes.push(joined.context("File transfer task panicked")?);
        }
        Ok(ActionResult { processes })
    }
}
