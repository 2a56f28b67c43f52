//! Output directory management
//!
//! Holds everything a run leaves behind on the machine that launched it:
//! - `<program>.log`: copy of the console log
//! - `metadata.json`: what was run, where and when

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::host::Host;

/// Metadata about a benchmark run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub job_name: String,
    pub cluster: String,
    pub walltime: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_secs: Option<f64>,
    pub command_line: Vec<String>,
    pub hostname: String,
    pub hosts: Vec<Host>,
    pub benchmarks: Vec<String>,
}

impl RunMetadata {
    pub fn new(job_name: &str, cluster: &str, walltime: &str) -> Self {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            job_name: job_name.to_string(),
            cluster: cluster.to_string(),
            walltime: walltime.to_string(),
            start_time: Local::now().to_rfc3339(),
            end_time: None,
            duration_secs: None,
            command_line: std::env::args().collect(),
            hostname,
            hosts: Vec::new(),
            benchmarks: Vec::new(),
        }
    }

    pub fn finalize(&mut self, duration_secs: f64) {
        self.end_time = Some(Local::now().to_rfc3339());
        self.duration_secs = Some(duration_secs);
    }
}

pub struct OutputDir {
    path: PathBuf,
}

impl OutputDir {
    /// Use `path` (created if absent) or a timestamped directory in the current one
    pub fn create(path: Option<&Path>, program: &str) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(default_dir_name(program)),
        };
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create output directory: {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_path(&self, program: &str) -> PathBuf {
        self.path.join(format!("{}.log", program))
    }

    pub fn write_metadata(&self, metadata: &RunMetadata) -> Result<PathBuf> {
        let metadata_path = self.path.join("metadata.json");
        let json = serde_json::to_string_pretty(metadata).context("Failed to serialize metadata")?;
        fs::write(&metadata_path, json)
            .with_context(|| format!("Failed to write {}", metadata_path.display()))?;
        Ok(metadata_path)
    }
}

/// `<program>_<YYYYMMDD_HHMMSS>`
pub fn default_dir_name(program: &str) -> String {
    format!("{}_{}", program, Local::now().format("%Y%m%d_%H%M%S"))
}
