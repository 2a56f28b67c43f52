// src/constants.rs
//
// Central location for all constants used throughout check-node-perf
// This makes tuning and maintenance easier by having all magic numbers in one place

use std::time::Duration;

/// Name used for the log file written in the output directory
pub const PROGRAM_NAME: &str = "check-node-perf";

// =============================================================================
// Reservation Defaults
// =============================================================================

/// Cluster reserved when --cluster is not given
pub const DEFAULT_CLUSTER: &str = "stremi";

/// Reservation walltime (H:MM:SS)
pub const DEFAULT_WALLTIME: &str = "3:00:00";

/// Job name used to find an existing reservation before making a new one
pub const DEFAULT_JOB_NAME: &str = "check_node_perf";

/// OAR job type requested for the reservation
pub const JOB_TYPE_DEPLOY: &str = "deploy";

/// Interval between two job state queries while waiting for the job start
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

// =============================================================================
// Grid'5000 API
// =============================================================================

/// Root of the Grid'5000 REST API
pub const DEFAULT_API_URL: &str = "https://api.grid5000.fr/stable";

/// HTTP timeout for a single API call
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Environment variables holding API credentials (only needed outside Grid'5000)
pub const ENV_API_USER: &str = "G5K_USER";
pub const ENV_API_PASSWORD: &str = "G5K_PASSWORD";

// =============================================================================
// Deployment
// =============================================================================

/// Kadeploy environment installed on every node
pub const DEFAULT_ENV_NAME: &str = "wheezy-x64-prod";

/// Succeeds on a node that already runs a deployed environment
/// (the standard environment is mounted from the second partition)
pub const DEFAULT_CHECK_DEPLOYED_COMMAND: &str =
    r#"! (mount | grep -E "^/dev/[[:alpha:]]+2 on / ")"#;

/// Deployment state while kadeploy is still working
pub const DEPLOYMENT_PROCESSING: &str = "processing";

/// Interval between two deployment state queries
pub const DEPLOYMENT_POLL_INTERVAL: Duration = Duration::from_secs(15);

// =============================================================================
// SSH
// =============================================================================

/// Remote user for every command sent to the nodes
pub const DEFAULT_SSH_USER: &str = "root";

/// Private key used to log into the nodes and copied onto them
pub const DEFAULT_SSH_KEY_PATH: &str = "~/.ssh/id_rsa";

/// SSH connection timeout in seconds
pub const DEFAULT_SSH_TIMEOUT_SECS: u64 = 10;

/// Sessions opened at once to one node; sshd starts dropping unauthenticated
/// connections past 10 (MaxStartups)
pub const DEFAULT_SSH_MAX_SESSIONS: usize = 8;

/// Directory receiving the key pair on every node
pub const REMOTE_SSH_DIR: &str = "/root/.ssh";

/// Disables host key checking between nodes
pub const SSH_CONFIG_COMMAND: &str = r#"echo "Host *" >> /root/.ssh/config ;echo " StrictHostKeyChecking no" >> /root/.ssh/config; "#;

// =============================================================================
// Benchmarks
// =============================================================================

/// Package providing the benchmarks
pub const BENCH_PACKAGE: &str = "sysbench";

/// Upper bound of the prime search in the cpu benchmark
pub const DEFAULT_MAX_PRIME: u64 = 100_000;

/// Number of echo requests per destination in the latency benchmark
pub const DEFAULT_N_PING: u32 = 10;

/// Block size of the memory benchmark
pub const MEMORY_BLOCK_SIZE: &str = "1M";

/// Size of the file written by the fio benchmark
pub const FIO_TOTAL_SIZE: &str = "10G";

/// Width of the host column in result lines
pub const HOST_COLUMN_WIDTH: usize = 15;
