// src/lib.rs

pub mod api; // Grid'5000 REST client: jobs, status, reference, deployments
pub mod bench;
pub mod config;
pub mod constants;
pub mod deploy;
pub mod host;
pub mod inventory;
pub mod outdir;
pub mod planning; // Slot search for new reservations
pub mod remote; // Parallel remote execution over SSH
pub mod report;
pub mod scheduler;
pub mod setup;

pub use bench::{run_benchmarks, BenchContext, BenchmarkKind};
pub use host::Host;
pub use scheduler::acquire_hosts;
pub use setup::prepare_hosts;
