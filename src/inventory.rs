// src/inventory.rs
//! Hardware description of the nodes, fetched on demand

use anyhow::Result;
use async_trait::async_trait;

use crate::host::Host;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAttributes {
    /// Hardware threads
    pub smt_size: u32,
    /// Main memory in bytes
    pub ram_size: u64,
    /// Switches the node is wired to, mounted interfaces first
    pub network_equipments: Vec<String>,
}

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn host_attributes(&self, host: &Host) -> Result<HostAttributes>;
}
