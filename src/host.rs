// src/host.rs
//! Host naming and ordering
//!
//! Grid'5000 nodes are named `<cluster>-<index>.<site>.grid5000.fr`. Every host
//! list handed from one phase to the next is sorted by (cluster, index) so that
//! `stremi-2` comes before `stremi-10` and logs stay readable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of the reservation, identified by its network address
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host {
    address: String,
}

impl Host {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// `stremi-12.reims.grid5000.fr` → `stremi-12`
    pub fn shortname(&self) -> &str {
        shortname(&self.address)
    }

    /// `stremi-12.reims.grid5000.fr` → `stremi`
    pub fn cluster(&self) -> &str {
        let short = self.shortname();
        short.split('-').next().unwrap_or(short)
    }

    /// `stremi-12.reims.grid5000.fr` → `Some(12)`
    pub fn index(&self) -> Option<u64> {
        self.shortname().split('-').nth(1)?.parse().ok()
    }

    /// `stremi-12.reims.grid5000.fr` → `Some("reims")`
    pub fn site(&self) -> Option<&str> {
        self.address.split('.').nth(1).filter(|s| !s.is_empty())
    }

    /// Ordering key: cluster name, then numeric index.
    /// Names without a numeric index sort after the indexed ones of the same cluster.
    pub fn sort_key(&self) -> (&str, u64) {
        (self.cluster(), self.index().unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl From<&str> for Host {
    fn from(address: &str) -> Self {
        Host::new(address)
    }
}

impl From<String> for Host {
    fn from(address: String) -> Self {
        Host::new(address)
    }
}

/// Short name of any address: everything before the first dot
pub fn shortname(address: &str) -> &str {
    address.split('.').next().unwrap_or(address)
}

/// Sort hosts by (cluster, numeric index)
pub fn sort_hosts(hosts: &mut [Host]) {
    hosts.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.address.cmp(&b.address)));
}

/// Comma-separated short names, for log lines
pub fn hosts_list(hosts: &[Host]) -> String {
    hosts.iter().map(Host::shortname).collect::<Vec<_>>().join(", ")
}
