// src/report.rs
//! Result lines
//!
//! One info line per host and benchmark:
//! `CPU stremi-1         10.0347` or, for latency, `LAT stremi-1->stremi-2 0.143`

use tracing::info;

use crate::constants::HOST_COLUMN_WIDTH;
use crate::host::{shortname, Host};

/// Reduced output of one remote process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub label: &'static str,
    pub source: Host,
    /// Only set for latency measurements
    pub destination: Option<String>,
    pub value: String,
}

impl Measurement {
    pub fn new(label: &'static str, source: Host, value: impl Into<String>) -> Self {
        Self {
            label,
            source,
            destination: None,
            value: value.into(),
        }
    }

    pub fn between(label: &'static str, source: Host, destination: &str, value: impl Into<String>) -> Self {
        Self {
            label,
            source,
            destination: Some(destination.to_string()),
            value: value.into(),
        }
    }

    pub fn line(&self) -> String {
        match &self.destination {
            Some(dest) => format!(
                "{} {}->{} {}",
                self.label,
                self.source.shortname(),
                shortname(dest),
                self.value
            ),
            None => format!(
                "{} {:<width$} {}",
                self.label,
                self.source.shortname(),
                self.value,
                width = HOST_COLUMN_WIDTH
            ),
        }
    }
}

pub fn log_measurements(measurements: &[Measurement]) {
    for m in measurements {
        info!("{}", m.line());
    }
}
