// src/planning.rs
//! Reservation planning
//!
//! Finds the earliest time window in which every usable node of a cluster is
//! free for the requested walltime. Busy intervals come from the site status
//! API (see `api.rs`); times are UNIX timestamps in seconds.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;

/// Half-open busy interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start < end && self.end > start
    }
}

/// Planning of one node
#[derive(Debug, Clone)]
pub struct NodePlanning {
    pub host: String,
    /// Dead or suspected nodes can never be reserved
    pub usable: bool,
    pub busy: Vec<Interval>,
}

impl NodePlanning {
    pub fn is_free(&self, start: i64, end: i64) -> bool {
        self.usable && !self.busy.iter().any(|b| b.overlaps(start, end))
    }
}

/// A window in which `nodes` nodes are free
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub start: i64,
    pub end: i64,
    pub nodes: usize,
}

/// First window starting at or after `now` in which all usable nodes are free
/// for `walltime`.
///
/// Candidate starts are `now` and the end of every busy interval after `now`:
/// availability only improves when a reservation ends.
pub fn find_first_full_slot(planning: &[NodePlanning], now: i64, walltime: Duration) -> Option<Slot> {
    let usable: Vec<&NodePlanning> = planning.iter().filter(|n| n.usable).collect();
    if usable.is_empty() {
        return None;
    }
    let length = walltime.as_secs() as i64;

    let mut candidates: Vec<i64> = std::iter::once(now)
        .chain(usable.iter().flat_map(|n| n.busy.iter().map(|b| b.end)).filter(|end| *end > now))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    candidates.into_iter().find_map(|start| {
        let end = start + length;
        usable.iter().all(|n| n.is_free(start, end)).then_some(Slot {
            start,
            end,
            nodes: usable.len(),
        })
    })
}

/// Parse an OAR walltime: `H:MM:SS`, `D:HH:MM:SS`, `H:MM` or a bare number of hours
pub fn parse_walltime(s: &str) -> Result<Duration> {
    let s = s.trim();
    let fields: Vec<u64> = s
        .split(':')
        .map(|f| f.parse::<u64>().map_err(|_| anyhow!("Invalid walltime: {}", s)))
        .collect::<Result<_>>()?;

    let secs = match fields.as_slice() {
        [h] => h * 3600,
        [h, m] => h * 3600 + m * 60,
        [h, m, sec] => h * 3600 + m * 60 + sec,
        [d, h, m, sec] => d * 86_400 + h * 3600 + m * 60 + sec,
        _ => bail!("Invalid walltime: {}", s),
    };
    if secs == 0 {
        bail!("Walltime must be positive: {}", s);
    }
    Ok(Duration::from_secs(secs))
}

/// Format a duration the way OAR expects a walltime (`H:MM:SS`)
pub fn format_walltime(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(host: &str, busy: &[(i64, i64)]) -> NodePlanning {
        NodePlanning {
            host: host.to_string(),
            usable: true,
            busy: busy.iter().map(|(s, e)| Interval::new(*s, *e)).collect(),
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_all_free_starts_now() {
        let planning = vec![node("a-1", &[]), node("a-2", &[])];
        let slot = find_first_full_slot(&planning, 1000, HOUR).unwrap();
        assert_eq!(slot, Slot { start: 1000, end: 4600, nodes: 2 });
    }

    #[test]
    fn test_waits_for_last_busy_node() {
        let planning = vec![node("a-1", &[(0, 2000)]), node("a-2", &[(500, 5000)])];
        let slot = find_first_full_slot(&planning, 1000, HOUR).unwrap();
        assert_eq!(slot.start, 5000);
        assert_eq!(slot.nodes, 2);
    }

    #[test]
    fn test_gap_too_short_is_skipped() {
        // Free between 2000 and 4000 only: too short for one hour
        let planning = vec![node("a-1", &[(0, 2000), (4000, 8000)])];
        let slot = find_first_full_slot(&planning, 1000, HOUR).unwrap();
        assert_eq!(slot.start, 8000);
    }

    #[test]
    fn test_gap_long_enough_is_used() {
        let planning = vec![node("a-1", &[(0, 2000), (5600, 9000)]), node("a-2", &[])];
        let slot = find_first_full_slot(&planning, 1000, HOUR).unwrap();
        assert_eq!(slot.start, 2000);
        assert_eq!(slot.end, 5600);
    }

    #[test]
    fn test_dead_nodes_are_ignored() {
        let mut dead = node("a-2", &[(0, 100_000)]);
        dead.usable = false;
        let planning = vec![node("a-1", &[]), dead];
        let slot = find_first_full_slot(&planning, 0, HOUR).unwrap();
        assert_eq!(slot.start, 0);
        assert_eq!(slot.nodes, 1);
    }

    #[test]
    fn test_no_usable_node() {
        let mut dead = node("a-1", &[]);
        dead.usable = false;
        assert!(find_first_full_slot(&[dead], 0, HOUR).is_none());
        assert!(find_first_full_slot(&[], 0, HOUR).is_none());
    }

    #[test]
    fn test_parse_walltime() {
        assert_eq!(parse_walltime("3:00:00").unwrap(), Duration::from_secs(3 * 3600));
        assert_eq!(parse_walltime("0:30:15").unwrap(), Duration::from_secs(1815));
        assert_eq!(parse_walltime("1:02:00:00").unwrap(), Duration::from_secs(26 * 3600));
        assert_eq!(parse_walltime("2:30").unwrap(), Duration::from_secs(9000));
        assert_eq!(parse_walltime("4").unwrap(), Duration::from_secs(4 * 3600));
        assert!(parse_walltime("three hours").is_err());
        assert!(parse_walltime("0:00:00").is_err());
        assert!(parse_walltime("1:2:3:4:5").is_err());
    }

    #[test]
    fn test_format_walltime() {
        assert_eq!(format_walltime(Duration::from_secs(3 * 3600)), "3:00:00");
        assert_eq!(format_walltime(Duration::from_secs(26 * 3600 + 65)), "26:01:05");
    }
}
