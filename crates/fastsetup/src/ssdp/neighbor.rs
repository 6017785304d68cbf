// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! SSDP neighbor table with timeout eviction.
//!
//! Entries are keyed by the peer's `LOCATION` and refreshed on every valid
//! NOTIFY/RESPONSE. The sweep removes entries not refreshed within the
//! neighbor timeout; the caller fires one `lost` notification per removed
//! entry.

use crate::ssdp::packet::SsdpPacket;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One discovered peer.
#[derive(Debug, Clone)]
pub struct SsdpNeighbor {
    pub usn: String,
    pub location: String,
    pub sm_id: String,
    pub device_type: String,
    /// Monotonically non-decreasing while the entry lives.
    pub update_time: Instant,
}

/// Outcome of one upsert, used to decide whether the `found` callback
/// fires (first insert or field change, not a pure refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    New,
    Updated,
    Refreshed,
}

/// Neighbor table owned by the SSDP worker.
pub struct NeighborTable {
    entries: HashMap<String, SsdpNeighbor>,
    timeout: Duration,
}

impl NeighborTable {
    pub fn new(timeout: Duration) -> Self {
        NeighborTable {
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Insert or refresh the neighbor described by `packet`.
    pub fn upsert(&mut self, packet: &SsdpPacket, now: Instant) -> UpsertOutcome {
        if let Some(nbr) = self.entries.get_mut(&packet.location) {
            let mut changed = false;
            if nbr.usn != packet.usn {
                log::debug!("[SSDP] neighbor usn changed ({} -> {})", nbr.usn, packet.usn);
                nbr.usn = packet.usn.clone();
                changed = true;
            }
            if nbr.sm_id != packet.sm_id {
                log::debug!(
                    "[SSDP] neighbor sm_id changed ({} -> {})",
                    nbr.sm_id,
                    packet.sm_id
                );
                nbr.sm_id = packet.sm_id.clone();
                changed = true;
            }
            if nbr.device_type != packet.device_type {
                log::debug!(
                    "[SSDP] neighbor device_type changed ({} -> {})",
                    nbr.device_type,
                    packet.device_type
                );
                nbr.device_type = packet.device_type.clone();
                changed = true;
            }
            nbr.update_time = now;
            return if changed {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Refreshed
            };
        }

        self.entries.insert(
            packet.location.clone(),
            SsdpNeighbor {
                usn: packet.usn.clone(),
                location: packet.location.clone(),
                sm_id: packet.sm_id.clone(),
                device_type: packet.device_type.clone(),
                update_time: now,
            },
        );
        UpsertOutcome::New
    }

    /// Remove entries past the neighbor timeout and return them.
    pub fn sweep(&mut self, now: Instant) -> Vec<SsdpNeighbor> {
        let timeout = self.timeout;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, nbr)| now.duration_since(nbr.update_time) > timeout)
            .map(|(loc, _)| loc.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for loc in expired {
            if let Some(nbr) = self.entries.remove(&loc) {
                log::info!(
                    "[SSDP] removed timeout neighbor {} ({})",
                    nbr.sm_id,
                    nbr.location
                );
                removed.push(nbr);
            }
        }
        removed
    }

    /// Drop every entry and return them (socket close, interface change).
    pub fn clear(&mut self) -> Vec<SsdpNeighbor> {
        self.entries.drain().map(|(_, nbr)| nbr).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, location: &str) -> Option<&SsdpNeighbor> {
        self.entries.get(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssdp::packet::SsdpMethod;

    fn packet(location: &str, usn: &str) -> SsdpPacket {
        SsdpPacket {
            method: Some(SsdpMethod::Notify),
            st: "ST_P2P".to_string(),
            usn: usn.to_string(),
            location: location.to_string(),
            sm_id: "sm1".to_string(),
            device_type: "ora_device".to_string(),
        }
    }

    #[test]
    fn test_upsert_new_then_refresh() {
        let mut table = NeighborTable::new(Duration::from_millis(100));
        let now = Instant::now();

        assert_eq!(table.upsert(&packet("http://a:5678", "u1"), now), UpsertOutcome::New);
        assert_eq!(
            table.upsert(&packet("http://a:5678", "u1"), now),
            UpsertOutcome::Refreshed
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_upsert_field_change_reports_updated() {
        let mut table = NeighborTable::new(Duration::from_millis(100));
        let now = Instant::now();

        table.upsert(&packet("http://a:5678", "u1"), now);
        assert_eq!(
            table.upsert(&packet("http://a:5678", "u2"), now),
            UpsertOutcome::Updated
        );
        assert_eq!(table.get("http://a:5678").expect("present").usn, "u2");
    }

    #[test]
    fn test_update_time_monotonic() {
        let mut table = NeighborTable::new(Duration::from_secs(10));
        let t0 = Instant::now();
        table.upsert(&packet("http://a:5678", "u1"), t0);
        let t1 = t0 + Duration::from_millis(50);
        table.upsert(&packet("http://a:5678", "u1"), t1);
        assert_eq!(table.get("http://a:5678").expect("present").update_time, t1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let mut table = NeighborTable::new(Duration::from_millis(100));
        let t0 = Instant::now();

        table.upsert(&packet("http://old:5678", "u1"), t0);
        table.upsert(&packet("http://new:5678", "u2"), t0 + Duration::from_millis(150));

        let removed = table.sweep(t0 + Duration::from_millis(200));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].location, "http://old:5678");
        assert_eq!(table.len(), 1);

        // A second sweep at the same instant removes nothing more.
        assert!(table.sweep(t0 + Duration::from_millis(200)).is_empty());
    }

    #[test]
    fn test_entry_exactly_at_timeout_survives() {
        let mut table = NeighborTable::new(Duration::from_millis(100));
        let t0 = Instant::now();
        table.upsert(&packet("http://a:5678", "u1"), t0);
        assert!(table.sweep(t0 + Duration::from_millis(100)).is_empty());
        assert_eq!(table.sweep(t0 + Duration::from_millis(101)).len(), 1);
    }

    #[test]
    fn test_clear_returns_everything() {
        let mut table = NeighborTable::new(Duration::from_secs(10));
        let now = Instant::now();
        table.upsert(&packet("http://a:5678", "u1"), now);
        table.upsert(&packet("http://b:5678", "u2"), now);

        let removed = table.clear();
        assert_eq!(removed.len(), 2);
        assert!(table.is_empty());
    }
}
