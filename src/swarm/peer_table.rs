//! In-memory peer membership table.
//!
//! Authoritative membership state for a node. The table is a passive
//! structure with synchronous methods; the mesh manager owns the lock
//! around it and drives [`PeerTable::sweep`] on a timer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::SwarmError;
use crate::swarm::protocol::{NodeIdentity, PeerStatus};

/// One known peer and its liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub identity: NodeIdentity,
    pub status: PeerStatus,
    /// Instant of the most recent inbound heartbeat (or join).
    pub last_heartbeat_at: Instant,
    pub last_latency_ms: u64,
    /// Failed outbound heartbeat sends since the last success. Bookkeeping
    /// only; sweep transitions are driven by inbound heartbeat age.
    pub consecutive_failures: u32,
    pub joined_at: DateTime<Utc>,
}

/// Age thresholds applied by [`PeerTable::sweep`].
#[derive(Debug, Clone, Copy)]
pub struct SweepThresholds {
    pub suspected_after: Duration,
    pub unreachable_after: Duration,
    pub evict_after: Duration,
}

/// Ids transitioned by a sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub suspected: Vec<String>,
    pub unreachable: Vec<String>,
    pub evicted: Vec<String>,
}

/// Bounded membership store keyed by node id.
#[derive(Debug)]
pub struct PeerTable {
    entries: HashMap<String, PeerEntry>,
    max_peers: usize,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_peers,
        }
    }

    /// Upsert a peer.
    ///
    /// A re-join refreshes the identity, resets the entry to active with a
    /// fresh heartbeat stamp, and clears the failure count; the table never
    /// grows on re-add. A new peer is rejected when the table is full.
    pub fn add(&mut self, identity: NodeIdentity) -> Result<PeerEntry, SwarmError> {
        if let Some(entry) = self.entries.get_mut(&identity.node_id) {
            entry.identity = identity;
            entry.status = PeerStatus::Active;
            entry.last_heartbeat_at = Instant::now();
            entry.consecutive_failures = 0;
            return Ok(entry.clone());
        }

        if self.entries.len() >= self.max_peers {
            return Err(SwarmError::CapacityExceeded {
                max: self.max_peers,
            });
        }

        let entry = PeerEntry {
            identity: identity.clone(),
            status: PeerStatus::Active,
            last_heartbeat_at: Instant::now(),
            last_latency_ms: 0,
            consecutive_failures: 0,
            joined_at: Utc::now(),
        };
        self.entries.insert(identity.node_id, entry.clone());
        Ok(entry)
    }

    pub fn remove(&mut self, node_id: &str) -> Option<PeerEntry> {
        self.entries.remove(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<&PeerEntry> {
        self.entries.get(node_id)
    }

    pub fn all(&self) -> Vec<PeerEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn active(&self) -> Vec<PeerEntry> {
        self.by_status(PeerStatus::Active)
    }

    pub fn by_status(&self, status: PeerStatus) -> Vec<PeerEntry> {
        self.entries
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    /// Active peers advertising the given capability.
    pub fn by_capability(&self, capability: &str) -> Vec<PeerEntry> {
        self.entries
            .values()
            .filter(|e| {
                e.status == PeerStatus::Active
                    && e.identity.capabilities.iter().any(|c| c == capability)
            })
            .cloned()
            .collect()
    }

    /// Record an inbound heartbeat. Returns false for unknown peers.
    pub fn record_heartbeat(&mut self, node_id: &str, latency_ms: u64) -> bool {
        match self.entries.get_mut(node_id) {
            Some(entry) => {
                entry.status = PeerStatus::Active;
                entry.last_heartbeat_at = Instant::now();
                entry.last_latency_ms = latency_ms;
                entry.consecutive_failures = 0;
                true
            }
            None => false,
        }
    }

    /// Record a failed outbound send. Returns the new failure count, or -1
    /// for unknown peers.
    pub fn record_failure(&mut self, node_id: &str) -> i64 {
        match self.entries.get_mut(node_id) {
            Some(entry) => {
                entry.consecutive_failures += 1;
                i64::from(entry.consecutive_failures)
            }
            None => -1,
        }
    }

    /// Mark a peer as departed. Terminal until the peer re-joins; the entry
    /// is kept so late messages from it stay attributable.
    pub fn mark_left(&mut self, node_id: &str) -> bool {
        match self.entries.get_mut(node_id) {
            Some(entry) => {
                entry.status = PeerStatus::Left;
                true
            }
            None => false,
        }
    }

    /// Transition peers by inbound heartbeat age.
    ///
    /// For each entry not marked left, the first matching rule wins,
    /// highest threshold first: evict removes the entry, unreachable and
    /// suspected demote it. Transitions never regress status.
    pub fn sweep(&mut self, thresholds: &SweepThresholds) -> SweepOutcome {
        let now = Instant::now();
        let mut outcome = SweepOutcome::default();

        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            let entry = match self.entries.get_mut(&id) {
                Some(e) => e,
                None => continue,
            };
            if entry.status == PeerStatus::Left {
                continue;
            }

            let age = now.saturating_duration_since(entry.last_heartbeat_at);
            if age >= thresholds.evict_after {
                self.entries.remove(&id);
                outcome.evicted.push(id);
            } else if age >= thresholds.unreachable_after {
                if entry.status != PeerStatus::Unreachable {
                    entry.status = PeerStatus::Unreachable;
                    outcome.unreachable.push(id);
                }
            } else if age >= thresholds.suspected_after && entry.status == PeerStatus::Active {
                entry.status = PeerStatus::Suspected;
                outcome.suspected.push(id);
            }
        }

        outcome
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn backdate_heartbeat(&mut self, node_id: &str, age: Duration) {
        let entry = self.entries.get_mut(node_id).expect("peer exists");
        entry.last_heartbeat_at = Instant::now() - age;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(node_id: &str, capabilities: &[&str]) -> NodeIdentity {
        NodeIdentity {
            node_id: node_id.to_string(),
            display_name: node_id.to_string(),
            api_url: format!("http://{node_id}:3100"),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            version: "0.3.0".to_string(),
        }
    }

    fn thresholds() -> SweepThresholds {
        SweepThresholds {
            suspected_after: Duration::from_secs(15),
            unreachable_after: Duration::from_secs(30),
            evict_after: Duration::from_secs(120),
        }
    }

    #[test]
    fn add_inserts_active_entry() {
        let mut table = PeerTable::new(50);
        let entry = table.add(identity("remote-1", &["read-file"])).unwrap();
        assert_eq!(entry.status, PeerStatus::Active);
        assert_eq!(entry.last_latency_ms, 0);
        assert_eq!(entry.consecutive_failures, 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn re_add_refreshes_without_growing() {
        let mut table = PeerTable::new(50);
        table.add(identity("remote-1", &[])).unwrap();
        table.record_failure("remote-1");
        table.mark_left("remote-1");

        let entry = table.add(identity("remote-1", &["shell"])).unwrap();
        assert_eq!(entry.status, PeerStatus::Active);
        assert_eq!(entry.consecutive_failures, 0);
        assert_eq!(entry.identity.capabilities, vec!["shell"]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn add_rejects_when_full() {
        let mut table = PeerTable::new(2);
        table.add(identity("a", &[])).unwrap();
        table.add(identity("b", &[])).unwrap();
        let err = table.add(identity("c", &[])).unwrap_err();
        assert!(matches!(err, SwarmError::CapacityExceeded { max: 2 }));
        // Re-add of a known peer still succeeds at capacity.
        assert!(table.add(identity("a", &[])).is_ok());
    }

    #[test]
    fn record_heartbeat_revives_and_clears_failures() {
        let mut table = PeerTable::new(50);
        table.add(identity("remote-1", &[])).unwrap();
        table.record_failure("remote-1");
        table.backdate_heartbeat("remote-1", Duration::from_secs(20));
        table.sweep(&thresholds());
        assert_eq!(table.get("remote-1").unwrap().status, PeerStatus::Suspected);

        assert!(table.record_heartbeat("remote-1", 42));
        let entry = table.get("remote-1").unwrap();
        assert_eq!(entry.status, PeerStatus::Active);
        assert_eq!(entry.last_latency_ms, 42);
        assert_eq!(entry.consecutive_failures, 0);
    }

    #[test]
    fn record_heartbeat_unknown_returns_false() {
        let mut table = PeerTable::new(50);
        assert!(!table.record_heartbeat("ghost", 1));
    }

    #[test]
    fn record_failure_counts_and_signals_unknown() {
        let mut table = PeerTable::new(50);
        table.add(identity("remote-1", &[])).unwrap();
        assert_eq!(table.record_failure("remote-1"), 1);
        assert_eq!(table.record_failure("remote-1"), 2);
        assert_eq!(table.record_failure("ghost"), -1);
    }

    #[test]
    fn by_capability_filters_active_only() {
        let mut table = PeerTable::new(50);
        table.add(identity("a", &["read-file", "shell"])).unwrap();
        table.add(identity("b", &["read-file"])).unwrap();
        table.add(identity("c", &["search"])).unwrap();
        table.mark_left("b");

        let matches = table.by_capability("read-file");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].identity.node_id, "a");
    }

    #[test]
    fn sweep_marks_suspected_at_twenty_seconds() {
        let mut table = PeerTable::new(50);
        table.add(identity("remote-1", &[])).unwrap();
        table.backdate_heartbeat("remote-1", Duration::from_secs(20));

        let outcome = table.sweep(&thresholds());
        assert_eq!(outcome.suspected, vec!["remote-1".to_string()]);
        assert!(outcome.unreachable.is_empty());
        assert!(outcome.evicted.is_empty());
        assert_eq!(table.get("remote-1").unwrap().status, PeerStatus::Suspected);
    }

    #[test]
    fn sweep_evicts_at_one_hundred_thirty_seconds() {
        let mut table = PeerTable::new(50);
        table.add(identity("remote-1", &[])).unwrap();
        table.backdate_heartbeat("remote-1", Duration::from_secs(130));

        let outcome = table.sweep(&thresholds());
        assert!(outcome.suspected.is_empty());
        assert!(outcome.unreachable.is_empty());
        assert_eq!(outcome.evicted, vec!["remote-1".to_string()]);
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_is_monotone_across_passes() {
        let mut table = PeerTable::new(50);
        table.add(identity("remote-1", &[])).unwrap();

        table.backdate_heartbeat("remote-1", Duration::from_secs(20));
        table.sweep(&thresholds());
        assert_eq!(table.get("remote-1").unwrap().status, PeerStatus::Suspected);

        table.backdate_heartbeat("remote-1", Duration::from_secs(40));
        let outcome = table.sweep(&thresholds());
        assert_eq!(outcome.unreachable, vec!["remote-1".to_string()]);
        assert_eq!(
            table.get("remote-1").unwrap().status,
            PeerStatus::Unreachable
        );

        // A second pass at the same age reports nothing new.
        let outcome = table.sweep(&thresholds());
        assert!(outcome.unreachable.is_empty());
    }

    #[test]
    fn sweep_skips_departed_peers() {
        let mut table = PeerTable::new(50);
        table.add(identity("remote-1", &[])).unwrap();
        table.mark_left("remote-1");
        table.backdate_heartbeat("remote-1", Duration::from_secs(500));

        let outcome = table.sweep(&thresholds());
        assert_eq!(outcome, SweepOutcome::default());
        assert_eq!(table.get("remote-1").unwrap().status, PeerStatus::Left);
    }
}
