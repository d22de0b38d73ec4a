//! # Statistics Engine
//!
//! Derives a cached aggregate view of the current target set: method,
//! protocol, port, and TLD distributions, SSL usage, and the most-hit
//! hosts and IPs. The view is a read model only: it is regenerated from
//! the snapshot store's indices and is never authoritative.
//!
//! ## Caching
//!
//! A computed snapshot stays valid for a fixed wall-clock window
//! (default 5 minutes), measured from computation time. Ingesting a new
//! snapshot does NOT invalidate the cache; read paths inside the window
//! can serve statistics that predate the newest dump. This is a known,
//! deliberate limitation (a tighter policy would invalidate on ingest)
//! and is pinned by `stale_cache_survives_ingest` below.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::SnapshotStore;
use crate::tld::extract_tld;
use crate::StatisticsConfig;

/// Percentage of `count` against `total`; 0 for an empty population.
fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Cap on example paths/hosts carried per method entry.
const METHOD_EXAMPLE_LIMIT: usize = 10;
/// Cap on distinct ports carried per protocol entry.
const PROTOCOL_PORT_LIMIT: usize = 5;
/// Size of the top-hosts / top-IPs leaderboards.
const TOP_N: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodStats {
    pub method: String,
    pub count: usize,
    pub percentage: f64,
    /// Up to 10 example request paths using this method.
    pub example_paths: Vec<String>,
    /// Up to 10 hosts targeted with this method.
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolStats {
    pub protocol: String,
    pub count: usize,
    pub percentage: f64,
    pub avg_port: f64,
    /// Up to 5 distinct ports seen for this protocol.
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortStats {
    pub port: u16,
    pub count: usize,
    pub percentage: f64,
    pub protocols: BTreeSet<String>,
    /// Whether the port is on the configured common-port allowlist.
    pub is_common: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TldStats {
    pub tld: String,
    pub count: usize,
    pub percentage: f64,
    pub hosts: BTreeSet<String>,
    pub unique_ips: usize,
    pub methods: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslSplit {
    pub ssl: usize,
    pub plain: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslStats {
    pub ssl_count: usize,
    pub plain_count: usize,
    pub ssl_percentage: f64,
    /// Per-protocol ssl/plain breakdown.
    pub per_protocol: BTreeMap<String, SslSplit>,
}

/// One row of the top-hosts or top-IPs leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointActivity {
    /// Host name or IP address, depending on the leaderboard.
    pub name: String,
    pub target_count: usize,
    pub methods: BTreeSet<String>,
    pub protocols: BTreeSet<String>,
    /// IPs for a host row; hosts for an IP row.
    pub peers: BTreeSet<String>,
}

/// The derived aggregate view. Regenerated from index state; never
/// authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub total_targets: usize,
    pub methods: Vec<MethodStats>,
    pub protocols: Vec<ProtocolStats>,
    pub ports: Vec<PortStats>,
    pub tlds: Vec<TldStats>,
    pub ssl: SslStats,
    pub top_hosts: Vec<EndpointActivity>,
    pub top_ips: Vec<EndpointActivity>,
}

/// Computes and caches `StatisticsSnapshot`s over the store's current
/// target set (latest-known record per target id).
pub struct StatisticsEngine {
    config: StatisticsConfig,
    cached: Option<(Instant, Arc<StatisticsSnapshot>)>,
}

impl StatisticsEngine {
    pub fn new(config: &StatisticsConfig) -> Self {
        Self {
            config: config.clone(),
            cached: None,
        }
    }

    /// The current statistics view, recomputing only when the cached one
    /// has outlived the validity window.
    pub fn statistics(&mut self, store: &SnapshotStore) -> Arc<StatisticsSnapshot> {
        if let Some((computed_at, snapshot)) = &self.cached {
            if computed_at.elapsed().as_secs() < self.config.cache_ttl_secs {
                return Arc::clone(snapshot);
            }
        }

        let snapshot = Arc::new(self.compute(store));
        self.cached = Some((Instant::now(), Arc::clone(&snapshot)));
        snapshot
    }

    /// Drop the cached view so the next query recomputes.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Single pass over the latest-known record of every target.
    fn compute(&self, store: &SnapshotStore) -> StatisticsSnapshot {
        let indices = store.indices();
        let records: Vec<_> = indices.latest_records.values().collect();
        let total = records.len();

        // Accumulators, one pass.
        let mut by_method: HashMap<&str, Vec<&crate::TargetRecord>> = HashMap::new();
        let mut by_protocol: HashMap<&str, Vec<&crate::TargetRecord>> = HashMap::new();
        let mut by_port: HashMap<u16, Vec<&crate::TargetRecord>> = HashMap::new();
        let mut by_tld: HashMap<String, Vec<&crate::TargetRecord>> = HashMap::new();
        let mut by_host: HashMap<&str, Vec<&crate::TargetRecord>> = HashMap::new();
        let mut by_ip: HashMap<&str, Vec<&crate::TargetRecord>> = HashMap::new();
        let mut ssl_count = 0usize;
        let mut per_protocol_ssl: BTreeMap<String, SslSplit> = BTreeMap::new();

        for &record in &records {
            if let Some(method) = &record.method {
                by_method.entry(method.as_str()).or_default().push(record);
            }
            by_protocol
                .entry(record.protocol.as_str())
                .or_default()
                .push(record);
            by_port.entry(record.port).or_default().push(record);
            by_tld
                .entry(extract_tld(&record.host))
                .or_default()
                .push(record);
            by_host.entry(record.host.as_str()).or_default().push(record);
            by_ip.entry(record.ip.as_str()).or_default().push(record);

            let split = per_protocol_ssl.entry(record.protocol.clone()).or_default();
            if record.ssl {
                ssl_count += 1;
                split.ssl += 1;
            } else {
                split.plain += 1;
            }
        }

        let mut methods: Vec<MethodStats> = by_method
            .into_iter()
            .map(|(method, recs)| {
                let mut example_paths: Vec<String> = Vec::new();
                let mut hosts: Vec<String> = Vec::new();
                for r in &recs {
                    if example_paths.len() < METHOD_EXAMPLE_LIMIT
                        && !example_paths.contains(&r.path)
                    {
                        example_paths.push(r.path.clone());
                    }
                    if hosts.len() < METHOD_EXAMPLE_LIMIT && !hosts.contains(&r.host) {
                        hosts.push(r.host.clone());
                    }
                }
                MethodStats {
                    method: method.to_string(),
                    count: recs.len(),
                    percentage: percentage(recs.len(), total),
                    example_paths,
                    hosts,
                }
            })
            .collect();
        methods.sort_by(|a, b| b.count.cmp(&a.count).then(a.method.cmp(&b.method)));

        let mut protocols: Vec<ProtocolStats> = by_protocol
            .into_iter()
            .map(|(protocol, recs)| {
                let port_sum: u64 = recs.iter().map(|r| r.port as u64).sum();
                let mut ports: Vec<u16> = Vec::new();
                for r in &recs {
                    if !ports.contains(&r.port) {
                        ports.push(r.port);
                    }
                }
                ports.sort_unstable();
                ports.truncate(PROTOCOL_PORT_LIMIT);
                ProtocolStats {
                    protocol: protocol.to_string(),
                    count: recs.len(),
                    percentage: percentage(recs.len(), total),
                    avg_port: if recs.is_empty() {
                        0.0
                    } else {
                        port_sum as f64 / recs.len() as f64
                    },
                    ports,
                }
            })
            .collect();
        protocols.sort_by(|a, b| b.count.cmp(&a.count).then(a.protocol.cmp(&b.protocol)));

        let mut ports: Vec<PortStats> = by_port
            .into_iter()
            .map(|(port, recs)| PortStats {
                port,
                count: recs.len(),
                percentage: percentage(recs.len(), total),
                protocols: recs.iter().map(|r| r.protocol.clone()).collect(),
                is_common: self.config.common_ports.contains(&port),
            })
            .collect();
        ports.sort_by(|a, b| b.count.cmp(&a.count).then(a.port.cmp(&b.port)));

        let mut tlds: Vec<TldStats> = by_tld
            .into_iter()
            .map(|(tld, recs)| {
                let ips: BTreeSet<&str> = recs.iter().map(|r| r.ip.as_str()).collect();
                TldStats {
                    count: recs.len(),
                    percentage: percentage(recs.len(), total),
                    hosts: recs.iter().map(|r| r.host.clone()).collect(),
                    unique_ips: ips.len(),
                    methods: recs.iter().filter_map(|r| r.method.clone()).collect(),
                    tld,
                }
            })
            .collect();
        tlds.sort_by(|a, b| b.count.cmp(&a.count).then(a.tld.cmp(&b.tld)));

        let top_hosts = leaderboard(by_host, |r| r.ip.clone());
        let top_ips = leaderboard(by_ip, |r| r.host.clone());

        StatisticsSnapshot {
            generated_at: Utc::now(),
            total_targets: total,
            methods,
            protocols,
            ports,
            tlds,
            ssl: SslStats {
                ssl_count,
                plain_count: total - ssl_count,
                ssl_percentage: percentage(ssl_count, total),
                per_protocol: per_protocol_ssl,
            },
            top_hosts,
            top_ips,
        }
    }
}

/// Top-10 rows by target count from a name -> records grouping.
/// `peer_of` picks the opposite dimension (IP for hosts, host for IPs).
fn leaderboard<F>(
    groups: HashMap<&str, Vec<&crate::TargetRecord>>,
    peer_of: F,
) -> Vec<EndpointActivity>
where
    F: Fn(&crate::TargetRecord) -> String,
{
    let mut rows: Vec<EndpointActivity> = groups
        .into_iter()
        .map(|(name, recs)| EndpointActivity {
            name: name.to_string(),
            target_count: recs.len(),
            methods: recs.iter().filter_map(|r| r.method.clone()).collect(),
            protocols: recs.iter().map(|r| r.protocol.clone()).collect(),
            peers: recs.iter().map(|&r| peer_of(r)).collect(),
        })
        .collect();
    rows.sort_by(|a, b| b.target_count.cmp(&a.target_count).then(a.name.cmp(&b.name)));
    rows.truncate(TOP_N);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SnapshotFile, TargetRecord};

    fn record(id: &str, host: &str, ip: &str, method: &str, port: u16, ssl: bool) -> TargetRecord {
        TargetRecord {
            target_id: id.to_string(),
            request_id: format!("req-{id}"),
            host: host.to_string(),
            ip: ip.to_string(),
            protocol: if ssl { "https".into() } else { "http".into() },
            method: Some(method.to_string()),
            port,
            ssl,
            path: format!("/path/{id}"),
            body: None,
            headers: None,
        }
    }

    fn store_with(records: Vec<TargetRecord>) -> SnapshotStore {
        let mut store = SnapshotStore::new();
        store
            .ingest(
                "2026-03-01_10-00-00_a.json",
                SnapshotFile {
                    targets: Some(records),
                    randoms: Vec::new(),
                },
            )
            .unwrap();
        store
    }

    fn config() -> StatisticsConfig {
        StatisticsConfig {
            cache_ttl_secs: 300,
            common_ports: vec![80, 443, 8080, 8443],
        }
    }

    #[test]
    fn empty_store_yields_zero_percentages() {
        let store = SnapshotStore::new();
        let mut engine = StatisticsEngine::new(&config());
        let stats = engine.statistics(&store);

        assert_eq!(stats.total_targets, 0);
        assert!(stats.methods.is_empty());
        assert_eq!(stats.ssl.ssl_percentage, 0.0);
    }

    #[test]
    fn method_distribution_is_sorted_and_capped() {
        let mut records = Vec::new();
        for i in 0..3 {
            records.push(record(&format!("g{i}"), "a.example.com", "1.1.1.1", "GET", 443, true));
        }
        records.push(record("p0", "b.example.com", "1.1.1.2", "POST", 443, true));
        let store = store_with(records);

        let mut engine = StatisticsEngine::new(&config());
        let stats = engine.statistics(&store);

        assert_eq!(stats.methods[0].method, "GET");
        assert_eq!(stats.methods[0].count, 3);
        assert_eq!(stats.methods[0].percentage, 75.0);
        assert_eq!(stats.methods[1].method, "POST");
        assert!(stats.methods[0].example_paths.len() <= 10);
    }

    #[test]
    fn port_distribution_flags_common_ports() {
        let store = store_with(vec![
            record("t1", "a.example.com", "1.1.1.1", "GET", 443, true),
            record("t2", "b.example.com", "1.1.1.2", "GET", 4444, false),
        ]);
        let mut engine = StatisticsEngine::new(&config());
        let stats = engine.statistics(&store);

        let p443 = stats.ports.iter().find(|p| p.port == 443).unwrap();
        let p4444 = stats.ports.iter().find(|p| p.port == 4444).unwrap();
        assert!(p443.is_common);
        assert!(!p4444.is_common);
    }

    #[test]
    fn tld_distribution_counts_unique_ips() {
        let store = store_with(vec![
            record("t1", "a.example.com", "1.1.1.1", "GET", 443, true),
            record("t2", "b.example.com", "1.1.1.1", "GET", 443, true),
            record("t3", "c.example.com", "1.1.1.2", "POST", 443, true),
        ]);
        let mut engine = StatisticsEngine::new(&config());
        let stats = engine.statistics(&store);

        let tld = stats.tlds.iter().find(|t| t.tld == ".example.com").unwrap();
        assert_eq!(tld.count, 3);
        assert_eq!(tld.unique_ips, 2);
        assert_eq!(tld.hosts.len(), 3);
        assert!(tld.methods.contains("POST"));
    }

    #[test]
    fn ssl_split_tracks_per_protocol_breakdown() {
        let store = store_with(vec![
            record("t1", "a.example.com", "1.1.1.1", "GET", 443, true),
            record("t2", "b.example.com", "1.1.1.2", "GET", 80, false),
            record("t3", "c.example.com", "1.1.1.3", "GET", 8443, true),
        ]);
        let mut engine = StatisticsEngine::new(&config());
        let stats = engine.statistics(&store);

        assert_eq!(stats.ssl.ssl_count, 2);
        assert_eq!(stats.ssl.plain_count, 1);
        assert_eq!(stats.ssl.per_protocol["https"].ssl, 2);
        assert_eq!(stats.ssl.per_protocol["http"].plain, 1);
    }

    #[test]
    fn top_hosts_ranked_by_target_count() {
        let mut records = Vec::new();
        for i in 0..4 {
            records.push(record(&format!("a{i}"), "busy.example.com", "1.1.1.1", "GET", 443, true));
        }
        records.push(record("b0", "quiet.example.com", "1.1.1.2", "GET", 443, true));
        let store = store_with(records);

        let mut engine = StatisticsEngine::new(&config());
        let stats = engine.statistics(&store);

        assert_eq!(stats.top_hosts[0].name, "busy.example.com");
        assert_eq!(stats.top_hosts[0].target_count, 4);
        assert!(stats.top_hosts[0].peers.contains("1.1.1.1"));
        assert_eq!(stats.top_ips[0].name, "1.1.1.1");
    }

    /// Pins the carried-over limitation: within the TTL, ingest does not
    /// refresh the cached view.
    #[test]
    fn stale_cache_survives_ingest() {
        let mut store = store_with(vec![record(
            "t1",
            "a.example.com",
            "1.1.1.1",
            "GET",
            443,
            true,
        )]);
        let mut engine = StatisticsEngine::new(&config());
        assert_eq!(engine.statistics(&store).total_targets, 1);

        store
            .ingest(
                "2026-03-01_11-00-00_b.json",
                SnapshotFile {
                    targets: Some(vec![
                        record("t1", "a.example.com", "1.1.1.1", "GET", 443, true),
                        record("t2", "b.example.com", "1.1.1.2", "GET", 443, true),
                    ]),
                    randoms: Vec::new(),
                },
            )
            .unwrap();

        // Still the cached view.
        assert_eq!(engine.statistics(&store).total_targets, 1);

        // An explicit invalidate (or TTL expiry) picks up the new state.
        engine.invalidate();
        assert_eq!(engine.statistics(&store).total_targets, 2);
    }

    #[test]
    fn zero_ttl_recomputes_every_query() {
        let store = store_with(vec![record(
            "t1",
            "a.example.com",
            "1.1.1.1",
            "GET",
            443,
            true,
        )]);
        let mut engine = StatisticsEngine::new(&StatisticsConfig {
            cache_ttl_secs: 0,
            common_ports: vec![],
        });
        let first = engine.statistics(&store);
        let second = engine.statistics(&store);
        // Different Arc allocations prove a recompute happened.
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
