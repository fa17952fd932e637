//! In-memory reference [`GraphStore`] implementation.
//!
//! Used by `recon-core`'s own tests and by `recon-cli` for a working
//! end-to-end demo; the production on-disk back-end is a pluggable,
//! out-of-scope concern.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::bus::{EventBus, LogSeverity};
use crate::error::Result;
use crate::model::canonicalize_name;

use super::{EdgeKind, GraphStore, NodeType, OutputRow};

/// Maximum CNAME/NS chain depth walked when building output rows, bounding
/// traversal against pathological CNAME/NS cycles.
const MAX_CHAIN_DEPTH: usize = 10;

struct NodeRecord {
    node_type: std::sync::Mutex<NodeType>,
    tag: String,
    source: String,
    first_seen: chrono::DateTime<Utc>,
    read: AtomicBool,
}

impl NodeRecord {
    fn new(node_type: NodeType, tag: &str, source: &str) -> Self {
        Self {
            node_type: std::sync::Mutex::new(node_type),
            tag: tag.to_string(),
            source: source.to_string(),
            first_seen: Utc::now(),
            read: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Edge {
    subject: String,
    kind: EdgeKind,
    object: String,
    uuid: Uuid,
}

/// Thread-safe, process-local graph. Writes are idempotent on a duplicate
/// `(subject, predicate, object, uuid)` triple because edges live in a
/// `DashSet`; insertion of an existing member is a no-op.
#[derive(Default)]
pub struct MemGraph {
    nodes: DashMap<String, NodeRecord>,
    edges: DashSet<Edge>,
    enumeration_domains: DashMap<Uuid, DashSet<String>>,
    bus: Option<EventBus>,
}

impl MemGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`Self::new`], but also publishes `Log` events for its own
    /// diagnostics (e.g. `insert_infrastructure`'s debug line) onto `bus`,
    /// the way every other service does through [`crate::harness::ServiceHarness`].
    pub fn with_bus(bus: EventBus) -> Self {
        Self { bus: Some(bus), ..Self::default() }
    }

    async fn log(&self, severity: LogSeverity, message: impl Into<String>) {
        if let Some(bus) = &self.bus {
            bus.log(severity, "graph", message).await;
        }
    }

    fn ensure_node(&self, key: &str, node_type: NodeType, tag: &str, source: &str) {
        self.nodes
            .entry(key.to_string())
            .or_insert_with(|| NodeRecord::new(node_type, tag, source));
    }

    /// Promotes a `Subdomain` node to `Ns`/`Mx` in place, preserving
    /// identity via a swap-in-transaction rather than a delete-then-insert.
    /// A node of any other existing type is left alone — promotion only
    /// ever specializes a plain subdomain.
    fn promote(&self, key: &str, to: NodeType) {
        if let Some(record) = self.nodes.get(key) {
            let mut current = record.node_type.lock().unwrap();
            if *current == NodeType::Subdomain {
                *current = to;
            }
        }
    }

    fn add_edge(&self, uuid: Uuid, subject: &str, kind: EdgeKind, object: &str) {
        self.edges.insert(Edge {
            subject: subject.to_string(),
            kind,
            object: object.to_string(),
            uuid,
        });
        self.enumeration_domains.entry(uuid).or_default();
    }

    fn record_domain_for_enumeration(&self, uuid: Uuid, domain: &str) {
        self.enumeration_domains.entry(uuid).or_default().insert(domain.to_string());
    }

    fn cname_target(&self, name: &str, uuid: Uuid) -> Option<String> {
        self.edges
            .iter()
            .find(|e| e.uuid == uuid && e.kind == EdgeKind::CnameTo && e.subject == name)
            .map(|e| e.object.clone())
    }

    /// The apex domain `name` was rooted under for `uuid`, via its `root_of`
    /// edge. `None` if `name` has no recorded root (e.g. it is itself an
    /// apex, or was only ever seen as a CNAME/NS/MX target).
    fn domain_of(&self, name: &str, uuid: Uuid) -> Option<String> {
        self.edges
            .iter()
            .find(|e| e.uuid == uuid && e.kind == EdgeKind::RootOf && e.object == name)
            .map(|e| e.subject.clone())
    }

    fn addresses_of(&self, name: &str, uuid: Uuid) -> Vec<IpAddr> {
        self.edges
            .iter()
            .filter(|e| e.uuid == uuid && e.subject == name && matches!(e.kind, EdgeKind::ATo | EdgeKind::AaaaTo))
            .filter_map(|e| e.object.parse::<IpAddr>().ok())
            .collect()
    }
}

#[async_trait::async_trait]
impl GraphStore for MemGraph {
    async fn insert_domain(&self, uuid: Uuid, domain: &str, tag: &str, source: &str) -> Result<()> {
        let domain = canonicalize_name(domain);
        self.ensure_node(&domain, NodeType::Domain, tag, source);
        self.record_domain_for_enumeration(uuid, &domain);
        Ok(())
    }

    async fn insert_root_of(&self, uuid: Uuid, domain: &str, name: &str, tag: &str, source: &str) -> Result<()> {
        let domain = canonicalize_name(domain);
        let name = canonicalize_name(name);
        self.ensure_node(&domain, NodeType::Domain, tag, source);
        self.ensure_node(&name, NodeType::Subdomain, tag, source);
        self.record_domain_for_enumeration(uuid, &domain);
        if domain != name {
            self.add_edge(uuid, &domain, EdgeKind::RootOf, &name);
        }
        Ok(())
    }

    async fn insert_cname(&self, uuid: Uuid, name: &str, target: &str, tag: &str, source: &str) -> Result<()> {
        let name = canonicalize_name(name);
        let target = canonicalize_name(target);
        self.ensure_node(&name, NodeType::Subdomain, tag, source);
        self.ensure_node(&target, NodeType::Subdomain, tag, source);
        self.add_edge(uuid, &name, EdgeKind::CnameTo, &target);
        Ok(())
    }

    async fn insert_a(&self, uuid: Uuid, name: &str, addr: IpAddr, tag: &str, source: &str) -> Result<()> {
        let name = canonicalize_name(name);
        self.ensure_node(&name, NodeType::Subdomain, tag, source);
        self.ensure_node(&addr.to_string(), NodeType::IpAddress, tag, source);
        self.add_edge(uuid, &name, EdgeKind::ATo, &addr.to_string());
        Ok(())
    }

    async fn insert_aaaa(&self, uuid: Uuid, name: &str, addr: IpAddr, tag: &str, source: &str) -> Result<()> {
        let name = canonicalize_name(name);
        self.ensure_node(&name, NodeType::Subdomain, tag, source);
        self.ensure_node(&addr.to_string(), NodeType::IpAddress, tag, source);
        self.add_edge(uuid, &name, EdgeKind::AaaaTo, &addr.to_string());
        Ok(())
    }

    async fn insert_ptr(&self, uuid: Uuid, ptr: &str, target: &str, tag: &str, source: &str) -> Result<()> {
        let ptr = canonicalize_name(ptr);
        let target = canonicalize_name(target);
        self.ensure_node(&ptr, NodeType::Ptr, tag, source);
        self.ensure_node(&target, NodeType::Subdomain, tag, source);
        self.add_edge(uuid, &ptr, EdgeKind::PtrTo, &target);
        Ok(())
    }

    async fn insert_srv(&self, uuid: Uuid, service: &str, target: &str, tag: &str, source: &str) -> Result<()> {
        let service = canonicalize_name(service);
        let target = canonicalize_name(target);
        self.ensure_node(&service, NodeType::Subdomain, tag, source);
        self.ensure_node(&target, NodeType::Subdomain, tag, source);
        self.add_edge(uuid, &service, EdgeKind::ServiceFor, &target);
        self.add_edge(uuid, &service, EdgeKind::SrvTo, &target);
        Ok(())
    }

    async fn insert_ns(&self, uuid: Uuid, name: &str, target: &str, tag: &str, source: &str) -> Result<()> {
        let name = canonicalize_name(name);
        let target = canonicalize_name(target);
        self.ensure_node(&name, NodeType::Subdomain, tag, source);
        self.ensure_node(&target, NodeType::Subdomain, tag, source);
        self.promote(&target, NodeType::Ns);
        self.add_edge(uuid, &name, EdgeKind::NsTo, &target);
        Ok(())
    }

    async fn insert_mx(&self, uuid: Uuid, name: &str, target: &str, tag: &str, source: &str) -> Result<()> {
        let name = canonicalize_name(name);
        let target = canonicalize_name(target);
        self.ensure_node(&name, NodeType::Subdomain, tag, source);
        self.ensure_node(&target, NodeType::Subdomain, tag, source);
        self.promote(&target, NodeType::Mx);
        self.add_edge(uuid, &name, EdgeKind::MxTo, &target);
        Ok(())
    }

    async fn insert_infrastructure(
        &self,
        uuid: Uuid,
        asn: u32,
        desc: &str,
        addr: IpAddr,
        prefix: ipnet::IpNet,
        source: &str,
        tag: &str,
    ) -> Result<()> {
        let as_key = format!("AS{asn}");
        let prefix_key = prefix.to_string();
        self.ensure_node(&as_key, NodeType::As, tag, source);
        self.ensure_node(&prefix_key, NodeType::Netblock, tag, source);
        self.ensure_node(&addr.to_string(), NodeType::IpAddress, tag, source);
        self.add_edge(uuid, &as_key, EdgeKind::HasPrefix, &prefix_key);
        self.add_edge(uuid, &prefix_key, EdgeKind::Contains, &addr.to_string());
        log::debug!("recorded infrastructure for {desc} ({as_key})");
        self.log(LogSeverity::Debug, format!("recorded infrastructure for {desc} ({as_key})")).await;
        Ok(())
    }

    async fn enumeration_list(&self) -> Result<Vec<Uuid>> {
        Ok(self.enumeration_domains.iter().map(|e| *e.key()).collect())
    }

    async fn enumeration_domains(&self, uuid: Uuid) -> Result<Vec<String>> {
        Ok(self
            .enumeration_domains
            .get(&uuid)
            .map(|set| set.iter().map(|d| d.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_output(&self, uuid: Uuid, marked_only: bool) -> Result<Vec<OutputRow>> {
        let mut rows = Vec::new();
        let root_names: HashSet<String> = self
            .edges
            .iter()
            .filter(|e| e.uuid == uuid && e.kind == EdgeKind::RootOf)
            .map(|e| e.object.clone())
            .collect();
        let subject_names: HashSet<String> = self
            .edges
            .iter()
            .filter(|e| e.uuid == uuid)
            .map(|e| e.subject.clone())
            .collect();

        for name in root_names.union(&subject_names) {
            let Some(record) = self.nodes.get(name) else { continue };
            if marked_only && !record.read.load(Ordering::SeqCst) {
                continue;
            }
            if !matches!(*record.node_type.lock().unwrap(), NodeType::Subdomain | NodeType::Ns | NodeType::Mx | NodeType::Domain) {
                continue;
            }

            let mut current = name.clone();
            let mut depth = 0;
            while let Some(target) = self.cname_target(&current, uuid) {
                if depth >= MAX_CHAIN_DEPTH || target == current {
                    break;
                }
                current = target;
                depth += 1;
            }
            let addresses = self.addresses_of(&current, uuid);
            if addresses.is_empty() {
                continue;
            }
            let domain = self.domain_of(name, uuid).unwrap_or_else(|| name.clone());
            rows.push(OutputRow {
                name: name.clone(),
                domain,
                addresses,
                tag: record.tag.clone(),
                source: record.source.clone(),
            });
        }
        Ok(rows)
    }

    async fn mark_as_read(&self, uuid: Uuid, name: &str) -> Result<()> {
        let _ = uuid;
        let name = canonicalize_name(name);
        if let Some(record) = self.nodes.get(&name) {
            record.read.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn is_cname_node(&self, uuid: Uuid, name: &str) -> Result<bool> {
        let name = canonicalize_name(name);
        Ok(self.edges.iter().any(|e| e.uuid == uuid && e.kind == EdgeKind::CnameTo && e.subject == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cname_chain_resolves_to_final_address() {
        let graph = MemGraph::new();
        let uuid = Uuid::new_v4();
        graph.insert_domain(uuid, "example.com", "dns", "test").await.unwrap();
        graph.insert_root_of(uuid, "example.com", "a.example.com", "dns", "test").await.unwrap();
        graph.insert_cname(uuid, "a.example.com", "b.example.com", "dns", "test").await.unwrap();
        graph.insert_cname(uuid, "b.example.com", "c.example.com", "dns", "test").await.unwrap();
        graph.insert_a(uuid, "c.example.com", "1.2.3.4".parse().unwrap(), "dns", "test").await.unwrap();

        assert!(graph.is_cname_node(uuid, "a.example.com").await.unwrap());
        let outputs = graph.get_output(uuid, false).await.unwrap();
        let row = outputs.iter().find(|r| r.name == "a.example.com").expect("output row for a.example.com");
        assert_eq!(row.addresses, vec!["1.2.3.4".parse::<IpAddr>().unwrap()]);
        assert_eq!(row.domain, "example.com");
    }

    #[tokio::test]
    async fn root_of_edge_is_idempotent_and_skipped_for_the_apex_itself() {
        let graph = MemGraph::new();
        let uuid = Uuid::new_v4();
        graph.insert_root_of(uuid, "example.com", "www.example.com", "dns", "test").await.unwrap();
        let before = graph.edges.len();
        graph.insert_root_of(uuid, "example.com", "www.example.com", "dns", "test").await.unwrap();
        assert_eq!(graph.edges.len(), before);

        // An apex resolving itself (e.g. A record on the bare domain) must
        // not grow a self-loop root_of edge.
        graph.insert_root_of(uuid, "example.com", "example.com", "dns", "test").await.unwrap();
        assert_eq!(graph.edges.len(), before);
    }

    #[tokio::test]
    async fn duplicate_insert_does_not_grow_edge_count() {
        let graph = MemGraph::new();
        let uuid = Uuid::new_v4();
        graph.insert_a(uuid, "www.example.com", "1.2.3.4".parse().unwrap(), "dns", "test").await.unwrap();
        let before = graph.edges.len();
        graph.insert_a(uuid, "www.example.com", "1.2.3.4".parse().unwrap(), "dns", "test").await.unwrap();
        assert_eq!(graph.edges.len(), before);
    }

    #[tokio::test]
    async fn ns_promotion_preserves_identity() {
        let graph = MemGraph::new();
        let uuid = Uuid::new_v4();
        graph.insert_a(uuid, "ns1.example.com", "1.2.3.4".parse().unwrap(), "dns", "test").await.unwrap();
        graph.insert_ns(uuid, "example.com", "ns1.example.com", "dns", "test").await.unwrap();
        let record = graph.nodes.get("ns1.example.com").unwrap();
        assert_eq!(*record.node_type.lock().unwrap(), NodeType::Ns);
    }
}
