//! Typed result graph: nodes, deduplicating edges, per-enumeration labels.

pub mod mem;

use std::net::IpAddr;

use uuid::Uuid;

use crate::error::Result;

/// Node kinds the graph understands. A `Subdomain` node is promoted to `Ns`
/// or `Mx` in place when discovered to be more specific; every other node
/// type is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Domain,
    Subdomain,
    Ptr,
    Ns,
    Mx,
    IpAddress,
    Netblock,
    As,
}

/// Directed edge predicates, each labelled with the enumeration UUID that
/// created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    RootOf,
    CnameTo,
    ATo,
    AaaaTo,
    PtrTo,
    NsTo,
    MxTo,
    SrvTo,
    ServiceFor,
    Contains,
    HasPrefix,
}

/// The trait a pluggable on-disk graph back-end implements. The production
/// back-end is out of scope for `recon-core`; [`mem::MemGraph`] is the
/// in-memory reference implementation used by tests and by `recon-cli` for
/// an end-to-end demo.
///
/// All writes must be idempotent on a duplicate `(subject, predicate,
/// object, label)` triple.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    async fn insert_domain(&self, uuid: Uuid, domain: &str, tag: &str, source: &str) -> Result<()>;

    /// Records that `name` was discovered under apex `domain`, adding the
    /// `root_of` edge (Domain→Subdomain) the first time this pair is seen
    /// for `uuid`. Idempotent like every other insert.
    async fn insert_root_of(&self, uuid: Uuid, domain: &str, name: &str, tag: &str, source: &str) -> Result<()>;

    async fn insert_cname(&self, uuid: Uuid, name: &str, target: &str, tag: &str, source: &str) -> Result<()>;

    async fn insert_a(&self, uuid: Uuid, name: &str, addr: IpAddr, tag: &str, source: &str) -> Result<()>;

    async fn insert_aaaa(&self, uuid: Uuid, name: &str, addr: IpAddr, tag: &str, source: &str) -> Result<()>;

    async fn insert_ptr(&self, uuid: Uuid, ptr: &str, target: &str, tag: &str, source: &str) -> Result<()>;

    async fn insert_srv(&self, uuid: Uuid, service: &str, target: &str, tag: &str, source: &str) -> Result<()>;

    async fn insert_ns(&self, uuid: Uuid, name: &str, target: &str, tag: &str, source: &str) -> Result<()>;

    async fn insert_mx(&self, uuid: Uuid, name: &str, target: &str, tag: &str, source: &str) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn insert_infrastructure(
        &self,
        uuid: Uuid,
        asn: u32,
        desc: &str,
        addr: IpAddr,
        prefix: ipnet::IpNet,
        source: &str,
        tag: &str,
    ) -> Result<()>;

    /// All UUIDs the store has recorded an enumeration for.
    async fn enumeration_list(&self) -> Result<Vec<Uuid>>;

    /// All apex domains touched by a given enumeration.
    async fn enumeration_domains(&self, uuid: Uuid) -> Result<Vec<String>>;

    /// Builds the resolved output rows for one enumeration by walking
    /// CNAME/NS chains (capped at depth 10) down to an address.
    async fn get_output(&self, uuid: Uuid, marked_only: bool) -> Result<Vec<OutputRow>>;

    async fn mark_as_read(&self, uuid: Uuid, name: &str) -> Result<()>;

    async fn is_cname_node(&self, uuid: Uuid, name: &str) -> Result<bool>;
}

/// One resolved-name row as returned by `GetOutput`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub name: String,
    pub domain: String,
    pub addresses: Vec<IpAddr>,
    pub tag: String,
    pub source: String,
}
