//! Concurrent recursive resolver pool: selection, rate governance, wildcard
//! detection, reverse DNS, zone transfer, and NSEC walk.

pub mod score;
pub mod wildcard;

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType as HickoryRecordType;
use hickory_resolver::proto::xfer::Protocol as DnsProtocol;
use hickory_resolver::Resolver as HickoryResolver;
use rand::distributions::{Distribution, WeightedIndex};
use tokio::sync::{watch, Semaphore};

use crate::bus::Priority;
use crate::error::{CoreError, Result};
use crate::model::{canonicalize_name, DnsAnswer, RecordType, Tag};

use score::{ResolverScore, TokenBucket};
use wildcard::WildcardState;

/// Default number of upstream retries before a query is given up on.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default global in-flight DNS query bound.
pub const DEFAULT_MAX_DNS_QUERIES: usize = 25;

struct Upstream {
    addr: SocketAddr,
    protocol: DnsProtocol,
    resolver: HickoryResolver<TokioConnectionProvider>,
    score: Mutex<ResolverScore>,
    bucket: Mutex<TokenBucket>,
}

impl Upstream {
    fn new(addr: SocketAddr, protocol: DnsProtocol) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(addr, protocol));
        let resolver = HickoryResolver::builder_with_config(config, TokioConnectionProvider::default()).build();
        Self {
            addr,
            protocol,
            resolver,
            score: Mutex::new(ResolverScore::default()),
            bucket: Mutex::new(TokenBucket::new(20.0, 20.0)),
        }
    }
}

/// A pool of recursive upstream resolvers shared by every service that needs
/// to issue a DNS query.
pub struct ResolverPool {
    upstreams: Vec<Upstream>,
    wildcards: DashMap<String, WildcardState>,
    zone_transfer_seen: DashSet<(String, IpAddr)>,
    /// Global bound on in-flight DNS queries (default 25).
    semaphore: Semaphore,
    reverse_semaphore: Semaphore,
    max_retries: usize,
    stop: watch::Receiver<bool>,
}

impl ResolverPool {
    /// Builds a pool from a list of upstream resolver addresses, all queried
    /// over UDP. `stop` is the enumeration's cancellation signal: every
    /// suspension point in this pool checks it and aborts cleanly.
    pub fn new(addrs: Vec<SocketAddr>, max_in_flight: usize, stop: watch::Receiver<bool>) -> Result<Self> {
        if addrs.is_empty() {
            return Err(CoreError::config("resolvers", "at least one resolver address is required"));
        }
        let upstreams = addrs.into_iter().map(|addr| Upstream::new(addr, DnsProtocol::Udp)).collect();
        Ok(Self {
            upstreams,
            wildcards: DashMap::new(),
            zone_transfer_seen: DashSet::new(),
            semaphore: Semaphore::new(max_in_flight.max(1)),
            reverse_semaphore: Semaphore::new(max_in_flight.max(1)),
            max_retries: DEFAULT_MAX_RETRIES,
            stop,
        })
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Weighted-random selection of a non-quarantined upstream. Returns
    /// `None` if every upstream is currently quarantined.
    fn select_upstream(&self, exclude: &HashSet<usize>) -> Option<usize> {
        let now = Instant::now();
        let mut candidates = Vec::new();
        let mut weights = Vec::new();
        for (idx, up) in self.upstreams.iter().enumerate() {
            if exclude.contains(&idx) {
                continue;
            }
            let mut score = up.score.lock().unwrap();
            score.lift_expired_quarantine(now);
            if score.is_quarantined(now) {
                continue;
            }
            candidates.push(idx);
            weights.push(score.weight());
        }
        if candidates.is_empty() {
            return None;
        }
        let dist = WeightedIndex::new(&weights).ok()?;
        let mut rng = rand::thread_rng();
        Some(candidates[dist.sample(&mut rng)])
    }

    /// Blocks (respecting `priority`) until a token is available on the
    /// chosen upstream's bucket, or cancellation fires.
    async fn take_token(&self, idx: usize, priority: Priority) -> Result<()> {
        loop {
            if self.is_stopped() {
                return Err(CoreError::cancelled());
            }
            let wait = {
                let mut bucket = self.upstreams[idx].bucket.lock().unwrap();
                if bucket.try_take(priority) {
                    return Ok(());
                }
                bucket.time_to_next_token()
            };
            if priority == Priority::Low && wait > Duration::from_millis(500) {
                return Err(CoreError::TransientDns(crate::error::TransientDnsError {
                    resolver: self.upstreams[idx].addr.to_string(),
                    msg: "low-priority request rejected under rate pressure".into(),
                }));
            }
            tokio::time::sleep(wait.min(Duration::from_millis(250))).await;
        }
    }

    /// `Resolve(ctx, name, qtype, priority)` — issues one query for `name`,
    /// retrying on a different upstream up to `max_retries` times on a
    /// retryable failure.
    pub async fn resolve(&self, name: &str, qtype: RecordType, priority: Priority) -> Result<Vec<DnsAnswer>> {
        let name = canonicalize_name(name);
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CoreError::cancelled())?;

        let mut tried = HashSet::new();
        let mut last_err = CoreError::TransientDns(crate::error::TransientDnsError {
            resolver: "none".into(),
            msg: "no resolvers available".into(),
        });

        for _ in 0..=self.max_retries {
            if self.is_stopped() {
                return Err(CoreError::cancelled());
            }
            let Some(idx) = self.select_upstream(&tried) else {
                break;
            };
            tried.insert(idx);
            self.take_token(idx, priority).await?;

            let started = Instant::now();
            match self.query_one(idx, &name, qtype).await {
                Ok(answers) => {
                    self.upstreams[idx].score.lock().unwrap().record_success(started.elapsed());
                    return Ok(answers);
                }
                Err(e) => {
                    self.upstreams[idx].score.lock().unwrap().record_failure(Instant::now());
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn query_one(&self, idx: usize, name: &str, qtype: RecordType) -> Result<Vec<DnsAnswer>> {
        let resolver = &self.upstreams[idx].resolver;
        let hickory_type = qtype.as_hickory();
        let lookup = resolver
            .lookup(name, hickory_type)
            .await
            .map_err(|e| CoreError::TransientDns(crate::error::TransientDnsError {
                resolver: self.upstreams[idx].addr.to_string(),
                msg: e.to_string(),
            }))?;

        let mut answers = Vec::new();
        for record in lookup.record_iter() {
            let Some(rtype) = RecordType::from_hickory(record.record_type()) else {
                continue;
            };
            if rtype != qtype {
                continue;
            }
            let data = record
                .data()
                .map(|d| d.to_string())
                .unwrap_or_default();
            answers.push(DnsAnswer::new(name, rtype, record.ttl(), data));
        }
        Ok(answers)
    }

    /// `ReverseDNS(ip)` — PTR lookup, rate-governed separately from the
    /// forward-query bucket.
    pub async fn reverse_dns(&self, ip: IpAddr) -> Result<(String, Vec<DnsAnswer>)> {
        let _permit = self
            .reverse_semaphore
            .acquire()
            .await
            .map_err(|_| CoreError::cancelled())?;
        if self.is_stopped() {
            return Err(CoreError::cancelled());
        }
        let Some(idx) = self.select_upstream(&HashSet::new()) else {
            return Err(CoreError::TransientDns(crate::error::TransientDnsError {
                resolver: "none".into(),
                msg: "no resolvers available for reverse lookup".into(),
            }));
        };
        let resolver = &self.upstreams[idx].resolver;
        let lookup = resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| CoreError::TransientDns(crate::error::TransientDnsError {
                resolver: self.upstreams[idx].addr.to_string(),
                msg: e.to_string(),
            }))?;
        let ptrname = format!("{}.in-addr.arpa", ip);
        let answers = lookup
            .iter()
            .map(|name| DnsAnswer::new(&ptrname, RecordType::Ptr, 0, name.to_string()))
            .collect();
        Ok((ptrname, answers))
    }

    /// Classifies `domain`'s wildcard behavior the first time it is queried
    /// in this enumeration, caching the result for every subsequent
    /// `matches_wildcard` call.
    pub async fn classify_wildcard(&self, domain: &str, depth_label: &str) -> Result<()> {
        let domain = canonicalize_name(domain);
        if self.wildcards.contains_key(&domain) {
            return Ok(());
        }
        let mut probes = Vec::with_capacity(wildcard::WILDCARD_PROBE_COUNT);
        for _ in 0..wildcard::WILDCARD_PROBE_COUNT {
            let label = wildcard::random_label(12);
            let probe_name = format!("{label}.{depth_label}.{domain}");
            let answers = self.resolve(&probe_name, RecordType::A, Priority::Low).await.unwrap_or_default();
            probes.push(answers);
        }
        let state = wildcard::classify(&probes);
        self.wildcards.insert(domain, state);
        Ok(())
    }

    /// `MatchesWildcard(req)` — see [`WildcardState::matches`]. Domains not
    /// yet classified are treated as [`WildcardState::None`].
    pub fn matches_wildcard(&self, domain: &str, answers: &[DnsAnswer], tag: Tag) -> bool {
        let domain = canonicalize_name(domain);
        match self.wildcards.get(&domain) {
            Some(state) => state.matches(answers, tag),
            None => false,
        }
    }

    /// `ZoneTransfer(sub, domain, nsAddr)` — attempts an AXFR against
    /// `ns_addr` for `sub`, expanding it into a batch of discovered names.
    /// Expensive; deduplicated per (sub, server) for the lifetime of the
    /// pool.
    pub async fn zone_transfer(&self, sub: &str, domain: &str, ns_addr: IpAddr) -> Result<Vec<DnsAnswer>> {
        let sub = canonicalize_name(sub);
        if !self.zone_transfer_seen.insert((sub.clone(), ns_addr)) {
            return Ok(Vec::new());
        }
        let _permit = self.semaphore.acquire().await.map_err(|_| CoreError::cancelled())?;

        let socket = SocketAddr::new(ns_addr, 53);
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(socket, DnsProtocol::Tcp));
        let resolver = HickoryResolver::builder_with_config(config, TokioConnectionProvider::default()).build();

        let lookup = resolver
            .lookup(sub.as_str(), HickoryRecordType::AXFR)
            .await
            .map_err(|e| CoreError::TransientDns(crate::error::TransientDnsError {
                resolver: socket.to_string(),
                msg: format!("zone transfer for {domain} refused or failed: {e}"),
            }))?;

        let mut answers = Vec::new();
        for record in lookup.record_iter() {
            if let Some(rtype) = RecordType::from_hickory(record.record_type()) {
                let data = record.data().map(|d| d.to_string()).unwrap_or_default();
                answers.push(DnsAnswer::new(record.name().to_string(), rtype, record.ttl(), data));
            }
        }
        Ok(answers)
    }

    /// `NsecTraversal(domain, nsAddr)` — walks a DNSSEC-signed zone's NSEC
    /// chain by repeatedly querying the "next" owner name returned by each
    /// NSEC record, stopping when the chain wraps back to the start or a
    /// bounded number of steps is exceeded.
    pub async fn nsec_traversal(&self, domain: &str, ns_addr: IpAddr) -> Result<Vec<String>> {
        const MAX_STEPS: usize = 256;
        let domain = canonicalize_name(domain);
        let socket = SocketAddr::new(ns_addr, 53);
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(socket, DnsProtocol::Udp));
        let resolver = HickoryResolver::builder_with_config(config, TokioConnectionProvider::default()).build();

        let mut discovered = Vec::new();
        let mut current = domain.clone();
        let mut seen = HashSet::new();
        for _ in 0..MAX_STEPS {
            if self.is_stopped() {
                break;
            }
            let Ok(lookup) = resolver.lookup(current.as_str(), HickoryRecordType::NSEC).await else {
                break;
            };
            let mut advanced = false;
            for record in lookup.record_iter() {
                let next = record.data().map(|d| d.to_string()).unwrap_or_default();
                let next = canonicalize_name(next.split_whitespace().next().unwrap_or(""));
                if next.is_empty() || !seen.insert(next.clone()) {
                    continue;
                }
                discovered.push(next.clone());
                current = next;
                advanced = true;
                break;
            }
            if !advanced {
                break;
            }
        }
        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (ResolverPool, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let pool = ResolverPool::new(vec!["8.8.8.8:53".parse().unwrap()], 4, rx).unwrap();
        (pool, tx)
    }

    #[test]
    fn construction_requires_at_least_one_resolver() {
        let (_tx, rx) = watch::channel(false);
        assert!(ResolverPool::new(Vec::new(), 4, rx).is_err());
    }

    #[test]
    fn unclassified_domain_never_suppresses() {
        let (pool, _tx) = pool();
        assert!(!pool.matches_wildcard("example.com", &[], Tag::Brute));
    }
}
