//! DNS service: resolves candidate names, classifies records, emits
//! `NameResolved`/`Output`, and drives subdomain-tier NS/MX/SOA/SPF/SRV
//! processing plus conditional zone transfer.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bus::{Event, EventBus, LogSeverity, Priority, Topic};
use crate::config::{common_srv_labels, default_bad_subnets, is_bad_subnet};
use crate::harness::ServiceHarness;
use crate::model::{DnsAnswer, DnsRequest, RecordType, Tag};
use crate::resolver::ResolverPool;
use crate::scope::ScopeConfig;

/// Configuration the DNS service reads at construction; a subset of
/// [`crate::config::EngineConfig`].
pub struct DnsServiceConfig {
    pub active: bool,
    pub include_unresolvable: bool,
    pub bad_subnets: Vec<ipnet::IpNet>,
}

impl Default for DnsServiceConfig {
    fn default() -> Self {
        Self { active: false, include_unresolvable: false, bad_subnets: default_bad_subnets() }
    }
}

pub struct DnsService {
    harness: ServiceHarness,
    bus: EventBus,
    pool: Arc<ResolverPool>,
    scope: Arc<ScopeConfig>,
    config: DnsServiceConfig,
}

impl DnsService {
    pub fn new(bus: EventBus, pool: Arc<ResolverPool>, scope: Arc<ScopeConfig>, config: DnsServiceConfig) -> Self {
        Self {
            harness: ServiceHarness::new("dns", bus.clone(), Duration::ZERO),
            bus,
            pool,
            scope,
            config,
        }
    }

    /// Starts the service: subscribes to `NewName`/`NewSubdomain` and runs
    /// both consumer loops until `stop` fires.
    pub fn spawn(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.harness.start().await;
            let (mut new_name_rx, _sub_a) = self.bus.subscribe(Topic::NewName);
            let (mut new_subdomain_rx, _sub_b) = self.bus.subscribe(Topic::NewSubdomain);

            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            break;
                        }
                    }
                    delivery = new_name_rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        if let Event::NewName(req) = delivery.event {
                            let svc = Arc::clone(&self);
                            self.harness.spawn_tracked(async move { svc.handle_new_name(req).await });
                        }
                    }
                    delivery = new_subdomain_rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        if let Event::NewSubdomain { name, times } = delivery.event {
                            if times == 1 {
                                let svc = Arc::clone(&self);
                                self.harness.spawn_tracked(async move { svc.handle_new_subdomain(&name).await });
                            }
                        }
                    }
                }
            }
            self.harness.stop(Duration::from_secs(2)).await;
        })
    }

    /// Per-name resolution algorithm.
    async fn handle_new_name(&self, req: DnsRequest) {
        if self.scope.blacklisted(&req.name) {
            log::debug!("dns: {} is blacklisted", req.name);
            self.bus.log(LogSeverity::Debug, "dns", format!("{} is blacklisted", req.name)).await;
            return;
        }
        if !self.scope.is_domain_in_scope(&req.name) {
            log::debug!("dns: {} is out of scope", req.name);
            self.bus.log(LogSeverity::Debug, "dns", format!("{} is out of scope", req.name)).await;
            return;
        }

        if let Err(e) = self.pool.classify_wildcard(&req.domain, "x").await {
            log::warn!("dns: wildcard classification failed for {}: {e}", req.domain);
            self.bus
                .log(LogSeverity::Warn, "dns", format!("wildcard classification failed for {}: {e}", req.domain))
                .await;
        }

        let mut records = Vec::new();

        let cname = self.query(&req.name, RecordType::Cname).await;
        if !cname.is_empty() {
            records.extend(cname);
        } else {
            let txt = self.query(&req.name, RecordType::Txt).await;
            records.extend(txt);

            let a = self.query(&req.name, RecordType::A).await;
            let aaaa = self.query(&req.name, RecordType::Aaaa).await;
            let filtered: Vec<DnsAnswer> = a
                .into_iter()
                .chain(aaaa)
                .filter(|ans| self.address_passes(ans))
                .collect();
            records.extend(filtered);
        }

        if self.pool.matches_wildcard(&req.domain, &records, req.tag) {
            log::debug!("dns: {} suppressed by wildcard match", req.name);
            self.bus.log(LogSeverity::Debug, "dns", format!("{} suppressed by wildcard match", req.name)).await;
            return;
        }

        let has_address = records.iter().any(|r| matches!(r.rtype, RecordType::A | RecordType::Aaaa | RecordType::Cname));
        if !has_address {
            if self.config.include_unresolvable {
                self.bus.publish(Priority::Low, Event::Output(req)).await;
            }
            return;
        }

        let mut resolved = req;
        resolved.records = records;
        self.bus.publish(Priority::High, Event::NameResolved(resolved)).await;
    }

    fn address_passes(&self, answer: &DnsAnswer) -> bool {
        let Ok(addr) = answer.data.parse::<IpAddr>() else { return false };
        if is_bad_subnet(addr, &self.config.bad_subnets) {
            return false;
        }
        self.scope.is_address_in_scope(addr)
    }

    async fn query(&self, name: &str, rtype: RecordType) -> Vec<DnsAnswer> {
        self.pool.resolve(name, rtype, Priority::Low).await.unwrap_or_default()
    }

    /// Subdomain-tier processing: NS/MX/SOA/SPF, SRV probes, and conditional
    /// zone transfer under `Config.Active`.
    async fn handle_new_subdomain(&self, name: &str) {
        for rtype in [RecordType::Ns, RecordType::Mx, RecordType::Soa, RecordType::Spf] {
            let answers = self.query(name, rtype).await;
            if !answers.is_empty() {
                let domain = self.scope.which_domain(name).unwrap_or(name).to_string();
                let mut req = DnsRequest::new(name, domain, Tag::Dns, "dns-service");
                req.records = answers;
                self.bus.publish(Priority::Low, Event::NameResolved(req)).await;
            }
        }

        for label in common_srv_labels() {
            let srv_name = format!("{label}.{name}");
            let answers = self.query(&srv_name, RecordType::Srv).await;
            if !answers.is_empty() {
                let domain = self.scope.which_domain(name).unwrap_or(name).to_string();
                let mut req = DnsRequest::new(&srv_name, domain, Tag::Dns, "dns-service");
                req.records = answers;
                self.bus.publish(Priority::Low, Event::NameResolved(req)).await;
            }
        }

        if !self.config.active {
            return;
        }
        let ns_answers = self.query(name, RecordType::Ns).await;
        for ns in ns_answers {
            let Ok(resolved_ns) = self.pool.resolve(&ns.data, RecordType::A, Priority::Low).await else { continue };
            for ns_addr in resolved_ns {
                let Ok(addr) = ns_addr.data.parse::<IpAddr>() else { continue };
                match self.pool.zone_transfer(name, name, addr).await {
                    Ok(transferred) if !transferred.is_empty() => {
                        let domain = self.scope.which_domain(name).unwrap_or(name).to_string();
                        let mut req = DnsRequest::new(name, domain, Tag::Dns, "zone-transfer");
                        req.records = transferred;
                        self.bus.publish(Priority::Low, Event::NameResolved(req)).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("dns: zone transfer for {name} via {addr} failed: {e}");
                        self.bus
                            .log(LogSeverity::Debug, "dns", format!("zone transfer for {name} via {addr} failed: {e}"))
                            .await;
                    }
                }
            }
        }
    }
}
