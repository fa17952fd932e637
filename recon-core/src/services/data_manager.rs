//! Data manager: persists resolved records to the graph and emits
//! follow-up discovery events.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{watch, Semaphore};

use crate::bus::{Event, EventBus, LogSeverity, Priority, Topic};
use crate::graph::GraphStore;
use crate::harness::ServiceHarness;
use crate::model::{AddrRequest, AsnRequest, DnsRequest, RecordType, Tag};
use crate::scope::ScopeConfig;

const MAX_CONCURRENT_INSERTS: usize = 25;

static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").unwrap());
static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\b").unwrap()
});

pub struct DataManager {
    harness: ServiceHarness,
    bus: EventBus,
    graph: Arc<dyn GraphStore>,
    scope: Arc<ScopeConfig>,
    insert_semaphore: Semaphore,
    uuid: uuid::Uuid,
}

impl DataManager {
    pub fn new(bus: EventBus, graph: Arc<dyn GraphStore>, scope: Arc<ScopeConfig>, uuid: uuid::Uuid) -> Self {
        Self {
            harness: ServiceHarness::new("data-manager", bus.clone(), Duration::ZERO),
            bus,
            graph,
            scope,
            insert_semaphore: Semaphore::new(MAX_CONCURRENT_INSERTS),
            uuid,
        }
    }

    pub fn spawn(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.harness.start().await;
            let (mut resolved_rx, _sub) = self.bus.subscribe(Topic::NameResolved);
            let (mut asn_rx, _sub2) = self.bus.subscribe(Topic::NewAsn);

            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            break;
                        }
                    }
                    delivery = resolved_rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        if let Event::NameResolved(req) = delivery.event {
                            let mgr = Arc::clone(&self);
                            self.harness.spawn_tracked(async move { mgr.handle_resolved(req).await });
                        }
                    }
                    delivery = asn_rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        if let Event::NewAsn(req) = delivery.event {
                            let mgr = Arc::clone(&self);
                            self.harness.spawn_tracked(async move { mgr.handle_asn(req).await });
                        }
                    }
                }
            }
            self.harness.stop(Duration::from_secs(2)).await;
        })
    }

    /// CNAME chain resolution is driven by re-queuing the CNAME target as a
    /// fresh `NewName`, not by chasing it within this call.
    async fn handle_resolved(&self, req: DnsRequest) {
        let Ok(_permit) = self.insert_semaphore.acquire().await else { return };

        if let Err(e) = self.graph.insert_root_of(self.uuid, &req.domain, &req.name, tag_str(req.tag), &req.source).await {
            log::warn!("data-manager: insert_root_of failed: {e}");
            self.bus.log(LogSeverity::Warn, "data-manager", format!("insert_root_of failed: {e}")).await;
        }

        let cname = req.records.iter().find(|r| r.rtype == RecordType::Cname);
        if let Some(cname) = cname {
            if let Err(e) = self.graph.insert_cname(self.uuid, &req.name, &cname.data, tag_str(req.tag), &req.source).await {
                log::warn!("data-manager: insert_cname failed: {e}");
                self.bus.log(LogSeverity::Warn, "data-manager", format!("insert_cname failed: {e}")).await;
            }
            if self.scope.is_domain_in_scope(&cname.data) {
                let target = DnsRequest::new(&cname.data, req.domain.clone(), Tag::Dns, "data-manager");
                self.bus.publish(Priority::High, Event::NewName(target)).await;
            }
            return;
        }

        for record in &req.records {
            match record.rtype {
                RecordType::A | RecordType::Aaaa => self.handle_address_record(&req, record).await,
                RecordType::Ptr => self.handle_ptr_record(&req, record).await,
                RecordType::Srv => self.handle_srv_record(&req, record).await,
                RecordType::Ns => self.handle_ns_or_mx(&req, record, true).await,
                RecordType::Mx => self.handle_ns_or_mx(&req, record, false).await,
                RecordType::Txt | RecordType::Spf | RecordType::Soa => self.handle_text_record(&req, record).await,
                RecordType::Cname => unreachable!("handled above"),
            }
        }
    }

    async fn handle_address_record(&self, req: &DnsRequest, record: &crate::model::DnsAnswer) {
        let Ok(addr) = record.data.parse::<IpAddr>() else { return };
        let result = if record.rtype == crate::model::RecordType::A {
            self.graph.insert_a(self.uuid, &req.name, addr, tag_str(req.tag), &req.source).await
        } else {
            self.graph.insert_aaaa(self.uuid, &req.name, addr, tag_str(req.tag), &req.source).await
        };
        if let Err(e) = result {
            log::warn!("data-manager: insert address failed: {e}");
            self.bus.log(LogSeverity::Warn, "data-manager", format!("insert address failed: {e}")).await;
        }
        self.bus.publish(Priority::Low, Event::NewAddr(AddrRequest {
            domain: Some(req.domain.clone()),
            ..AddrRequest::new(addr)
        })).await;
    }

    async fn handle_ptr_record(&self, req: &DnsRequest, record: &crate::model::DnsAnswer) {
        if !self.scope.is_domain_in_scope(&record.data) {
            return;
        }
        if let Err(e) = self.graph.insert_ptr(self.uuid, &req.name, &record.data, tag_str(req.tag), &req.source).await {
            log::warn!("data-manager: insert_ptr failed: {e}");
            self.bus.log(LogSeverity::Warn, "data-manager", format!("insert_ptr failed: {e}")).await;
        }
        let target = DnsRequest::new(&record.data, req.domain.clone(), Tag::Dns, "data-manager");
        self.bus.publish(Priority::Low, Event::NewName(target)).await;
    }

    async fn handle_srv_record(&self, req: &DnsRequest, record: &crate::model::DnsAnswer) {
        if let Err(e) = self.graph.insert_srv(self.uuid, &req.name, &record.data, tag_str(req.tag), &req.source).await {
            log::warn!("data-manager: insert_srv failed: {e}");
            self.bus.log(LogSeverity::Warn, "data-manager", format!("insert_srv failed: {e}")).await;
        }
        if self.scope.is_domain_in_scope(&record.data) {
            let target = DnsRequest::new(&record.data, req.domain.clone(), Tag::Dns, "data-manager");
            self.bus.publish(Priority::Low, Event::NewName(target)).await;
        }
    }

    async fn handle_ns_or_mx(&self, req: &DnsRequest, record: &crate::model::DnsAnswer, is_ns: bool) {
        let result = if is_ns {
            self.graph.insert_ns(self.uuid, &req.name, &record.data, tag_str(req.tag), &req.source).await
        } else {
            self.graph.insert_mx(self.uuid, &req.name, &record.data, tag_str(req.tag), &req.source).await
        };
        if let Err(e) = result {
            log::warn!("data-manager: insert ns/mx failed: {e}");
            self.bus.log(LogSeverity::Warn, "data-manager", format!("insert ns/mx failed: {e}")).await;
        }
        let target = DnsRequest::new(&record.data, req.domain.clone(), Tag::Dns, "data-manager");
        self.bus.publish(Priority::Low, Event::NewName(target)).await;
    }

    async fn handle_text_record(&self, req: &DnsRequest, record: &crate::model::DnsAnswer) {
        for m in IPV4_RE.find_iter(&record.data) {
            if let Ok(addr) = m.as_str().parse::<IpAddr>() {
                self.bus.publish(Priority::Low, Event::NewAddr(AddrRequest {
                    domain: Some(req.domain.clone()),
                    ..AddrRequest::new(addr)
                })).await;
            }
        }
        for m in HOSTNAME_RE.find_iter(&record.data) {
            let candidate = m.as_str();
            if self.scope.is_domain_in_scope(candidate) {
                let target = DnsRequest::new(candidate, req.domain.clone(), Tag::Dns, "data-manager");
                self.bus.publish(Priority::Low, Event::NewName(target)).await;
            }
        }
    }

    async fn handle_asn(&self, req: AsnRequest) {
        let (Some(asn), Some(prefix)) = (req.asn, req.prefix) else { return };
        let desc = req.description.clone().unwrap_or_default();
        if let Err(e) = self
            .graph
            .insert_infrastructure(self.uuid, asn, &desc, req.address, prefix, &req.source, "api")
            .await
        {
            log::warn!("data-manager: insert_infrastructure failed: {e}");
            self.bus.log(LogSeverity::Warn, "data-manager", format!("insert_infrastructure failed: {e}")).await;
        }
    }
}

fn tag_str(tag: Tag) -> &'static str {
    match tag {
        Tag::Dns => "dns",
        Tag::Brute => "brute",
        Tag::Alt => "alt",
        Tag::Scrape => "scrape",
        Tag::Cert => "cert",
        Tag::Api => "api",
        Tag::Archive => "archive",
    }
}
