//! Wires the bus, resolver pool, scope, graph, and every service into one
//! runnable enumeration — the thing `recon-cli` constructs and drives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::{Event, EventBus, LogSeverity, Priority};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::mem::MemGraph;
use crate::graph::GraphStore;
use crate::harness::ServiceHarness;
use crate::model::{DnsRequest, Tag};
use crate::resolver::ResolverPool;
use crate::scope::ScopeConfig;
use crate::services::alteration::AlterationService;
use crate::services::brute::BruteForceService;
use crate::services::data_manager::DataManager;
use crate::services::dns::{DnsService, DnsServiceConfig};

/// One enumeration: the bus, resolver pool, scope, graph store, and the
/// core's own services, all sharing a single cancellation signal.
pub struct System {
    config: EngineConfig,
    bus: EventBus,
    pool: Arc<ResolverPool>,
    scope: Arc<ScopeConfig>,
    graph: Arc<dyn GraphStore>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl System {
    /// Validates `config` (a `ConfigError` here is fatal at bring-up) and
    /// assembles the enumeration's shared resources.
    pub fn new(config: EngineConfig) -> Result<Self> {
        if config.domains.is_empty() {
            return Err(crate::error::CoreError::config("domains", "at least one apex domain is required"));
        }
        if config.resolvers.is_empty() {
            return Err(crate::error::CoreError::config("resolvers", "at least one resolver is required"));
        }
        if config.brute_forcing && config.wordlist.is_empty() {
            return Err(crate::error::CoreError::config("wordlist", "brute forcing requires a non-empty wordlist"));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let bus = EventBus::new();
        let scope = Arc::new(
            ScopeConfig::new(config.domains.clone())?
                .with_address_filter(config.address_filter.clone())
                .with_blacklist(config.blacklist.clone()),
        );
        let pool = Arc::new(ResolverPool::new(config.resolvers.clone(), config.max_dns_queries, stop_rx.clone())?);
        let graph: Arc<dyn GraphStore> = Arc::new(MemGraph::with_bus(bus.clone()));

        Ok(Self { config, bus, pool, scope, graph, stop_tx, stop_rx, handles: Vec::new() })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn graph(&self) -> Arc<dyn GraphStore> {
        Arc::clone(&self.graph)
    }

    pub fn uuid(&self) -> Uuid {
        self.config.uuid
    }

    /// Starts every service, then publishes a `NewName` seed for each
    /// configured apex domain.
    pub async fn run(&mut self) {
        let dns_service = Arc::new(DnsService::new(
            self.bus.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.scope),
            DnsServiceConfig {
                active: self.config.active,
                include_unresolvable: self.config.include_unresolvable,
                bad_subnets: crate::config::default_bad_subnets(),
            },
        ));
        self.handles.push(dns_service.spawn(self.stop_rx.clone()));

        let data_manager = Arc::new(DataManager::new(self.bus.clone(), Arc::clone(&self.graph), Arc::clone(&self.scope), self.config.uuid));
        self.handles.push(data_manager.spawn(self.stop_rx.clone()));

        if self.config.brute_forcing {
            let brute = Arc::new(BruteForceService::new(
                self.bus.clone(),
                Arc::clone(&self.scope),
                self.config.wordlist.clone(),
                self.config.min_for_recursive,
                self.config.recursive,
            ));
            self.handles.push(brute.spawn(self.stop_rx.clone()));
        }

        let alterations = &self.config.alterations;
        let any_alteration = alterations.flip_numbers
            || alterations.add_numbers
            || alterations.flip_words
            || alterations.add_words
            || alterations.edit_distance > 0
            || alterations.markov_min_for_gen > 0;
        if any_alteration {
            let alteration = Arc::new(AlterationService::new(self.bus.clone(), Arc::clone(&self.scope), alterations.clone()));
            self.handles.push(alteration.spawn(self.stop_rx.clone()));
        }

        for domain in &self.config.domains {
            if let Err(e) = self.graph.insert_domain(self.config.uuid, domain, "dns", "seed").await {
                log::warn!("system: failed to seed domain node for {domain}: {e}");
                self.bus.log(LogSeverity::Warn, "system", format!("failed to seed domain node for {domain}: {e}")).await;
            }
            let req = DnsRequest::new(domain, domain, Tag::Dns, "seed");
            self.bus.publish(Priority::High, Event::NewName(req)).await;
        }
    }

    /// Cancels the root context and waits (bounded by `grace`) for every
    /// worker task to exit: each service's own `tokio::select!` loop handle
    /// in `self.handles`, and — because every service's loop calls its own
    /// `ServiceHarness::stop(grace)` before that handle resolves — every
    /// per-event handler task each service spawned via `spawn_tracked` too.
    pub async fn stop(&mut self, grace: Duration) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = tokio::time::timeout(grace, handle).await;
        }
    }
}

/// A stand-alone harness factory used by tests that want a
/// [`ServiceHarness`] without standing up a whole [`System`].
#[cfg(test)]
pub(crate) fn test_harness(name: &str, bus: EventBus) -> ServiceHarness {
    ServiceHarness::new(name, bus, Duration::ZERO)
}
