//! Brute-force service: wordlist × subdomain expansion, gated by how many
//! times a subdomain has been observed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::bus::{Event, EventBus, LogSeverity, Priority, Topic};
use crate::harness::ServiceHarness;
use crate::model::{canonicalize_name, DnsRequest, Tag};
use crate::scope::ScopeConfig;

pub struct BruteForceService {
    harness: ServiceHarness,
    bus: EventBus,
    scope: Arc<ScopeConfig>,
    wordlist: Vec<String>,
    min_for_recursive: u32,
    recursive: bool,
    observed: Mutex<HashMap<String, u32>>,
}

impl BruteForceService {
    /// `recursive` is the master switch: when `false`, only apex domains
    /// (`req.name == req.domain`) are ever expanded against the wordlist,
    /// regardless of `min_for_recursive`. When `true`, any in-scope name
    /// that clears the `min_for_recursive` observation threshold expands.
    pub fn new(bus: EventBus, scope: Arc<ScopeConfig>, wordlist: Vec<String>, min_for_recursive: u32, recursive: bool) -> Self {
        Self {
            harness: ServiceHarness::new("brute", bus.clone(), Duration::ZERO),
            bus,
            scope,
            wordlist,
            min_for_recursive,
            recursive,
            observed: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.harness.start().await;
            let (mut resolved_rx, _sub) = self.bus.subscribe(Topic::NameResolved);
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
                            let svc = Arc::clone(&self);
                            self.harness.spawn_tracked(async move { svc.handle_resolved(req).await });
                        }
                    }
                }
            }
            self.harness.stop(Duration::from_secs(2)).await;
        })
    }

    /// On a resolved, in-scope name with at least one address record,
    /// expand `word.name` for every wordlist entry once the name has been
    /// observed `min_for_recursive` distinct times (`0` ⇒ first observation).
    /// Non-apex names only expand when `recursive` is set; the apex itself
    /// always gets its first wordlist pass.
    async fn handle_resolved(&self, req: DnsRequest) {
        use crate::model::RecordType;
        let has_address = req.records.iter().any(|r| matches!(r.rtype, RecordType::A | RecordType::Aaaa));
        if !has_address || !self.scope.is_domain_in_scope(&req.name) {
            return;
        }
        let name = canonicalize_name(&req.name);
        let is_apex = name == canonicalize_name(&req.domain);

        let times = {
            let mut observed = self.observed.lock().await;
            let counter = observed.entry(name.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        self.bus.publish(Priority::Low, Event::NewSubdomain { name: name.clone(), times }).await;

        if !is_apex && !self.recursive {
            self.bus
                .log(LogSeverity::Debug, "brute", format!("skipping non-apex expansion of {name}: recursive disabled"))
                .await;
            return;
        }
        let should_expand = self.min_for_recursive == 0 || times >= self.min_for_recursive;
        if !should_expand {
            return;
        }

        for word in &self.wordlist {
            let candidate = format!("{}.{}", word.to_ascii_lowercase(), name);
            if !self.scope.is_domain_in_scope(&candidate) {
                continue;
            }
            let domain = self.scope.which_domain(&candidate).unwrap_or(&name).to_string();
            let candidate_req = DnsRequest::new(&candidate, domain, Tag::Brute, "brute-force");
            self.bus.publish(Priority::Low, Event::NewName(candidate_req)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expands_wordlist_against_each_seed_exactly_once() {
        let bus = EventBus::new();
        let scope = Arc::new(ScopeConfig::new(vec!["a.test".into(), "b.test".into()]).unwrap());
        let service = Arc::new(BruteForceService::new(bus.clone(), scope, vec!["foo".into(), "bar".into()], 0, true));
        let (mut new_name_rx, _sub) = bus.subscribe(Topic::NewName);

        let (_tx, rx) = watch::channel(false);
        let handle = service.clone().spawn(rx);
        // give the spawned subscriber loop a moment to register
        tokio::time::sleep(Duration::from_millis(20)).await;

        for seed in ["a.test", "b.test"] {
            let mut req = DnsRequest::new(seed, seed, Tag::Dns, "seed");
            req.records.push(crate::model::DnsAnswer::new(seed, crate::model::RecordType::A, 300, "1.2.3.4"));
            bus.publish(Priority::High, Event::NameResolved(req)).await;
        }

        let mut names = Vec::new();
        for _ in 0..4 {
            let delivery = tokio::time::timeout(Duration::from_secs(1), new_name_rx.recv()).await.expect("delivery").expect("event");
            if let Event::NewName(req) = delivery.event {
                names.push(req.name);
            }
        }
        names.sort();
        assert_eq!(names, vec!["bar.a.test", "bar.b.test", "foo.a.test", "foo.b.test"]);
        handle.abort();
    }

    /// With `recursive` off, a resolved subdomain (not the apex itself)
    /// must not trigger a wordlist pass, even though the apex always does.
    #[tokio::test]
    async fn non_apex_names_are_not_expanded_unless_recursive() {
        let bus = EventBus::new();
        let scope = Arc::new(ScopeConfig::new(vec!["a.test".into()]).unwrap());
        let service = Arc::new(BruteForceService::new(bus.clone(), scope, vec!["foo".into()], 0, false));
        let (mut new_name_rx, _sub) = bus.subscribe(Topic::NewName);

        let (_tx, rx) = watch::channel(false);
        let handle = service.clone().spawn(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut apex_req = DnsRequest::new("a.test", "a.test", Tag::Dns, "seed");
        apex_req.records.push(crate::model::DnsAnswer::new("a.test", crate::model::RecordType::A, 300, "1.2.3.4"));
        bus.publish(Priority::High, Event::NameResolved(apex_req)).await;

        let delivery = tokio::time::timeout(Duration::from_secs(1), new_name_rx.recv()).await.expect("delivery").expect("event");
        match delivery.event {
            Event::NewName(req) => assert_eq!(req.name, "foo.a.test"),
            other => panic!("unexpected event: {other:?}"),
        }

        let mut sub_req = DnsRequest::new("www.a.test", "a.test", Tag::Dns, "dns-service");
        sub_req.records.push(crate::model::DnsAnswer::new("www.a.test", crate::model::RecordType::A, 300, "1.2.3.5"));
        bus.publish(Priority::High, Event::NameResolved(sub_req)).await;

        assert!(
            tokio::time::timeout(Duration::from_millis(200), new_name_rx.recv()).await.is_err(),
            "non-apex name must not expand against the wordlist when recursive is disabled"
        );

        handle.abort();
    }
}
