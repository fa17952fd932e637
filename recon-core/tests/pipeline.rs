//! Cross-module properties that exercise the bus + data manager + graph
//! wiring directly, without going through the resolver pool so these tests
//! never touch the network.

use std::sync::Arc;
use std::time::Duration;

use recon_core::bus::{Event, EventBus, Priority, Topic};
use recon_core::graph::mem::MemGraph;
use recon_core::graph::GraphStore;
use recon_core::model::{DnsAnswer, DnsRequest, RecordType, Tag};
use recon_core::scope::ScopeConfig;
use recon_core::services::data_manager::DataManager;
use tokio::sync::watch;
use uuid::Uuid;

fn resolved(name: &str, domain: &str, records: Vec<DnsAnswer>) -> DnsRequest {
    let mut req = DnsRequest::new(name, domain, Tag::Dns, "test");
    req.records = records;
    req
}

/// Given A→B (CNAME), B→C (CNAME), C→1.2.3.4 (A), the graph ends up with
/// the three edges and `GetOutput` returns one row for A with that address
/// — driven purely by the data manager's re-queue semantics, not by
/// chasing CNAMEs within one call.
#[tokio::test]
async fn cname_chain_resolves_through_requeue() {
    let bus = EventBus::new();
    let graph: Arc<dyn GraphStore> = Arc::new(MemGraph::new());
    let scope = Arc::new(ScopeConfig::new(vec!["example.com".to_string()]).unwrap());
    let uuid = Uuid::new_v4();

    let manager = Arc::new(DataManager::new(bus.clone(), Arc::clone(&graph), scope, uuid));
    let (_tx, stop_rx) = watch::channel(false);
    let handle = manager.spawn(stop_rx);

    let (mut new_name_rx, _sub) = bus.subscribe(Topic::NewName);

    bus.publish(
        Priority::High,
        Event::NameResolved(resolved(
            "a.example.com",
            "example.com",
            vec![DnsAnswer::new("a.example.com", RecordType::Cname, 300, "b.example.com")],
        )),
    )
    .await;

    let requeued = tokio::time::timeout(Duration::from_secs(1), new_name_rx.recv())
        .await
        .expect("a requeue for the CNAME target")
        .expect("event");
    let Event::NewName(req) = requeued.event else { panic!("expected NewName") };
    assert_eq!(req.name, "b.example.com");

    bus.publish(
        Priority::High,
        Event::NameResolved(resolved(
            "b.example.com",
            "example.com",
            vec![DnsAnswer::new("b.example.com", RecordType::Cname, 300, "c.example.com")],
        )),
    )
    .await;
    let _ = tokio::time::timeout(Duration::from_secs(1), new_name_rx.recv()).await;

    bus.publish(
        Priority::High,
        Event::NameResolved(resolved(
            "c.example.com",
            "example.com",
            vec![DnsAnswer::new("c.example.com", RecordType::A, 300, "1.2.3.4")],
        )),
    )
    .await;

    // give the final insert a moment to land
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(graph.is_cname_node(uuid, "a.example.com").await.unwrap());
    assert!(graph.is_cname_node(uuid, "b.example.com").await.unwrap());

    let outputs = graph.get_output(uuid, false).await.unwrap();
    let a_row = outputs.iter().find(|r| r.name == "a.example.com").expect("output row for a.example.com");
    assert_eq!(a_row.addresses, vec!["1.2.3.4".parse::<std::net::IpAddr>().unwrap()]);

    let c_row = outputs.iter().find(|r| r.name == "c.example.com").expect("output row for c.example.com");
    assert_eq!(c_row.addresses, vec!["1.2.3.4".parse::<std::net::IpAddr>().unwrap()]);

    handle.abort();
}

/// Inserting the same triple twice through the data manager leaves the
/// graph's edge count unchanged.
#[tokio::test]
async fn duplicate_resolved_record_does_not_grow_the_graph() {
    let bus = EventBus::new();
    let graph: Arc<dyn GraphStore> = Arc::new(MemGraph::new());
    let scope = Arc::new(ScopeConfig::new(vec!["example.com".to_string()]).unwrap());
    let uuid = Uuid::new_v4();

    let manager = Arc::new(DataManager::new(bus.clone(), Arc::clone(&graph), scope, uuid));
    let (_tx, stop_rx) = watch::channel(false);
    let handle = manager.spawn(stop_rx);

    let req = resolved(
        "www.example.com",
        "example.com",
        vec![DnsAnswer::new("www.example.com", RecordType::A, 300, "1.2.3.4")],
    );
    bus.publish(Priority::High, Event::NameResolved(req.clone())).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    let first = graph.get_output(uuid, false).await.unwrap();

    bus.publish(Priority::High, Event::NameResolved(req)).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    let second = graph.get_output(uuid, false).await.unwrap();

    assert_eq!(first.len(), second.len());
    handle.abort();
}

/// After a service's harness is stopped, no new events reach a downstream
/// subscriber within the grace period.
#[tokio::test]
async fn stopped_data_manager_publishes_nothing_further() {
    let bus = EventBus::new();
    let graph: Arc<dyn GraphStore> = Arc::new(MemGraph::new());
    let scope = Arc::new(ScopeConfig::new(vec!["example.com".to_string()]).unwrap());
    let uuid = Uuid::new_v4();

    let manager = Arc::new(DataManager::new(bus.clone(), Arc::clone(&graph), scope, uuid));
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = manager.spawn(stop_rx);

    let (mut new_name_rx, _sub) = bus.subscribe(Topic::NewName);

    stop_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    bus.publish(
        Priority::High,
        Event::NameResolved(resolved(
            "ptr.example.com",
            "example.com",
            vec![DnsAnswer::new("ptr.example.com", RecordType::Cname, 300, "other.example.com")],
        )),
    )
    .await;

    let nothing = tokio::time::timeout(Duration::from_millis(300), new_name_rx.recv()).await;
    assert!(nothing.is_err(), "no NewName should be published after stop");
}
