//! Service harness: the lifecycle and per-service request queues shared by
//! every long-lived component (DNS service, data manager, brute-force,
//! alteration, and each source plugin).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::bus::{Event, EventBus, LogSeverity, Priority};
use crate::error::{CoreError, Result};
use crate::model::{AddrRequest, AsnRequest, DnsRequest, WhoisRequest};

const QUEUE_DEPTH: usize = 512;

/// The four request queues every service owns. A service only drains the
/// queues relevant to the requests it actually handles.
pub struct RequestQueues {
    pub dns_tx: mpsc::Sender<DnsRequest>,
    pub dns_rx: Mutex<mpsc::Receiver<DnsRequest>>,
    pub addr_tx: mpsc::Sender<AddrRequest>,
    pub addr_rx: Mutex<mpsc::Receiver<AddrRequest>>,
    pub asn_tx: mpsc::Sender<AsnRequest>,
    pub asn_rx: Mutex<mpsc::Receiver<AsnRequest>>,
    pub whois_tx: mpsc::Sender<WhoisRequest>,
    pub whois_rx: Mutex<mpsc::Receiver<WhoisRequest>>,
}

impl Default for RequestQueues {
    fn default() -> Self {
        let (dns_tx, dns_rx) = mpsc::channel(QUEUE_DEPTH);
        let (addr_tx, addr_rx) = mpsc::channel(QUEUE_DEPTH);
        let (asn_tx, asn_rx) = mpsc::channel(QUEUE_DEPTH);
        let (whois_tx, whois_rx) = mpsc::channel(QUEUE_DEPTH);
        Self {
            dns_tx,
            dns_rx: Mutex::new(dns_rx),
            addr_tx,
            addr_rx: Mutex::new(addr_rx),
            asn_tx,
            asn_rx: Mutex::new(asn_rx),
            whois_tx,
            whois_rx: Mutex::new(whois_rx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Shared lifecycle state and rate-limit bookkeeping for one service.
///
/// A concrete service embeds a `ServiceHarness` and calls
/// [`ServiceHarness::check_rate_limit`] before doing per-item work, and
/// publishes `SetActive` through [`ServiceHarness::start`]/[`stop`] on its
/// own behalf.
pub struct ServiceHarness {
    name: String,
    bus: EventBus,
    state: Arc<std::sync::Mutex<RunState>>,
    active: Arc<AtomicBool>,
    min_interval: Duration,
    last_call: Arc<std::sync::Mutex<Instant>>,
    pub queues: Arc<RequestQueues>,
    tasks: std::sync::Mutex<JoinSet<()>>,
}

impl ServiceHarness {
    pub fn new(name: impl Into<String>, bus: EventBus, min_interval: Duration) -> Self {
        Self {
            name: name.into(),
            bus,
            state: Arc::new(std::sync::Mutex::new(RunState::Stopped)),
            active: Arc::new(AtomicBool::new(false)),
            min_interval,
            last_call: Arc::new(std::sync::Mutex::new(Instant::now() - min_interval)),
            queues: Arc::new(RequestQueues::default()),
            tasks: std::sync::Mutex::new(JoinSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transitions the service to `Running` and publishes `SetActive(true)`.
    /// Installing bus subscriptions is the caller's responsibility,
    /// immediately after calling this.
    pub async fn start(&self) {
        *self.state.lock().unwrap() = RunState::Running;
        self.active.store(true, Ordering::SeqCst);
        self.bus
            .publish(Priority::Low, Event::SetActive { service: self.name.clone(), active: true })
            .await;
        log::info!("service {} started", self.name);
        self.bus.log(LogSeverity::Info, self.name.clone(), format!("service {} started", self.name)).await;
    }

    pub async fn pause(&self) {
        *self.state.lock().unwrap() = RunState::Paused;
        self.bus
            .publish(Priority::Low, Event::SetActive { service: self.name.clone(), active: false })
            .await;
        log::info!("service {} paused", self.name);
        self.bus.log(LogSeverity::Info, self.name.clone(), format!("service {} paused", self.name)).await;
    }

    pub async fn resume(&self) {
        *self.state.lock().unwrap() = RunState::Running;
        self.bus
            .publish(Priority::Low, Event::SetActive { service: self.name.clone(), active: true })
            .await;
        log::info!("service {} resumed", self.name);
        self.bus.log(LogSeverity::Info, self.name.clone(), format!("service {} resumed", self.name)).await;
    }

    /// Idempotent. Drains the request queues and aborts any outstanding
    /// per-event handler tasks (see [`Self::spawn_tracked`]) within a grace
    /// period, then publishes `SetActive(false)`.
    pub async fn stop(&self, grace: Duration) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == RunState::Stopped {
                return;
            }
            *state = RunState::Stopped;
        }
        self.active.store(false, Ordering::SeqCst);
        let _ = tokio::time::timeout(grace, self.drain()).await;
        self.drain_tasks(grace).await;
        self.bus
            .publish(Priority::Low, Event::SetActive { service: self.name.clone(), active: false })
            .await;
        log::info!("service {} stopped", self.name);
        self.bus.log(LogSeverity::Info, self.name.clone(), format!("service {} stopped", self.name)).await;
    }

    async fn drain(&self) {
        let mut dns_rx = self.queues.dns_rx.lock().await;
        while dns_rx.try_recv().is_ok() {}
        let mut addr_rx = self.queues.addr_rx.lock().await;
        while addr_rx.try_recv().is_ok() {}
        let mut asn_rx = self.queues.asn_rx.lock().await;
        while asn_rx.try_recv().is_ok() {}
        let mut whois_rx = self.queues.whois_rx.lock().await;
        while whois_rx.try_recv().is_ok() {}
    }

    /// Spawns `fut` as a tracked per-event handler task. Tasks spawned this
    /// way are awaited (bounded by `grace`) and then aborted if still
    /// outstanding when [`Self::stop`] runs, so no handler outlives `Stop`.
    pub fn spawn_tracked<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().unwrap().spawn(fut);
    }

    async fn drain_tasks(&self, grace: Duration) {
        let mut set = {
            let mut tasks = self.tasks.lock().unwrap();
            std::mem::replace(&mut *tasks, JoinSet::new())
        };
        let _ = tokio::time::timeout(grace, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        set.abort_all();
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == RunState::Running
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// `CheckRateLimit()` — a suspension point enforcing an inter-call
    /// minimum delay. No-op when the service was constructed with a zero
    /// interval.
    pub async fn check_rate_limit(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Ok(());
        }
        loop {
            if !self.is_running() {
                return Err(CoreError::cancelled());
            }
            let wait = {
                let mut last = self.last_call.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(*last);
                if elapsed >= self.min_interval {
                    *last = now;
                    None
                } else {
                    Some(self.min_interval - elapsed)
                }
            };
            match wait {
                None => return Ok(()),
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn start_then_stop_is_idempotent() {
        let harness = ServiceHarness::new("test-svc", EventBus::new(), Duration::ZERO);
        harness.start().await;
        assert!(harness.is_running());
        harness.stop(Duration::from_millis(50)).await;
        assert!(!harness.is_running());
        // second stop is a no-op, not an error
        harness.stop(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn rate_limit_enforces_minimum_interval() {
        let harness = ServiceHarness::new("test-svc", EventBus::new(), Duration::from_millis(30));
        harness.start().await;
        let start = Instant::now();
        harness.check_rate_limit().await.unwrap();
        harness.check_rate_limit().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
