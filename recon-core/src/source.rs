//! The data-source plugin contract.
//!
//! Individual scrapers (search engines, web archives, certificate
//! transparency logs, passive-DNS APIs) are out of scope for `recon-core`
//! — only the trait they implement, and the credential/filter plumbing the
//! service harness checks before handing one its queue, live here.

use async_trait::async_trait;

use crate::bus::EventBus;
use crate::error::Result;
use crate::model::{AddrRequest, AsnRequest, DnsRequest, WhoisRequest};

/// Which category of data source a plugin belongs to, mirrored onto every
/// `DnsRequest.tag` it publishes for wildcard-trust purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Api,
    Scrape,
    Cert,
    Archive,
}

/// Credentials handed to a plugin at `on_start`: `Username`, `Password`,
/// `Key`, `Secret`. Any field a given source doesn't need is left `None`.
#[derive(Debug, Clone, Default)]
pub struct ApiKey {
    pub username: Option<String>,
    pub password: Option<String>,
    pub key: Option<String>,
    pub secret: Option<String>,
}

/// Per-plugin configuration: its credentials plus whatever else the harness
/// needs before it will start the plugin.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    pub api_key: ApiKey,
}

/// An allow/deny list of source names the harness consults before handing a
/// plugin its queue at `Start`.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    /// `true` ⇒ `sources` is an allow-list; `false` ⇒ a deny-list.
    pub include: bool,
    pub sources: Vec<String>,
}

impl SourceFilter {
    /// Always passes when the filter carries no names at all (the default).
    pub fn permits(&self, source_name: &str) -> bool {
        if self.sources.is_empty() {
            return true;
        }
        let listed = self.sources.iter().any(|s| s == source_name);
        if self.include {
            listed
        } else {
            !listed
        }
    }
}

/// The trait every external data-source plugin implements. A source may
/// publish only `NewName`/`NewAddr`/`NewAsn`/`NewWhois`/`Log`/`SetActive`
/// onto the [`EventBus`] it's handed — it never subscribes to or
/// republishes core-internal topics like `NameResolved`.
#[async_trait]
pub trait Source: Send + Sync {
    /// Display name, used for `DnsRequest.source` and `SourceFilter`
    /// matching.
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    /// Called once before the harness starts routing requests to this
    /// source. The default does nothing.
    async fn on_start(&self, _bus: &EventBus, _config: &SourceConfig) -> Result<()> {
        Ok(())
    }

    /// Called once as the harness tears the source down. The default does
    /// nothing.
    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }

    /// Handles a name-discovery request for `domain`. Most passive sources
    /// implement only this one.
    async fn on_dns_request(&self, _bus: &EventBus, _request: DnsRequest) -> Result<()> {
        Ok(())
    }

    async fn on_addr_request(&self, _bus: &EventBus, _request: AddrRequest) -> Result<()> {
        Ok(())
    }

    async fn on_asn_request(&self, _bus: &EventBus, _request: AsnRequest) -> Result<()> {
        Ok(())
    }

    async fn on_whois_request(&self, _bus: &EventBus, _request: WhoisRequest) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_permits_everything() {
        let filter = SourceFilter::default();
        assert!(filter.permits("crtsh"));
    }

    #[test]
    fn include_filter_is_an_allow_list() {
        let filter = SourceFilter { include: true, sources: vec!["crtsh".into()] };
        assert!(filter.permits("crtsh"));
        assert!(!filter.permits("shodan"));
    }

    #[test]
    fn exclude_filter_is_a_deny_list() {
        let filter = SourceFilter { include: false, sources: vec!["shodan".into()] };
        assert!(filter.permits("crtsh"));
        assert!(!filter.permits("shodan"));
    }
}
