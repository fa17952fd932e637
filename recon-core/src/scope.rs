//! Per-domain scope and blacklist predicates.

use regex::Regex;

use crate::error::{CoreError, Result};
use crate::model::canonicalize_name;

/// One configured apex domain plus its precompiled suffix-match regex.
struct ApexDomain {
    domain: String,
    regex: Regex,
}

/// Scope configuration: the apex domains an enumeration is confined to, an
/// optional CIDR address filter, and a blacklist of name prefixes to always
/// reject.
pub struct ScopeConfig {
    apexes: Vec<ApexDomain>,
    address_filter: Vec<ipnet::IpNet>,
    blacklist: Vec<String>,
}

impl ScopeConfig {
    /// Builds the scope from a list of apex domains. Each gets a precompiled
    /// regex matching `{(\w(-?\w)*\.)*DOMAIN}`.
    pub fn new(domains: Vec<String>) -> Result<Self> {
        let mut apexes = Vec::with_capacity(domains.len());
        for domain in domains {
            let domain = canonicalize_name(&domain);
            let pattern = format!(r"^(?:[A-Za-z0-9](?:-?[A-Za-z0-9])*\.)*{}$", regex::escape(&domain));
            let regex = Regex::new(&pattern)?;
            apexes.push(ApexDomain { domain, regex });
        }
        if apexes.is_empty() {
            return Err(CoreError::config("domains", "at least one apex domain is required"));
        }
        Ok(Self {
            apexes,
            address_filter: Vec::new(),
            blacklist: Vec::new(),
        })
    }

    pub fn with_address_filter(mut self, cidrs: Vec<ipnet::IpNet>) -> Self {
        self.address_filter = cidrs;
        self
    }

    pub fn with_blacklist(mut self, prefixes: Vec<String>) -> Self {
        self.blacklist = prefixes.into_iter().map(|p| canonicalize_name(&p)).collect();
        self
    }

    /// `IsDomainInScope(name)` — name matches any configured apex.
    pub fn is_domain_in_scope(&self, name: &str) -> bool {
        let name = canonicalize_name(name);
        self.apexes.iter().any(|a| a.regex.is_match(&name))
    }

    /// `WhichDomain(name)` — longest configured apex that suffix-matches.
    pub fn which_domain(&self, name: &str) -> Option<&str> {
        let name = canonicalize_name(name);
        self.apexes
            .iter()
            .filter(|a| a.regex.is_match(&name))
            .max_by_key(|a| a.domain.len())
            .map(|a| a.domain.as_str())
    }

    /// `IsAddressInScope(addr)` — address is in any configured CIDR filter.
    /// An empty filter list means "no filter", i.e. every address is in
    /// scope.
    pub fn is_address_in_scope(&self, addr: std::net::IpAddr) -> bool {
        self.address_filter.is_empty() || self.address_filter.iter().any(|net| net.contains(&addr))
    }

    /// `Blacklisted(name)` — matches a configured deny-list prefix.
    pub fn blacklisted(&self, name: &str) -> bool {
        let name = canonicalize_name(name);
        self.blacklist.iter().any(|p| name.starts_with(p.as_str()))
    }

    pub fn apex_domains(&self) -> impl Iterator<Item = &str> {
        self.apexes.iter().map(|a| a.domain.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ScopeConfig {
        ScopeConfig::new(vec!["example.com".to_string()]).unwrap()
    }

    #[test]
    fn matches_apex_and_subdomains() {
        let s = scope();
        assert!(s.is_domain_in_scope("example.com"));
        assert!(s.is_domain_in_scope("www.example.com"));
        assert!(s.is_domain_in_scope("a-b.c.example.com"));
        assert!(!s.is_domain_in_scope("example.com.evil.net"));
        assert!(!s.is_domain_in_scope("notexample.com"));
    }

    #[test]
    fn which_domain_picks_longest_apex() {
        let s = ScopeConfig::new(vec!["example.com".to_string(), "sub.example.com".to_string()]).unwrap();
        assert_eq!(s.which_domain("www.sub.example.com"), Some("sub.example.com"));
        assert_eq!(s.which_domain("www.example.com"), Some("example.com"));
    }

    #[test]
    fn address_filter_empty_means_unrestricted() {
        let s = scope();
        assert!(s.is_address_in_scope("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn address_filter_restricts_when_present() {
        let s = scope().with_address_filter(vec!["10.0.0.0/8".parse().unwrap()]);
        assert!(s.is_address_in_scope("10.1.2.3".parse().unwrap()));
        assert!(!s.is_address_in_scope("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn blacklist_matches_prefix() {
        let s = scope().with_blacklist(vec!["internal.".to_string()]);
        assert!(s.blacklisted("internal.example.com"));
        assert!(!s.blacklisted("www.example.com"));
    }
}
