//! Wire-level and request/response data types shared by every component.
//!
//! These are the payload shapes carried over the [`crate::bus::EventBus`]
//! and passed between services. Record types are a closed Rust enum rather
//! than numeric DNS type codes so that the data manager's `match` over them
//! stays exhaustive.

use std::net::IpAddr;

/// Origin class of a candidate or resolved name.
///
/// Determines whether a name's answers are trusted enough to bypass
/// wildcard suppression (see [`crate::resolver::ResolverPool::matches_wildcard`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Dns,
    Brute,
    Alt,
    Scrape,
    Cert,
    Api,
    Archive,
}

impl Tag {
    /// Sources that receive answers from reputable providers bypass wildcard
    /// suppression; guesses (brute force, alterations) do not.
    pub fn is_trusted(self) -> bool {
        !matches!(self, Tag::Brute | Tag::Alt)
    }
}

/// DNS resource record type, closed over the set this engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Txt,
    Srv,
    Ns,
    Mx,
    Soa,
    Spf,
    Ptr,
}

impl RecordType {
    pub fn as_hickory(self) -> hickory_proto::rr::RecordType {
        use hickory_proto::rr::RecordType as H;
        match self {
            RecordType::A => H::A,
            RecordType::Aaaa => H::AAAA,
            RecordType::Cname => H::CNAME,
            RecordType::Txt => H::TXT,
            RecordType::Srv => H::SRV,
            RecordType::Ns => H::NS,
            RecordType::Mx => H::MX,
            RecordType::Soa => H::SOA,
            RecordType::Spf => H::Unknown(99),
            RecordType::Ptr => H::PTR,
        }
    }

    pub fn from_hickory(rt: hickory_proto::rr::RecordType) -> Option<Self> {
        use hickory_proto::rr::RecordType as H;
        Some(match rt {
            H::A => RecordType::A,
            H::AAAA => RecordType::Aaaa,
            H::CNAME => RecordType::Cname,
            H::TXT => RecordType::Txt,
            H::SRV => RecordType::Srv,
            H::NS => RecordType::Ns,
            H::MX => RecordType::Mx,
            H::SOA => RecordType::Soa,
            H::PTR => RecordType::Ptr,
            H::Unknown(99) => RecordType::Spf,
            _ => return None,
        })
    }
}

/// A candidate or resolved name travelling through the bus.
///
/// Invariant: `name` must be a subdomain of `domain` at the moment it is
/// published onto [`crate::bus::Topic::NewName`] — callers are expected to
/// run it through [`crate::scope::ScopeConfig::is_domain_in_scope`] first.
#[derive(Debug, Clone)]
pub struct DnsRequest {
    pub name: String,
    pub domain: String,
    pub records: Vec<DnsAnswer>,
    pub tag: Tag,
    pub source: String,
}

impl DnsRequest {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, tag: Tag, source: impl Into<String>) -> Self {
        Self {
            name: canonicalize_name(&name.into()),
            domain: canonicalize_name(&domain.into()),
            records: Vec::new(),
            tag,
            source: source.into(),
        }
    }
}

/// A typed DNS answer. Canonicalized (lowercase, no trailing dot) before any
/// equality check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsAnswer {
    pub name: String,
    pub rtype: RecordType,
    pub ttl: u32,
    pub data: String,
}

impl DnsAnswer {
    pub fn new(name: impl Into<String>, rtype: RecordType, ttl: u32, data: impl Into<String>) -> Self {
        Self {
            name: canonicalize_name(&name.into()),
            rtype,
            ttl,
            data: canonicalize_name(&data.into()),
        }
    }
}

/// Lowercase and strip a single trailing dot, as every `DNSAnswer.Name`/`.Data`
/// and bus-bound `DNSRequest.Name` must be before comparison.
pub fn canonicalize_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    lower.strip_suffix('.').map(str::to_string).unwrap_or(lower)
}

/// A resolved or to-be-resolved IP address, optionally tied to a domain and
/// ASN/netblock metadata.
///
/// Invariant: `address` falls within `prefix` whenever both are present.
#[derive(Debug, Clone)]
pub struct AddrRequest {
    pub address: IpAddr,
    pub domain: Option<String>,
    pub asn: Option<u32>,
    pub prefix: Option<ipnet::IpNet>,
    pub cc: Option<String>,
    pub description: Option<String>,
    pub allocation_date: Option<chrono::NaiveDate>,
    pub netblocks: Vec<ipnet::IpNet>,
}

impl AddrRequest {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            domain: None,
            asn: None,
            prefix: None,
            cc: None,
            description: None,
            allocation_date: None,
            netblocks: Vec::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        match self.prefix {
            Some(prefix) => prefix.contains(&self.address),
            None => true,
        }
    }
}

/// A request to resolve ASN/netblock metadata for an address.
#[derive(Debug, Clone)]
pub struct AsnRequest {
    pub address: IpAddr,
    pub domain: Option<String>,
    pub asn: Option<u32>,
    pub prefix: Option<ipnet::IpNet>,
    pub cc: Option<String>,
    pub description: Option<String>,
    pub source: String,
}

/// A WHOIS lookup result: the queried domain and any newly discovered
/// registrant-linked domains.
#[derive(Debug, Clone)]
pub struct WhoisRequest {
    pub domain: String,
    pub new_domains: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case_and_trailing_dot() {
        assert_eq!(canonicalize_name("WWW.Example.COM."), "www.example.com");
        assert_eq!(canonicalize_name("www.example.com"), "www.example.com");
    }

    #[test]
    fn dns_request_canonicalizes_on_construction() {
        let req = DnsRequest::new("Foo.EXAMPLE.com.", "Example.COM", Tag::Dns, "unit-test");
        assert_eq!(req.name, "foo.example.com");
        assert_eq!(req.domain, "example.com");
    }

    #[test]
    fn trusted_tags_exclude_guesses() {
        assert!(Tag::Dns.is_trusted());
        assert!(Tag::Cert.is_trusted());
        assert!(!Tag::Brute.is_trusted());
        assert!(!Tag::Alt.is_trusted());
    }

    #[test]
    fn addr_request_prefix_consistency() {
        let mut req = AddrRequest::new("1.2.3.4".parse().unwrap());
        req.prefix = Some("1.2.3.0/24".parse().unwrap());
        assert!(req.is_consistent());
        req.prefix = Some("5.6.7.0/24".parse().unwrap());
        assert!(!req.is_consistent());
    }
}
