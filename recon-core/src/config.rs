//! Enumeration-wide configuration, assembled by the (out-of-scope) CLI/config
//! loader and handed to [`crate::system::System`].

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use uuid::Uuid;

use crate::resolver::DEFAULT_MAX_DNS_QUERIES;
use crate::source::SourceFilter;

/// The five alteration operators and their thresholds.
#[derive(Debug, Clone, Default)]
pub struct AlterationConfig {
    pub flip_numbers: bool,
    pub add_numbers: bool,
    pub flip_words: bool,
    pub add_words: bool,
    /// Number of edit-distance-fuzzing iterations; `0` disables it.
    pub edit_distance: u32,
    pub min_for_word_flip: u32,
    /// Extra words fed to flip/add-word beyond ones observed at runtime.
    pub alt_wordlist: Vec<String>,
    /// Minimum distinct labels observed before the Markov generator fires;
    /// `0` disables the generator.
    pub markov_min_for_gen: u32,
}

/// Flags and data every core component reads at start, collected from the
/// CLI surface.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub domains: Vec<String>,
    pub resolvers: Vec<SocketAddr>,
    pub wordlist: Vec<String>,
    pub brute_forcing: bool,
    pub alterations: AlterationConfig,
    /// Master switch for brute-forcing subdomains of discovered subdomains,
    /// not just the configured apex domains. `min_for_recursive` only gates
    /// *when* a non-apex name expands; this gates *whether* it ever does.
    pub recursive: bool,
    /// `0` means "fire on first observation".
    pub min_for_recursive: u32,
    pub active: bool,
    pub include_unresolvable: bool,
    pub max_dns_queries: usize,
    pub uuid: Uuid,
    pub dir: PathBuf,
    pub source_filter: SourceFilter,
    pub address_filter: Vec<ipnet::IpNet>,
    pub blacklist: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            resolvers: Vec::new(),
            wordlist: Vec::new(),
            brute_forcing: false,
            alterations: AlterationConfig::default(),
            recursive: false,
            min_for_recursive: 0,
            active: false,
            include_unresolvable: false,
            max_dns_queries: DEFAULT_MAX_DNS_QUERIES,
            uuid: Uuid::new_v4(),
            dir: default_output_dir(),
            source_filter: SourceFilter::default(),
            address_filter: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

/// `$HOME/amass/`-style default persistence directory.
pub fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("amass")
}

/// Reserved/sinkhole ranges the DNS service filters A/AAAA answers against.
pub fn default_bad_subnets() -> Vec<ipnet::IpNet> {
    [
        "0.0.0.0/8",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "192.0.2.0/24",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "::1/128",
        "fe80::/10",
    ]
    .iter()
    .map(|s| s.parse().unwrap())
    .collect()
}

pub fn is_bad_subnet(addr: IpAddr, subnets: &[ipnet::IpNet]) -> bool {
    subnets.iter().any(|net| net.contains(&addr))
}

/// Fixed, popular SRV service labels probed per subdomain.
pub fn common_srv_labels() -> &'static [&'static str] {
    &[
        "_sip._tcp",
        "_sip._udp",
        "_sips._tcp",
        "_xmpp-client._tcp",
        "_xmpp-server._tcp",
        "_caldav._tcp",
        "_carddav._tcp",
        "_autodiscover._tcp",
        "_ldap._tcp",
        "_kerberos._tcp",
    ]
}
