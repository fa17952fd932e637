//! CLI wiring for `recon-cli`, the thin example binary that drives
//! `recon_core::System` through one enumeration.
//!
//! This crate deliberately does not grow a config-file loader or individual
//! data-source plugins — both are out-of-scope collaborators handled
//! elsewhere; it exists only so `recon-core` is runnable end-to-end.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use recon_core::config::{AlterationConfig, EngineConfig};
use recon_core::source::SourceFilter;
use uuid::Uuid;

/// Run one DNS-reconnaissance enumeration against the given seed domains.
#[derive(Parser, Debug)]
#[command(name = "recon-cli", version)]
pub struct Cli {
    /// Apex domains to enumerate (repeatable).
    #[arg(short = 'd', long = "domain", required = true)]
    pub domains: Vec<String>,

    /// Recursive resolver addresses to query (repeatable).
    #[arg(short = 'r', long = "resolver", required = true)]
    pub resolvers: Vec<SocketAddr>,

    /// Path to a newline-delimited wordlist for brute forcing.
    #[arg(short = 'w', long = "wordlist")]
    pub wordlist: Option<PathBuf>,

    /// Enable wordlist-driven brute forcing.
    #[arg(long = "brute-forcing", default_value_t = false)]
    pub brute_forcing: bool,

    /// Enable recursive brute forcing of newly discovered subdomains.
    #[arg(long = "recursive", default_value_t = false)]
    pub recursive: bool,

    /// How many times a subdomain must be observed before it is expanded
    /// recursively; `0` means "on first observation".
    #[arg(long = "min-for-recursive", default_value_t = 0)]
    pub min_for_recursive: u32,

    #[command(flatten)]
    pub alterations: AlterationArgs,

    /// Enable active techniques (zone transfer, NSEC walk) where applicable.
    #[arg(long = "active", default_value_t = false)]
    pub active: bool,

    /// Emit `Output` events for in-scope names that never resolved.
    #[arg(long = "include-unresolvable", default_value_t = false)]
    pub include_unresolvable: bool,

    /// Global bound on in-flight DNS queries.
    #[arg(long = "max-dns-queries", default_value_t = recon_core::resolver::DEFAULT_MAX_DNS_QUERIES)]
    pub max_dns_queries: usize,

    /// Enumeration identifier; generated if not supplied.
    #[arg(long = "uuid")]
    pub uuid: Option<Uuid>,

    /// Output/persistence directory (default `$HOME/amass/`).
    #[arg(long = "dir")]
    pub dir: Option<PathBuf>,

    /// Data-source names to include (mutually exclusive with `--exclude-source`).
    #[arg(long = "include-source")]
    pub include_sources: Vec<String>,

    /// Data-source names to exclude.
    #[arg(long = "exclude-source")]
    pub exclude_sources: Vec<String>,

    /// How long to let the enumeration run before stopping it.
    #[arg(long = "timeout-secs", default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(clap::Args, Debug)]
pub struct AlterationArgs {
    #[arg(long = "flip-numbers", default_value_t = false)]
    pub flip_numbers: bool,

    #[arg(long = "add-numbers", default_value_t = false)]
    pub add_numbers: bool,

    #[arg(long = "flip-words", default_value_t = false)]
    pub flip_words: bool,

    #[arg(long = "add-words", default_value_t = false)]
    pub add_words: bool,

    #[arg(long = "edit-distance", default_value_t = 0)]
    pub edit_distance: u32,

    #[arg(long = "min-for-word-flip", default_value_t = 0)]
    pub min_for_word_flip: u32,

    #[arg(long = "alt-wordlist")]
    pub alt_wordlist: Option<PathBuf>,

    #[arg(long = "markov-min-for-gen", default_value_t = 0)]
    pub markov_min_for_gen: u32,
}

impl Cli {
    /// Builds an [`EngineConfig`] from the parsed flags, loading the
    /// wordlist files referenced by path.
    pub fn into_engine_config(self) -> recon_core::Result<EngineConfig> {
        let wordlist = match self.wordlist {
            Some(path) => read_lines(&path)?,
            None => Vec::new(),
        };
        let alt_wordlist = match self.alterations.alt_wordlist {
            Some(path) => read_lines(&path)?,
            None => Vec::new(),
        };

        let source_filter = if !self.include_sources.is_empty() {
            SourceFilter { include: true, sources: self.include_sources }
        } else {
            SourceFilter { include: false, sources: self.exclude_sources }
        };

        Ok(EngineConfig {
            domains: self.domains,
            resolvers: self.resolvers,
            wordlist,
            brute_forcing: self.brute_forcing,
            alterations: AlterationConfig {
                flip_numbers: self.alterations.flip_numbers,
                add_numbers: self.alterations.add_numbers,
                flip_words: self.alterations.flip_words,
                add_words: self.alterations.add_words,
                edit_distance: self.alterations.edit_distance,
                min_for_word_flip: self.alterations.min_for_word_flip,
                alt_wordlist,
                markov_min_for_gen: self.alterations.markov_min_for_gen,
            },
            recursive: self.recursive,
            min_for_recursive: self.min_for_recursive,
            active: self.active,
            include_unresolvable: self.include_unresolvable,
            max_dns_queries: self.max_dns_queries,
            uuid: self.uuid.unwrap_or_else(Uuid::new_v4),
            dir: self.dir.unwrap_or_else(recon_core::config::default_output_dir),
            source_filter,
            address_filter: Vec::new(),
            blacklist: Vec::new(),
        })
    }

    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn read_lines(path: &PathBuf) -> recon_core::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        recon_core::CoreError::config("wordlist path", format!("failed to read {}: {e}", path.display()))
    })?;
    Ok(contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}
