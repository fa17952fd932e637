//! Alteration service: numeric/word flips, edit-distance fuzzing, and
//! an optional Markov-chain label generator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{watch, Mutex};

use crate::bus::{Event, EventBus, Priority, Topic};
use crate::config::AlterationConfig;
use crate::harness::ServiceHarness;
use crate::model::{canonicalize_name, DnsRequest, RecordType, Tag};
use crate::scope::ScopeConfig;

const LDH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-";

/// A simple order-N Markov chain trained on subdomain label characters,
/// used by the optional label generator.
struct MarkovChain {
    order: usize,
    transitions: HashMap<String, HashMap<char, u32>>,
    labels_seen: u32,
}

impl MarkovChain {
    fn new(order: usize) -> Self {
        Self { order, transitions: HashMap::new(), labels_seen: 0 }
    }

    fn train(&mut self, label: &str) {
        let chars: Vec<char> = label.chars().collect();
        if chars.len() <= self.order {
            return;
        }
        for window in chars.windows(self.order + 1) {
            let (prefix, next) = window.split_at(self.order);
            let key: String = prefix.iter().collect();
            *self.transitions.entry(key).or_default().entry(next[0]).or_insert(0) += 1;
        }
        self.labels_seen += 1;
    }

    fn generate(&self, max_len: usize) -> Option<String> {
        if self.transitions.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        let start_key = self.transitions.keys().nth(rng.gen_range(0..self.transitions.len()))?.clone();
        let mut out = start_key.clone();
        let mut key = start_key;
        while out.len() < max_len {
            let Some(next_counts) = self.transitions.get(&key) else { break };
            let total: u32 = next_counts.values().sum();
            if total == 0 {
                break;
            }
            let mut pick = rng.gen_range(0..total);
            let mut chosen = None;
            for (ch, count) in next_counts {
                if pick < *count {
                    chosen = Some(*ch);
                    break;
                }
                pick -= count;
            }
            let Some(ch) = chosen else { break };
            out.push(ch);
            key = out.chars().rev().take(self.order).collect::<Vec<_>>().into_iter().rev().collect();
        }
        Some(out)
    }
}

pub struct AlterationService {
    harness: ServiceHarness,
    bus: EventBus,
    scope: Arc<ScopeConfig>,
    config: AlterationConfig,
    word_counts: Mutex<HashMap<String, u32>>,
    markov: Mutex<MarkovChain>,
}

impl AlterationService {
    pub fn new(bus: EventBus, scope: Arc<ScopeConfig>, config: AlterationConfig) -> Self {
        let mut word_counts = HashMap::new();
        for word in &config.alt_wordlist {
            *word_counts.entry(word.to_ascii_lowercase()).or_insert(0) += u32::MAX / 2;
        }
        Self {
            harness: ServiceHarness::new("alteration", bus.clone(), Duration::ZERO),
            bus,
            scope,
            markov: Mutex::new(MarkovChain::new(2)),
            config,
            word_counts: Mutex::new(word_counts),
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

    async fn handle_resolved(&self, req: DnsRequest) {
        let has_address = req.records.iter().any(|r| matches!(r.rtype, RecordType::A | RecordType::Aaaa));
        if !has_address || !self.scope.is_domain_in_scope(&req.name) {
            return;
        }
        let name = canonicalize_name(&req.name);
        let Some((label, rest)) = split_first_label(&name) else { return };

        self.train(&label).await;

        let mut candidates: HashSet<String> = HashSet::new();
        if self.config.flip_numbers {
            candidates.extend(flip_numbers(&label));
        }
        if self.config.add_numbers {
            candidates.extend(append_numbers(&label));
        }
        if self.config.flip_words {
            let counts = self.word_counts.lock().await;
            candidates.extend(flip_words(&label, &counts, self.config.min_for_word_flip));
        }
        if self.config.add_words {
            let counts = self.word_counts.lock().await;
            candidates.extend(add_word(&label, &counts, self.config.min_for_word_flip));
        }
        if self.config.edit_distance > 0 {
            candidates.extend(edit_distance_fuzz(&label, self.config.edit_distance));
        }
        if self.config.markov_min_for_gen > 0 {
            let markov = self.markov.lock().await;
            if markov.labels_seen >= self.config.markov_min_for_gen {
                if let Some(guess) = markov.generate(label.len().max(4)) {
                    candidates.insert(guess);
                }
            }
        }
        candidates.remove(&label);

        for candidate_label in candidates {
            let candidate = format!("{candidate_label}.{rest}");
            if !self.scope.is_domain_in_scope(&candidate) {
                continue;
            }
            let domain = self.scope.which_domain(&candidate).unwrap_or(&rest).to_string();
            let candidate_req = DnsRequest::new(&candidate, domain, Tag::Alt, "alteration");
            self.bus.publish(Priority::Low, Event::NewName(candidate_req)).await;
        }
    }

    async fn train(&self, label: &str) {
        self.markov.lock().await.train(label);
        if self.config.flip_words || self.config.add_words {
            let mut counts = self.word_counts.lock().await;
            for part in label.split('-') {
                if !part.is_empty() {
                    *counts.entry(part.to_ascii_lowercase()).or_insert(0) += 1;
                }
            }
        }
    }
}

fn split_first_label(name: &str) -> Option<(String, String)> {
    let (label, rest) = name.split_once('.')?;
    Some((label.to_string(), rest.to_string()))
}

/// Replaces the first numeric character with 0-9 (and with empty), then
/// recurses once to also flip the last numeric character.
fn flip_numbers(label: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(first_idx) = label.find(|c: char| c.is_ascii_digit()) else { return out };
    for variant in flip_at(label, first_idx) {
        if let Some(last_idx) = variant.rfind(|c: char| c.is_ascii_digit()) {
            out.extend(flip_at(&variant, last_idx));
        }
        out.insert(variant);
    }
    out
}

fn flip_at(label: &str, idx: usize) -> HashSet<String> {
    let mut out = HashSet::new();
    let chars: Vec<char> = label.chars().collect();
    for digit in '0'..='9' {
        let mut replaced = chars.clone();
        replaced[idx] = digit;
        out.insert(replaced.into_iter().collect());
    }
    let mut deleted = chars.clone();
    deleted.remove(idx);
    out.insert(deleted.into_iter().collect());
    out
}

/// For 0-9, produces both `NAME<d>` and `NAME-<d>`.
fn append_numbers(label: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for d in 0..=9 {
        out.insert(format!("{label}{d}"));
        out.insert(format!("{label}-{d}"));
    }
    out
}

fn qualifying_words<'a>(counts: &'a HashMap<String, u32>, min: u32) -> Vec<&'a str> {
    counts.iter().filter(|(_, c)| **c >= min).map(|(w, _)| w.as_str()).collect()
}

/// Splits the label on `-`; for each observed prefix/suffix word whose count
/// is at least `min_for_word_flip`, substitutes it with every other
/// qualifying word.
fn flip_words(label: &str, counts: &HashMap<String, u32>, min_for_word_flip: u32) -> HashSet<String> {
    let mut out = HashSet::new();
    let parts: Vec<&str> = label.split('-').collect();
    if parts.len() < 2 {
        return out;
    }
    let words = qualifying_words(counts, min_for_word_flip);
    let first = parts[0];
    let last = *parts.last().unwrap();

    if counts.get(first).copied().unwrap_or(0) >= min_for_word_flip {
        for w in &words {
            if *w == first {
                continue;
            }
            let mut replaced = parts.clone();
            replaced[0] = w;
            out.insert(replaced.join("-"));
        }
    }
    if counts.get(last).copied().unwrap_or(0) >= min_for_word_flip {
        for w in &words {
            if *w == last {
                continue;
            }
            let mut replaced = parts.clone();
            let last_idx = replaced.len() - 1;
            replaced[last_idx] = w;
            out.insert(replaced.join("-"));
        }
    }
    out
}

/// Prefixes or suffixes the label with every qualifying observed word, with
/// and without a separating `-`.
fn add_word(label: &str, counts: &HashMap<String, u32>, min_for_word_flip: u32) -> HashSet<String> {
    let mut out = HashSet::new();
    for w in qualifying_words(counts, min_for_word_flip) {
        out.insert(format!("{w}{label}"));
        out.insert(format!("{w}-{label}"));
        out.insert(format!("{label}{w}"));
        out.insert(format!("{label}-{w}"));
    }
    out
}

/// Applies insertion/deletion/substitution over the LDH alphabet within
/// `iterations` rounds.
fn edit_distance_fuzz(label: &str, iterations: u32) -> HashSet<String> {
    let mut frontier: HashSet<String> = HashSet::from([label.to_string()]);
    let mut all = HashSet::new();
    for _ in 0..iterations {
        let mut next = HashSet::new();
        for word in &frontier {
            for mutated in single_edit(word) {
                if all.insert(mutated.clone()) {
                    next.insert(mutated);
                }
            }
        }
        frontier = next;
    }
    all
}

fn single_edit(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut out = Vec::new();
    for i in 0..=chars.len() {
        for &b in LDH_ALPHABET {
            let mut inserted = chars.clone();
            inserted.insert(i, b as char);
            out.push(inserted.into_iter().collect());
        }
    }
    for i in 0..chars.len() {
        let mut deleted = chars.clone();
        deleted.remove(i);
        out.push(deleted.into_iter().collect());
    }
    for i in 0..chars.len() {
        for &b in LDH_ALPHABET {
            let mut substituted = chars.clone();
            substituted[i] = b as char;
            out.push(substituted.into_iter().collect());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_numbers_covers_0_through_9_and_deletion() {
        let variants = flip_at("v1.example", 1);
        assert_eq!(variants.len(), 11);
        assert!(variants.contains("v0.example"));
        assert!(variants.contains("v.example"));
    }

    #[test]
    fn append_numbers_produces_twenty_variants() {
        let variants = append_numbers("prod");
        assert_eq!(variants.len(), 20);
        assert!(variants.contains("prod0"));
        assert!(variants.contains("prod-9"));
    }

    #[test]
    fn flip_words_substitutes_qualifying_prefix() {
        let mut counts = HashMap::new();
        counts.insert("prod".to_string(), 5);
        counts.insert("dev".to_string(), 5);
        let variants = flip_words("prod-db", &counts, 1);
        assert!(variants.contains("dev-db"));
    }

    #[test]
    fn add_word_prefixes_and_suffixes_with_and_without_separator() {
        let mut counts = HashMap::new();
        counts.insert("prod".to_string(), 3);
        let variants = add_word("db", &counts, 1);
        assert!(variants.contains("proddb"));
        assert!(variants.contains("prod-db"));
        assert!(variants.contains("dbprod"));
        assert!(variants.contains("db-prod"));
    }

    #[test]
    fn edit_distance_fuzz_grows_with_iterations() {
        let one = edit_distance_fuzz("ab", 1);
        let two = edit_distance_fuzz("ab", 2);
        assert!(!one.is_empty());
        assert!(two.len() >= one.len());
    }
}
