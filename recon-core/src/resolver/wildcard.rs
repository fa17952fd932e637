//! Wildcard DNS detection and suppression.

use std::collections::HashSet;

use rand::Rng;

use crate::model::{DnsAnswer, Tag};

/// How many distinct random labels are probed at the same depth before a
/// domain's wildcard behavior is classified. Must be at least 3 for the
/// static/dynamic distinction to be meaningful.
pub const WILDCARD_PROBE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildcardState {
    None,
    Static(HashSet<String>),
    Dynamic,
}

/// Generates a random DNS-label-safe string for wildcard probing, e.g.
/// `x7fq2k`.
pub fn random_label(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Classifies a domain's wildcard state from the answer sets observed for
/// [`WILDCARD_PROBE_COUNT`] distinct random labels at the same depth.
///
/// - all empty (NXDOMAIN/NODATA) ⇒ [`WildcardState::None`]
/// - all identical, non-empty ⇒ [`WildcardState::Static`], remembering the set
/// - non-empty but differing ⇒ [`WildcardState::Dynamic`]
pub fn classify(probe_results: &[Vec<DnsAnswer>]) -> WildcardState {
    let non_empty: Vec<&Vec<DnsAnswer>> = probe_results.iter().filter(|r| !r.is_empty()).collect();
    if non_empty.is_empty() {
        return WildcardState::None;
    }
    let first: HashSet<String> = non_empty[0].iter().map(|a| a.data.clone()).collect();
    let all_identical = non_empty
        .iter()
        .all(|r| r.iter().map(|a| a.data.clone()).collect::<HashSet<_>>() == first);
    if all_identical && non_empty.len() == probe_results.len() {
        WildcardState::Static(first)
    } else {
        WildcardState::Dynamic
    }
}

impl WildcardState {
    /// `MatchesWildcard(req)`: true iff the domain is Static and the
    /// query's answers are a subset of the remembered set, or the domain is
    /// Dynamic. Requests with a trusted [`Tag`] bypass this check entirely
    /// at the call site (see [`crate::resolver::ResolverPool`]).
    pub fn matches(&self, answers: &[DnsAnswer], tag: Tag) -> bool {
        if tag.is_trusted() {
            return false;
        }
        match self {
            WildcardState::None => false,
            WildcardState::Dynamic => true,
            WildcardState::Static(remembered) => {
                !answers.is_empty() && answers.iter().all(|a| remembered.contains(&a.data))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordType;

    fn answer(data: &str) -> DnsAnswer {
        DnsAnswer::new("x.example.com", RecordType::A, 300, data)
    }

    #[test]
    fn all_empty_is_none() {
        let probes = vec![vec![], vec![], vec![]];
        assert_eq!(classify(&probes), WildcardState::None);
    }

    #[test]
    fn identical_nonempty_is_static() {
        let probes = vec![
            vec![answer("1.2.3.4")],
            vec![answer("1.2.3.4")],
            vec![answer("1.2.3.4")],
        ];
        match classify(&probes) {
            WildcardState::Static(set) => assert!(set.contains("1.2.3.4")),
            other => panic!("expected Static, got {other:?}"),
        }
    }

    #[test]
    fn differing_nonempty_is_dynamic() {
        let probes = vec![
            vec![answer("1.2.3.4")],
            vec![answer("5.6.7.8")],
            vec![answer("9.9.9.9")],
        ];
        assert_eq!(classify(&probes), WildcardState::Dynamic);
    }

    #[test]
    fn static_suppresses_untrusted_subset_match() {
        let mut set = HashSet::new();
        set.insert("1.2.3.4".to_string());
        let state = WildcardState::Static(set);
        let answers = vec![answer("1.2.3.4")];
        assert!(state.matches(&answers, Tag::Brute));
        assert!(!state.matches(&answers, Tag::Dns));
    }

    #[test]
    fn dynamic_always_suppresses_untrusted() {
        let state = WildcardState::Dynamic;
        assert!(state.matches(&[], Tag::Alt));
        assert!(!state.matches(&[], Tag::Cert));
    }
}
