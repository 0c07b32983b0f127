//! Candidate ID number extraction from recognized text.
//!
//! Aadhaar numbers are printed as three groups of four digits. OCR output
//! sometimes keeps the grouping and sometimes collapses it, so both layouts
//! are scanned.

use regex::Regex;
use std::sync::OnceLock;

/// Length of an Aadhaar number in digits.
pub const ID_DIGITS: usize = 12;

static SPACED_PATTERN: OnceLock<Regex> = OnceLock::new();
static CONTINUOUS_PATTERN: OnceLock<Regex> = OnceLock::new();

fn spaced_pattern() -> &'static Regex {
    SPACED_PATTERN.get_or_init(|| {
        Regex::new(r"[0-9]{4}\s+[0-9]{4}\s+[0-9]{4}").expect("static regex is valid")
    })
}

fn continuous_pattern() -> &'static Regex {
    CONTINUOUS_PATTERN.get_or_init(|| Regex::new(r"[0-9]{12}").expect("static regex is valid"))
}

/// Ordered set of distinct 12-digit candidates in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    items: Vec<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `candidate` unless it is already present. Returns whether it was added.
    pub fn insert(&mut self, candidate: String) -> bool {
        if self.contains(&candidate) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    pub fn contains(&self, candidate: &str) -> bool {
        self.items.iter().any(|c| c == candidate)
    }

    pub fn first(&self) -> Option<&str> {
        self.items.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = CandidateSet::new();
        for s in iter {
            set.insert(s.into());
        }
        set
    }
}

/// Remove every whitespace character from `text`.
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Scan recognized text for 12-digit ID candidates.
///
/// Spaced groups (`1234 5678 9012`) are collected first, then every
/// non-overlapping 12-digit run of the whitespace-stripped text.
pub fn extract_candidates(text: &str) -> CandidateSet {
    let mut candidates = CandidateSet::new();
    if text.is_empty() {
        return candidates;
    }

    for m in spaced_pattern().find_iter(text) {
        candidates.insert(strip_whitespace(m.as_str()));
    }

    let cleaned = strip_whitespace(text);
    for m in continuous_pattern().find_iter(&cleaned) {
        candidates.insert(m.as_str().to_string());
    }

    tracing::debug!(count = candidates.len(), candidates = ?candidates.items, "extracted ID candidates");
    candidates
}

/// Normalize a declared ID number: strip whitespace and require exactly 12 ASCII digits.
pub fn normalize_declared(declared: &str) -> Option<String> {
    let cleaned = strip_whitespace(declared);
    let valid = cleaned.len() == ID_DIGITS && cleaned.bytes().all(|b| b.is_ascii_digit());
    valid.then_some(cleaned)
}
