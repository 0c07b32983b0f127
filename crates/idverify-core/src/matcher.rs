//! Fuzzy matching of a declared ID number against OCR output.
//!
//! Two tiers with different tolerance: candidate selection demands close
//! positional agreement so an unrelated 12-digit blob is not picked, while the
//! final acceptance test is looser and also searches the raw text directly.

use crate::extractor::{extract_candidates, strip_whitespace, CandidateSet, ID_DIGITS};
use regex::Regex;

// --- Empirical thresholds, overridable through `IdMatchPolicy` ---
pub const DEFAULT_SELECTION_MIN_AGREEMENT: u8 = 8;
pub const DEFAULT_ACCEPTANCE_MIN_AGREEMENT: u8 = 6;
pub const DEFAULT_SUBSTRING_LEN: usize = 8;
pub const DEFAULT_SUBSTRING_OFFSETS: usize = 5;

const GROUP_LEN: usize = 4;

/// Tolerances used by candidate selection and the acceptance test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMatchPolicy {
    /// Positional digit agreement needed for a non-exact candidate to be selected.
    pub selection_min_agreement: u8,
    /// Positional digit agreement needed to accept a non-exact candidate.
    pub acceptance_min_agreement: u8,
    /// Length of the declared-number windows searched for in the raw text.
    pub substring_len: usize,
    /// Number of window start offsets tried, beginning at 0.
    pub substring_offsets: usize,
}

impl Default for IdMatchPolicy {
    fn default() -> Self {
        Self {
            selection_min_agreement: DEFAULT_SELECTION_MIN_AGREEMENT,
            acceptance_min_agreement: DEFAULT_ACCEPTANCE_MIN_AGREEMENT,
            substring_len: DEFAULT_SUBSTRING_LEN,
            substring_offsets: DEFAULT_SUBSTRING_OFFSETS,
        }
    }
}

/// Which acceptance tier decided the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Exact,
    /// Declared number found in the whitespace-stripped raw text.
    RawText,
    /// Declared number's digit groups found in order in the raw text.
    SpacedLayout,
    /// A window of the declared number found in the stripped raw text.
    Substring { offset: usize },
    Positional { agreement: u8 },
    Rejected { agreement: u8 },
    NoCandidate,
}

impl Acceptance {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Acceptance::Rejected { .. } | Acceptance::NoCandidate)
    }

    pub fn matched_against_raw_text(&self) -> bool {
        matches!(
            self,
            Acceptance::RawText | Acceptance::SpacedLayout | Acceptance::Substring { .. }
        )
    }
}

/// Result of matching one document's recognized text against the declared number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMatchResult {
    pub best_candidate: Option<String>,
    pub matched_against_raw_text: bool,
    /// Positional agreement between the best candidate and the declared number.
    pub positional_digit_matches: u8,
    pub acceptance: Acceptance,
}

impl IdMatchResult {
    pub fn accepted(&self) -> bool {
        self.acceptance.is_accepted()
    }
}

/// Count indices `0..12` at which both strings carry the same byte.
pub fn positional_agreement(a: &str, b: &str) -> u8 {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    (0..ID_DIGITS)
        .filter(|&i| matches!((a.get(i), b.get(i)), (Some(x), Some(y)) if x == y))
        .count() as u8
}

/// Pick the candidate most likely to be the declared number.
///
/// Exact match first, then the first candidate with enough positional
/// agreement, then simply the first candidate.
pub fn select_best_candidate<'a>(
    candidates: &'a CandidateSet,
    declared: &str,
    policy: &IdMatchPolicy,
) -> Option<&'a str> {
    if let Some(exact) = candidates.iter().find(|c| *c == declared) {
        tracing::debug!("exact candidate match");
        return Some(exact);
    }

    if let Some(partial) = candidates
        .iter()
        .find(|c| positional_agreement(c, declared) >= policy.selection_min_agreement)
    {
        tracing::debug!(
            agreement = positional_agreement(partial, declared),
            "partial candidate match"
        );
        return Some(partial);
    }

    candidates.first()
}

/// Search the raw recognized text for the declared number (acceptance tiers 2–4).
pub fn find_in_text(raw_text: &str, declared: &str, policy: &IdMatchPolicy) -> Option<Acceptance> {
    if raw_text.is_empty() || declared.is_empty() {
        return None;
    }

    let clean = strip_whitespace(raw_text);
    if clean.contains(declared) {
        return Some(Acceptance::RawText);
    }

    if let Some(pattern) = spaced_layout_pattern(declared) {
        if pattern.is_match(raw_text) {
            return Some(Acceptance::SpacedLayout);
        }
    }

    if policy.substring_len > 0 {
        for offset in 0..policy.substring_offsets {
            let Some(window) = declared.get(offset..offset + policy.substring_len) else {
                break;
            };
            if clean.contains(window) {
                return Some(Acceptance::Substring { offset });
            }
        }
    }

    None
}

/// `dddd.*dddd.*dddd` built from the declared number's three groups.
fn spaced_layout_pattern(declared: &str) -> Option<Regex> {
    let groups: Vec<&str> = (0..3)
        .map(|g| declared.get(g * GROUP_LEN..(g + 1) * GROUP_LEN))
        .collect::<Option<_>>()?;
    let pattern = groups
        .iter()
        .map(|g| regex::escape(g))
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&pattern).ok()
}

/// Run the final acceptance test and report which tier decided it.
pub fn evaluate_acceptance(
    extracted: &str,
    declared: &str,
    raw_text: &str,
    policy: &IdMatchPolicy,
) -> Acceptance {
    if extracted.is_empty() || declared.is_empty() {
        return Acceptance::NoCandidate;
    }
    if extracted == declared {
        return Acceptance::Exact;
    }
    if let Some(found) = find_in_text(raw_text, declared, policy) {
        return found;
    }

    let agreement = positional_agreement(extracted, declared);
    if agreement >= policy.acceptance_min_agreement {
        Acceptance::Positional { agreement }
    } else {
        Acceptance::Rejected { agreement }
    }
}

pub fn accepts(extracted: &str, declared: &str, raw_text: &str, policy: &IdMatchPolicy) -> bool {
    evaluate_acceptance(extracted, declared, raw_text, policy).is_accepted()
}

/// Extract candidates from `raw_text`, select the best one and test it against `declared`.
pub fn match_id(raw_text: &str, declared: &str, policy: &IdMatchPolicy) -> IdMatchResult {
    let candidates = extract_candidates(raw_text);
    let Some(best) = select_best_candidate(&candidates, declared, policy) else {
        return IdMatchResult {
            best_candidate: None,
            matched_against_raw_text: false,
            positional_digit_matches: 0,
            acceptance: Acceptance::NoCandidate,
        };
    };

    let acceptance = evaluate_acceptance(best, declared, raw_text, policy);
    tracing::debug!(best, ?acceptance, "ID acceptance evaluated");

    IdMatchResult {
        best_candidate: Some(best.to_string()),
        matched_against_raw_text: acceptance.matched_against_raw_text(),
        positional_digit_matches: positional_agreement(best, declared),
        acceptance,
    }
}
