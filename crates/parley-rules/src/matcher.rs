//! Keyword matching against visitor input.
//!
//! Pure and referentially transparent: the same content and rule always
//! produce the same answer, and a malformed rule can only ever fail to
//! match, never fail the caller.

use regex::RegexBuilder;
use tracing::{debug, warn};

use parley_core::types::{MatchType, Rule};

/// Returns whether a rule's keywords match the given message content.
///
/// Content is lowercased and trimmed for every mode except `regex`, which
/// runs case-insensitively against the raw content. Keywords are trimmed
/// and lowercased at the comparison site so stored whitespace never breaks
/// a match.
pub fn rule_matches(content: &str, rule: &Rule) -> bool {
    let normalized = content.trim().to_lowercase();

    match rule.match_type {
        MatchType::Exact => rule
            .keywords
            .iter()
            .any(|k| normalized == k.trim().to_lowercase()),
        MatchType::Fuzzy => rule.keywords.iter().any(|k| {
            let keyword = k.trim().to_lowercase();
            !keyword.is_empty() && normalized.contains(&keyword)
        }),
        MatchType::Regex => rule
            .keywords
            .iter()
            .any(|k| regex_keyword_matches(content, k)),
        MatchType::Synonym => {
            let tokens: Vec<&str> = normalized.split_whitespace().collect();
            rule.keywords
                .iter()
                .any(|k| tokens.contains(&k.trim().to_lowercase().as_str()))
        }
        MatchType::Unmatched => {
            warn!(rule_id = %rule.id, "Rule has unknown match type; treating as non-match");
            false
        }
    }
}

/// Compile one keyword as a case-insensitive pattern and test the raw
/// content. Compilation failure is a data-integrity issue local to the
/// keyword: logged, non-matching, never propagated.
fn regex_keyword_matches(content: &str, keyword: &str) -> bool {
    match RegexBuilder::new(keyword).case_insensitive(true).build() {
        Ok(re) => re.is_match(content),
        Err(e) => {
            debug!(keyword, error = %e, "Invalid regex keyword skipped");
            false
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
