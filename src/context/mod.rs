//! Context window builder.
//!
//! The code-generation model can't read a multi-thousand-line page, so we
//! send it a handful of excerpts statistically likely to contain the edit
//! target: regions around the terms the user mentioned and the utility
//! classes of the element they clicked. When nothing anchors the search,
//! completeness beats precision and the whole (capped) file goes out.
//!
//! Pure functions of (source, message, hint) — independently unit-testable.

use serde::{Deserialize, Serialize};

use crate::locator::SelectionHint;

// ─── Tuning ───────────────────────────────────────────────────────────────────

/// Knobs for excerpt building. Defaults mirror the editor's model budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard cap on a full-file context block, in characters.
    pub full_file_cap: usize,
    /// Characters taken either side of a query-term hit.
    pub window_radius: usize,
    /// Maximum merged excerpts per request.
    pub max_excerpts: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            full_file_cap: 14_000,
            window_radius: 700,
            max_excerpts: 4,
        }
    }
}

/// Visual utility-class prefixes worth searching for (after stripping
/// responsive/state variant prefixes like `md:` or `hover:`).
const VISUAL_PREFIXES: &[&str] = &[
    "bg-", "from-", "to-", "via-", "text-", "border-", "ring-", "shadow-",
];

const MAX_VISUAL_TOKENS: usize = 10;
const MAX_GENERIC_TOKENS: usize = 6;
const MIN_KEYWORD_LEN: usize = 4;
const MIN_GENERIC_CLASS_LEN: usize = 6;

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "make", "want", "like", "just", "please", "change",
    "update", "into", "when", "then", "them", "they", "will", "would", "could", "should", "there",
    "here", "each", "every", "more", "less", "some", "what", "your", "page", "element", "button",
    "section", "little", "really",
];

// ─── Output types ─────────────────────────────────────────────────────────────

/// A half-open byte range into the source plus the terms that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcerptWindow {
    pub start: usize,
    pub end: usize,
    pub matched_terms: Vec<String>,
}

/// One labeled excerpt ready for prompt embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Excerpt {
    /// The terms that pulled this region in.
    pub matched_terms: Vec<String>,
    pub text: String,
}

/// The assembled context block.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub excerpts: Vec<Excerpt>,
    /// True when at least one query term was found (targeted mode).
    pub has_matches: bool,
    /// True when the full-file fallback had to cut the source at the cap.
    pub truncated: bool,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

/// Build the context block for a plan request.
///
/// With no selection hint the entire file is returned (truncated at the
/// cap); with a hint, targeted excerpts are built and the full file is the
/// fallback when no query term hits anywhere.
pub fn build_context(
    source: &str,
    latest_user_message: &str,
    hint: Option<&SelectionHint>,
    config: &ContextConfig,
) -> ContextBlock {
    match hint {
        None => full_file_block(source, config),
        Some(hint) => {
            let terms = build_query_terms(latest_user_message, hint);
            let windows = build_targeted_excerpts(source, &terms, config);
            if windows.is_empty() {
                full_file_block(source, config)
            } else {
                ContextBlock {
                    excerpts: render_excerpts(source, windows, config),
                    has_matches: true,
                    truncated: false,
                }
            }
        }
    }
}

fn full_file_block(source: &str, config: &ContextConfig) -> ContextBlock {
    let truncated = source.len() > config.full_file_cap;
    let end = floor_char_boundary(source, config.full_file_cap.min(source.len()));
    ContextBlock {
        excerpts: vec![Excerpt {
            matched_terms: vec![],
            text: source[..end].to_owned(),
        }],
        has_matches: false,
        truncated,
    }
}

// ─── Query-term extraction ────────────────────────────────────────────────────

/// Candidate query set: quoted phrases and keywords from the user's latest
/// message, the selection's own identity, visual utility-class tokens, and
/// longer generic class tokens as secondary anchors.
pub fn build_query_terms(latest_user_message: &str, hint: &SelectionHint) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push = |t: String| {
        let t = t.trim().to_owned();
        if !t.is_empty() && !terms.iter().any(|x| x.eq_ignore_ascii_case(&t)) {
            terms.push(t);
        }
    };

    for phrase in quoted_phrases(latest_user_message) {
        push(phrase);
    }

    for word in latest_user_message.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
        if word.len() >= MIN_KEYWORD_LEN && !is_stopword(word) {
            push(word.to_owned());
        }
    }

    // Mentions of background/color/theme imply utility-class hits.
    let lower = latest_user_message.to_lowercase();
    if lower.contains("background") || lower.contains("color") || lower.contains("theme") {
        for extra in ["bg-", "background", "color", "theme"] {
            push(extra.to_owned());
        }
    }

    if let Some(text) = &hint.text {
        push(text.clone());
    }
    if let Some(id) = &hint.id {
        push(id.clone());
    }
    if !hint.tag.is_empty() {
        push(hint.tag.clone());
    }

    if let Some(class_name) = &hint.class_name {
        let tokens: Vec<&str> = class_name.split_whitespace().collect();

        let visual = tokens
            .iter()
            .filter(|t| is_visual_utility(t))
            .take(MAX_VISUAL_TOKENS);
        for token in visual {
            push((*token).to_owned());
        }

        let generic = tokens
            .iter()
            .filter(|t| {
                t.len() >= MIN_GENERIC_CLASS_LEN && !t.contains('[') && !is_visual_utility(t)
            })
            .take(MAX_GENERIC_TOKENS);
        for token in generic {
            push((*token).to_owned());
        }
    }

    terms
}

fn quoted_phrases(message: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    for quote in ['"', '\''] {
        let mut rest = message;
        while let Some(open) = rest.find(quote) {
            let after = &rest[open + 1..];
            match after.find(quote) {
                Some(close) if close > 0 => {
                    phrases.push(after[..close].to_owned());
                    rest = &after[close + 1..];
                }
                _ => break,
            }
        }
    }
    phrases
}

fn is_stopword(word: &str) -> bool {
    let lower = word.to_lowercase();
    STOPWORDS.contains(&lower.as_str())
}

/// A Tailwind-like token whose base (variant prefixes stripped) starts
/// with one of the visual prefixes, e.g. `md:bg-sky-500` → `bg-sky-500`.
fn is_visual_utility(token: &str) -> bool {
    let base = token.rsplit(':').next().unwrap_or(token);
    VISUAL_PREFIXES.iter().any(|p| base.starts_with(p))
}

// ─── Window construction ──────────────────────────────────────────────────────

/// Find the first case-insensitive occurrence of each term and merge the
/// surrounding windows. Sorted by start offset; a window starting at or
/// before the previous window's end merges into it; capped at
/// `max_excerpts`.
pub fn build_targeted_excerpts(
    source: &str,
    terms: &[String],
    config: &ContextConfig,
) -> Vec<ExcerptWindow> {
    let lower_source = source.to_lowercase();

    let mut windows: Vec<ExcerptWindow> = Vec::new();
    for term in terms {
        let lower_term = term.to_lowercase();
        if lower_term.is_empty() {
            continue;
        }
        if let Some(hit) = lower_source.find(&lower_term) {
            let start = floor_char_boundary(source, hit.saturating_sub(config.window_radius));
            let end = floor_char_boundary(
                source,
                (hit + lower_term.len() + config.window_radius).min(source.len()),
            );
            windows.push(ExcerptWindow {
                start,
                end,
                matched_terms: vec![term.clone()],
            });
        }
    }

    windows.sort_by_key(|w| w.start);

    let mut merged: Vec<ExcerptWindow> = Vec::new();
    for window in windows {
        match merged.last_mut() {
            Some(prev) if window.start <= prev.end => {
                prev.end = prev.end.max(window.end);
                for term in window.matched_terms {
                    if !prev.matched_terms.contains(&term) {
                        prev.matched_terms.push(term);
                    }
                }
            }
            _ => merged.push(window),
        }
    }

    merged.truncate(config.max_excerpts);
    merged
}

/// Materialize windows into labeled excerpt strings, respecting the total
/// character budget.
fn render_excerpts(
    source: &str,
    windows: Vec<ExcerptWindow>,
    config: &ContextConfig,
) -> Vec<Excerpt> {
    let mut remaining = config.full_file_cap;
    let mut excerpts = Vec::with_capacity(windows.len());
    for window in windows {
        if remaining == 0 {
            break;
        }
        let text = &source[window.start..window.end];
        let end = floor_char_boundary(text, remaining.min(text.len()));
        remaining -= end;
        excerpts.push(Excerpt {
            matched_terms: window.matched_terms,
            text: text[..end].to_owned(),
        });
    }
    excerpts
}

/// Largest char boundary ≤ `index`.
fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(class_name: &str) -> SelectionHint {
        SelectionHint {
            tag: "button".into(),
            class_name: Some(class_name.into()),
            text: Some("Book now".into()),
            ..Default::default()
        }
    }

    #[test]
    fn no_hint_returns_full_file() {
        let source = "short file";
        let block = build_context(source, "make it blue", None, &ContextConfig::default());
        assert!(!block.has_matches);
        assert!(!block.truncated);
        assert_eq!(block.excerpts.len(), 1);
        assert_eq!(block.excerpts[0].text, source);
    }

    #[test]
    fn no_hint_truncates_large_file() {
        let source = "x".repeat(20_000);
        let config = ContextConfig::default();
        let block = build_context(&source, "anything", None, &config);
        assert!(block.truncated);
        assert_eq!(block.excerpts[0].text.len(), config.full_file_cap);
    }

    #[test]
    fn query_terms_include_quoted_phrases_and_keywords() {
        let terms = build_query_terms(
            "change the \"Confirm booking\" headline to something shorter",
            &hint("bg-sky-500"),
        );
        assert!(terms.contains(&"Confirm booking".to_owned()));
        assert!(terms.contains(&"headline".to_owned()));
        assert!(terms.contains(&"shorter".to_owned()));
        // Stopwords and short words are skipped.
        assert!(!terms.contains(&"the".to_owned()));
        assert!(!terms.contains(&"change".to_owned()));
    }

    #[test]
    fn color_mention_adds_heuristic_terms() {
        let terms = build_query_terms("make the background darker", &hint(""));
        assert!(terms.contains(&"bg-".to_owned()));
        assert!(terms.contains(&"theme".to_owned()));
    }

    #[test]
    fn visual_tokens_strip_variant_prefixes() {
        let terms = build_query_terms(
            "tweak it",
            &hint("md:bg-sky-500 hover:text-white px-4 rounded-2xl [mask:luminance]"),
        );
        assert!(terms.contains(&"md:bg-sky-500".to_owned()));
        assert!(terms.contains(&"hover:text-white".to_owned()));
        // px-4 is neither visual nor ≥6 chars; bracketed tokens are skipped.
        assert!(!terms.contains(&"px-4".to_owned()));
        assert!(!terms.contains(&"[mask:luminance]".to_owned()));
        // rounded-2xl qualifies as a longer generic secondary anchor.
        assert!(terms.contains(&"rounded-2xl".to_owned()));
    }

    #[test]
    fn windows_merge_and_cap() {
        let mut source = String::new();
        for i in 0..40 {
            source.push_str(&format!("segment{i:02} {}\n", "pad".repeat(40)));
        }
        let terms: Vec<String> = (0..12).map(|i| format!("segment{i:02}")).collect();
        let config = ContextConfig {
            window_radius: 700,
            ..Default::default()
        };
        let windows = build_targeted_excerpts(&source, &terms, &config);
        assert!(!windows.is_empty());
        assert!(windows.len() <= config.max_excerpts);
        // Merged windows never overlap and accumulate their terms.
        for pair in windows.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
        assert!(windows[0].matched_terms.len() > 1);
    }

    #[test]
    fn excerpt_budget_is_respected() {
        let source = "y".repeat(50_000) + "needle" + &"z".repeat(50_000);
        let config = ContextConfig::default();
        let block = build_context(
            &source,
            "find the needle here",
            Some(&hint("")),
            &config,
        );
        assert!(block.has_matches);
        let total: usize = block.excerpts.iter().map(|e| e.text.len()).sum();
        assert!(total <= config.full_file_cap);
        assert!(block.excerpts.len() <= config.max_excerpts);
    }

    #[test]
    fn zero_hits_fall_back_to_full_file() {
        let source = "completely unrelated source";
        let block = build_context(
            source,
            "qqqq wwww",
            Some(&hint("zz-0000")),
            &ContextConfig::default(),
        );
        assert!(!block.has_matches);
        assert_eq!(block.excerpts[0].text, source);
    }

    #[test]
    fn case_insensitive_first_occurrence() {
        let source = "AAA NeedleTerm BBB needleterm CCC";
        let terms = vec!["NEEDLETERM".to_owned()];
        let config = ContextConfig {
            window_radius: 4,
            ..Default::default()
        };
        let windows = build_targeted_excerpts(source, &terms, &config);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 0);
        assert!(windows[0].end < source.len());
    }

    #[test]
    fn multibyte_source_never_splits_chars() {
        let source = "émoji 🦀 héllo ".repeat(200) + "target" + &" plus ça va 🚀".repeat(200);
        let terms = vec!["target".to_owned()];
        let windows = build_targeted_excerpts(&source, &terms, &ContextConfig::default());
        assert_eq!(windows.len(), 1);
        // Slicing at the computed boundaries must not panic.
        let _ = &source[windows[0].start..windows[0].end];
    }
}
