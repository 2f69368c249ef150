//! Selection-to-source locator.
//!
//! The preview reports what the user clicked as rendered-DOM attributes
//! (tag, id, class list, visible text). That describes the *output* of the
//! page, not its source — so nothing here is ground truth. The locator's
//! job is to find the most plausible authoring site in the source text and
//! hand the plan orchestrator real lines to anchor the model's edit on.
//!
//! Pure functions of (source, hint) — no store, no network.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How many class tokens we search for, at most.
const MAX_ANCHORS: usize = 5;
/// Class tokens shorter than this (and without a hyphen) are too generic
/// to anchor on.
const MIN_ANCHOR_LEN: usize = 6;
/// Visible text is truncated before searching.
const MAX_TEXT_SEARCH_LEN: usize = 60;
/// A text match this close to the class match is already covered by it.
const TEXT_PROXIMITY_LINES: usize = 8;
/// Window shape around a matched line.
const LINES_BEFORE: usize = 4;
const LINES_AFTER: usize = 5;

// ─── Selection hint ───────────────────────────────────────────────────────────

/// A DOM node the user clicked in the preview. Rendered output only —
/// never treated as ground truth for source matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionHint {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, rename = "outerHTML", skip_serializing_if = "Option::is_none")]
    pub outer_html: Option<String>,
}

// ─── Output ───────────────────────────────────────────────────────────────────

/// A numbered source window plus the reason it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceWindow {
    /// 1-based first line of the window.
    pub start_line: usize,
    /// 1-based last line of the window (inclusive).
    pub end_line: usize,
    /// Why this window was selected, e.g. "class match (2 anchors)".
    pub reason: String,
    /// The window text with `NNN: ` line-number prefixes.
    pub excerpt: String,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

/// Locate the most plausible source lines for a rendered selection.
///
/// Returns an empty vec when there is no hint signal or nothing scores
/// above zero — callers must not claim false confidence.
pub fn locate_selection(source: &str, hint: &SelectionHint) -> Vec<SourceWindow> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut windows = Vec::new();

    let class_line = hint
        .class_name
        .as_deref()
        .and_then(|cn| best_class_line(&lines, cn));
    if let Some((line_idx, score)) = class_line {
        windows.push(make_window(
            &lines,
            line_idx,
            format!("class match ({score} anchor{})", plural(score)),
        ));
    }

    if let Some(text) = hint.text.as_deref() {
        if let Some(line_idx) = find_text_literal(&lines, text) {
            let covered = class_line.is_some_and(|(class_idx, _)| {
                line_idx.abs_diff(class_idx) <= TEXT_PROXIMITY_LINES
            });
            if !covered {
                windows.push(make_window(&lines, line_idx, "text match".to_owned()));
            }
        }
    }

    windows
}

// ─── Class-anchor scoring ─────────────────────────────────────────────────────

/// Tokens worth anchoring on: long enough to be distinctive, or hyphenated
/// (utility-class names like `bg-sky-500` carry meaning; `flex` does not).
pub fn anchor_tokens(class_name: &str) -> Vec<&str> {
    class_name
        .split_whitespace()
        .filter(|t| t.len() >= MIN_ANCHOR_LEN || t.contains('-'))
        .take(MAX_ANCHORS)
        .collect()
}

static PROP_INTERPOLATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*\}").expect("interpolation regex")
});

/// Score every line by verbatim anchor hits; return the best line among
/// the maximum scorers, preferring lines that look like a reusable
/// component body (prop interpolation / `props.` reference) over call
/// sites.
fn best_class_line(lines: &[&str], class_name: &str) -> Option<(usize, usize)> {
    let anchors = anchor_tokens(class_name);
    if anchors.is_empty() {
        return None;
    }

    let mut max_score = 0usize;
    let mut candidates: Vec<usize> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let score = anchors.iter().filter(|a| line.contains(*a)).count();
        if score == 0 {
            continue;
        }
        if score > max_score {
            max_score = score;
            candidates.clear();
        }
        if score == max_score {
            candidates.push(idx);
        }
    }

    if candidates.is_empty() {
        return None;
    }

    let component_body = candidates.iter().copied().find(|&idx| {
        let line = lines[idx];
        line.contains("props.") || PROP_INTERPOLATION.is_match(line)
    });
    Some((component_body.unwrap_or(candidates[0]), max_score))
}

// ─── Text-literal search ──────────────────────────────────────────────────────

/// Find the selection's visible text as a quoted string literal or a
/// `label=`/`title=` attribute value.
fn find_text_literal(lines: &[&str], text: &str) -> Option<usize> {
    let trimmed = text.trim();
    let needle = truncate_chars(trimmed, MAX_TEXT_SEARCH_LEN);
    if needle.is_empty() {
        return None;
    }

    // A truncated needle is a prefix of the source literal, so a closing
    // delimiter can never sit right after it — match open-ended then.
    let truncated = needle.len() < trimmed.len();
    let quoted = if truncated {
        vec![
            format!("\"{needle}"),
            format!("'{needle}"),
            format!(">{needle}"),
            format!("label=\"{needle}"),
            format!("title=\"{needle}"),
        ]
    } else {
        vec![
            format!("\"{needle}\""),
            format!("'{needle}'"),
            format!(">{needle}<"),
            format!("label=\"{needle}"),
            format!("title=\"{needle}"),
        ]
    };

    lines
        .iter()
        .position(|line| quoted.iter().any(|q| line.contains(q.as_str())))
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ─── Window assembly ──────────────────────────────────────────────────────────

fn make_window(lines: &[&str], line_idx: usize, reason: String) -> SourceWindow {
    let start = line_idx.saturating_sub(LINES_BEFORE);
    let end = (line_idx + LINES_AFTER).min(lines.len() - 1);

    let excerpt = lines[start..=end]
        .iter()
        .enumerate()
        .map(|(offset, line)| format!("{:>4}: {line}", start + offset + 1))
        .collect::<Vec<_>>()
        .join("\n");

    SourceWindow {
        start_line: start + 1,
        end_line: end + 1,
        reason,
        excerpt,
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(class_name: &str, text: &str) -> SelectionHint {
        SelectionHint {
            tag: "button".into(),
            class_name: Some(class_name.into()),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    #[test]
    fn anchor_tokens_prefer_meaningful_classes() {
        let anchors = anchor_tokens("flex p-2 bg-sky-500 container mx-auto grow");
        // Hyphenated or long tokens only, capped at five.
        assert_eq!(anchors, vec!["p-2", "bg-sky-500", "container", "mx-auto"]);
    }

    #[test]
    fn precision_scenario_finds_exact_line() {
        let source = "import React from \"react\";\n\
            \n\
            export default function Page() {\n\
            \u{20}\u{20}return (\n\
            \u{20}\u{20}\u{20}\u{20}<div>\n\
            \u{20}\u{20}\u{20}\u{20}\u{20}\u{20}<button className=\"bg-sky-500 px-4 py-2\">Take</button>\n\
            \u{20}\u{20}\u{20}\u{20}</div>\n\
            \u{20}\u{20});\n\
            }\n";
        let windows = locate_selection(source, &hint("bg-sky-500 px-4 py-2", "Take"));
        assert!(!windows.is_empty());
        assert!(windows[0].excerpt.contains("bg-sky-500 px-4 py-2"));
        assert!(windows[0].reason.starts_with("class match"));
        // The text match sits on the same line — already covered, no
        // second window.
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn component_body_wins_tiebreak_over_call_site() {
        let source = "\
            <Card className=\"rounded-xl shadow-md\" />\n\
            line\n\
            line\n\
            line\n\
            line\n\
            line\n\
            line\n\
            line\n\
            line\n\
            line\n\
            <div className=\"rounded-xl shadow-md\">{props.title}</div>\n";
        let h = SelectionHint {
            tag: "div".into(),
            class_name: Some("rounded-xl shadow-md".into()),
            ..Default::default()
        };
        let windows = locate_selection(source, &h);
        assert_eq!(windows.len(), 1);
        assert!(windows[0].excerpt.contains("props.title"));
    }

    #[test]
    fn distant_text_match_gets_its_own_window() {
        let mut source = String::from("<div className=\"bg-rose-500 p-6\">header</div>\n");
        for _ in 0..20 {
            source.push_str("// filler\n");
        }
        source.push_str("const label = \"Confirm booking\";\n");
        let windows = locate_selection(&source, &hint("bg-rose-500 p-6", "Confirm booking"));
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].reason, "text match");
        assert!(windows[1].excerpt.contains("Confirm booking"));
    }

    #[test]
    fn truncated_text_still_matches_as_prefix() {
        let long_text = "a".repeat(MAX_TEXT_SEARCH_LEN + 20);
        let mut source = String::from("// filler\n");
        source.push_str(&format!("const label = \"{long_text}\";\n"));
        let h = SelectionHint {
            tag: "button".into(),
            text: Some(long_text),
            ..Default::default()
        };
        let windows = locate_selection(&source, &h);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].reason, "text match");
    }

    #[test]
    fn no_signal_returns_empty() {
        let source = "fn main() {}\n";
        assert!(locate_selection(source, &SelectionHint::default()).is_empty());
        assert!(locate_selection(source, &hint("zz-9999", "absent text")).is_empty());
        assert!(locate_selection("", &hint("bg-sky-500", "x")).is_empty());
    }

    #[test]
    fn windows_carry_line_numbers() {
        let source = "a\nb\n<p className=\"text-slate-900\">x</p>\nd\n";
        let h = SelectionHint {
            tag: "p".into(),
            class_name: Some("text-slate-900".into()),
            ..Default::default()
        };
        let windows = locate_selection(source, &h);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start_line, 1);
        assert!(windows[0].excerpt.contains("   3: <p"));
    }
}
