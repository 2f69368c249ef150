//! Patch application engine + linear undo/redo history.
//!
//! [`apply_to_content`] is a pure function: it runs every change of a plan
//! in array order against a scratch copy and only hands back the result if
//! the whole batch succeeded. The caller commits the result by pushing a
//! [`Version`] onto the project's [`History`] — so a mid-batch failure can
//! never leave a file half-mutated.
//!
//! History is strictly linear: a fresh apply after an undo truncates the
//! redo tail. Branching history is explicitly not supported.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PatchChange, PatchError, PatchPlan};

/// Marker comment an authored page may place to pin the `insert` anchor.
/// Without it, inserts append at end of file.
const INSERT_ANCHOR: &str = "islad:insert";

// ─── Applied changes ──────────────────────────────────────────────────────────

/// One change that was actually applied, plus where it landed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedChange {
    #[serde(flatten)]
    pub change: PatchChange,
    /// False when a style-update could not be statically resolved against
    /// the source and is left to live-preview style injection instead.
    pub source_patched: bool,
}

impl AppliedChange {
    /// Whether the live preview can patch its DOM for this change without a
    /// full reload. Whole-file replaces and inserts restructure the page,
    /// so they force the reload fallback.
    pub fn preview_patchable(&self) -> bool {
        matches!(
            self.change,
            PatchChange::ReplaceSnippet { .. } | PatchChange::StyleUpdate { .. }
        )
    }
}

// ─── Batch application ────────────────────────────────────────────────────────

/// Outcome of applying a full plan to one file's content.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub content: String,
    pub applied: Vec<AppliedChange>,
}

/// Apply every change of `plan` in order against `content`.
///
/// All-or-nothing: the first failing change aborts the batch and the
/// original content is untouched (the caller still holds it). Every change
/// in one plan must target the same file — multi-file transactions are out
/// of scope by design.
pub fn apply_to_content(content: &str, plan: &PatchPlan) -> Result<ApplyResult, PatchError> {
    if let Some(first) = plan.changes.first() {
        if let Some(stray) = plan
            .changes
            .iter()
            .find(|c| c.file_path() != first.file_path())
        {
            return Err(PatchError::Schema(format!(
                "plan targets multiple files ({:?} and {:?}) — one file per apply",
                first.file_path(),
                stray.file_path()
            )));
        }
    }

    let mut scratch = content.to_owned();
    let mut applied = Vec::with_capacity(plan.changes.len());

    for change in &plan.changes {
        let (next, source_patched) = apply_change(&scratch, change)?;
        scratch = next;
        applied.push(AppliedChange {
            change: change.clone(),
            source_patched,
        });
    }

    Ok(ApplyResult {
        content: scratch,
        applied,
    })
}

/// Apply one change. Returns the new content and whether the source text
/// itself was modified.
fn apply_change(content: &str, change: &PatchChange) -> Result<(String, bool), PatchError> {
    match change {
        PatchChange::ReplaceSnippet { snippet, content: replacement, .. } => {
            let first = content
                .find(snippet.as_str())
                .ok_or_else(|| PatchError::MatchNotFound(preview_of(snippet)))?;
            // First-match policy. A second occurrence is latent ambiguity —
            // flag it so operators can see it, but still apply.
            if content[first + snippet.len()..].contains(snippet.as_str()) {
                warn!(
                    snippet = %preview_of(snippet),
                    "replace-snippet match occurs more than once — replacing first occurrence only"
                );
            }
            let mut next = String::with_capacity(content.len() + replacement.len());
            next.push_str(&content[..first]);
            next.push_str(replacement);
            next.push_str(&content[first + snippet.len()..]);
            Ok((next, true))
        }
        PatchChange::Replace { content: replacement, .. } => {
            Ok((replacement.clone(), true))
        }
        PatchChange::Insert { content: insertion, .. } => {
            // Insert before the anchor marker when the page declares one,
            // otherwise append at end of file. Never a silent no-op.
            let next = match content.find(INSERT_ANCHOR) {
                Some(marker) => {
                    let line_start = content[..marker].rfind('\n').map_or(0, |p| p + 1);
                    let mut next =
                        String::with_capacity(content.len() + insertion.len() + 1);
                    next.push_str(&content[..line_start]);
                    next.push_str(insertion);
                    if !insertion.ends_with('\n') {
                        next.push('\n');
                    }
                    next.push_str(&content[line_start..]);
                    next
                }
                None => {
                    let mut next =
                        String::with_capacity(content.len() + insertion.len() + 1);
                    next.push_str(content);
                    if !content.ends_with('\n') {
                        next.push('\n');
                    }
                    next.push_str(insertion);
                    next
                }
            };
            Ok((next, true))
        }
        PatchChange::StyleUpdate { target_selector, css_props, .. } => {
            match patch_style_attribute(content, target_selector, css_props) {
                Some(next) => Ok((next, true)),
                None => {
                    debug!(
                        selector = %target_selector,
                        "style-update selector not statically resolvable — deferring to preview injection"
                    );
                    Ok((content.to_owned(), false))
                }
            }
        }
    }
}

fn preview_of(snippet: &str) -> String {
    const MAX: usize = 80;
    if snippet.len() <= MAX {
        snippet.to_owned()
    } else {
        let cut = snippet
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}…", &snippet[..cut])
    }
}

// ─── Static style resolution ──────────────────────────────────────────────────

static ID_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"id\s*=\s*["']([^"']+)["']"#).expect("id regex"));
static CLASS_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"class(?:Name)?\s*=\s*["']([^"']*)["']"#).expect("class regex"));
static STYLE_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"style\s*=\s*["']([^"']*)["']"#).expect("style regex"));

/// Try to resolve `selector` against the raw source and merge `css_props`
/// into the matched element's `style` attribute.
///
/// Handles the simple selector forms a visual editor emits: `#id`,
/// `.class`, and a bare tag name. Anything else (descendant combinators,
/// pseudo-classes) is not statically resolvable on raw text.
fn patch_style_attribute(
    content: &str,
    selector: &str,
    css_props: &std::collections::BTreeMap<String, String>,
) -> Option<String> {
    // The attribute arms land inside the tag and walk back to its opener;
    // a bare tag match *is* the opener.
    let tag_start = match selector.as_bytes().first()? {
        b'#' => {
            let id = &selector[1..];
            let attr_pos = ID_ATTR
                .captures_iter(content)
                .find(|c| &c[1] == id)
                .map(|c| c.get(0).expect("whole match").start())?;
            content[..attr_pos].rfind('<')?
        }
        b'.' => {
            let class = &selector[1..];
            let attr_pos = CLASS_ATTR
                .captures_iter(content)
                .find(|c| c[1].split_whitespace().any(|t| t == class))
                .map(|c| c.get(0).expect("whole match").start())?;
            content[..attr_pos].rfind('<')?
        }
        _ => {
            if !selector.chars().all(|c| c.is_ascii_alphanumeric()) {
                return None;
            }
            content.find(&format!("<{selector}"))?
        }
    };
    let tag_end_rel = content[tag_start..].find('>')?;
    let tag_end = tag_start + tag_end_rel;
    let tag = &content[tag_start..=tag_end];

    let new_tag = match STYLE_ATTR.captures(tag) {
        Some(existing) => {
            let attr = existing.get(1).expect("style value");
            let mut style = attr.as_str().trim_end_matches(';').to_owned();
            for (prop, value) in css_props {
                if !style.is_empty() {
                    style.push_str("; ");
                }
                style.push_str(&format!("{prop}: {value}"));
            }
            let mut t = tag.to_owned();
            t.replace_range(existing.get(1).expect("style value").range(), &style);
            t
        }
        None => {
            let style: Vec<String> = css_props
                .iter()
                .map(|(p, v)| format!("{p}: {v}"))
                .collect();
            let insert_at = if tag.ends_with("/>") {
                tag.len() - 2
            } else {
                tag.len() - 1
            };
            let mut t = tag.to_owned();
            t.insert_str(insert_at, &format!(" style=\"{}\"", style.join("; ")));
            t
        }
    };

    let mut next = String::with_capacity(content.len() + new_tag.len());
    next.push_str(&content[..tag_start]);
    next.push_str(&new_tag);
    next.push_str(&content[tag_end + 1..]);
    Some(next)
}

// ─── Version + history ────────────────────────────────────────────────────────

/// One immutable snapshot of a project file. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub applied_changes: Vec<AppliedChange>,
    pub created_at: DateTime<Utc>,
}

impl Version {
    pub fn seed(file_path: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: file_path.to_owned(),
            content: content.to_owned(),
            applied_changes: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Linear undo/redo stack with an explicit cursor.
///
/// Invariants: never empty once seeded; `cursor` always indexes a valid
/// version; undo past index 0 and redo past the top are no-ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    versions: Vec<Version>,
    cursor: usize,
}

impl History {
    /// Start a history with the project's seed snapshot at the cursor.
    pub fn seeded(file_path: &str, content: &str) -> Self {
        Self {
            versions: vec![Version::seed(file_path, content)],
            cursor: 0,
        }
    }

    pub fn current(&self) -> &Version {
        &self.versions[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.versions.len()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Commit an apply result as a new version. Truncates any redo tail
    /// first, then prunes the oldest snapshots past `max_versions`.
    pub fn push(&mut self, file_path: &str, result: ApplyResult, max_versions: usize) -> &Version {
        self.versions.truncate(self.cursor + 1);
        self.versions.push(Version {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: file_path.to_owned(),
            content: result.content,
            applied_changes: result.applied,
            created_at: Utc::now(),
        });
        self.cursor = self.versions.len() - 1;

        if max_versions > 0 && self.versions.len() > max_versions {
            let overflow = self.versions.len() - max_versions;
            self.versions.drain(..overflow);
            self.cursor -= overflow;
        }

        self.current()
    }

    /// Move the cursor back one version. No-op at the bottom.
    pub fn undo(&mut self) -> &Version {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.current()
    }

    /// Move the cursor forward one version. No-op at the top.
    pub fn redo(&mut self) -> &Version {
        if self.cursor + 1 < self.versions.len() {
            self.cursor += 1;
        }
        self.current()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Restore a persisted history. Clamps an out-of-range cursor rather
    /// than trusting stored data blindly.
    pub fn restore(versions: Vec<Version>, cursor: usize) -> Option<Self> {
        if versions.is_empty() {
            return None;
        }
        let cursor = cursor.min(versions.len() - 1);
        Some(Self { versions, cursor })
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
