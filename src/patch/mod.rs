//! Patch plan schema + validator.
//!
//! The sole gate between untrusted model output and file mutation. The
//! model responds with free text that *should* contain a JSON object; this
//! module digs the object out, checks every change against the schema
//! invariants, and only then hands a typed [`PatchPlan`] to the engine.
//!
//! Validation is a pure function: no side effects, same input → same
//! output, safe to call repeatedly (the editor client re-validates to
//! preview what Apply will do).

pub mod engine;
pub mod error;

pub use error::PatchError;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Plan types ───────────────────────────────────────────────────────────────

/// A validated, ordered list of edit instructions.
///
/// A plan with zero changes is syntactically valid but semantically inert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchPlan {
    pub changes: Vec<PatchChange>,
}

/// One edit instruction, tagged by `patchType`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "patchType")]
pub enum PatchChange {
    /// Replace the first verbatim occurrence of `match` with `content`.
    #[serde(rename = "replace-snippet")]
    ReplaceSnippet {
        #[serde(rename = "filePath")]
        file_path: String,
        /// Verbatim source substring. Empty content means deletion.
        #[serde(rename = "match")]
        snippet: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Replace the entire file content.
    #[serde(rename = "replace")]
    Replace {
        #[serde(rename = "filePath")]
        file_path: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Insert content at the end-of-file anchor.
    #[serde(rename = "insert")]
    Insert {
        #[serde(rename = "filePath")]
        file_path: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Apply CSS property/value pairs to elements matching `targetSelector`.
    #[serde(rename = "style-update")]
    StyleUpdate {
        #[serde(rename = "filePath")]
        file_path: String,
        #[serde(rename = "targetSelector")]
        target_selector: String,
        #[serde(rename = "cssProps")]
        css_props: std::collections::BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl PatchChange {
    pub fn file_path(&self) -> &str {
        match self {
            PatchChange::ReplaceSnippet { file_path, .. }
            | PatchChange::Replace { file_path, .. }
            | PatchChange::Insert { file_path, .. }
            | PatchChange::StyleUpdate { file_path, .. } => file_path,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            PatchChange::ReplaceSnippet { description, .. }
            | PatchChange::Replace { description, .. }
            | PatchChange::Insert { description, .. }
            | PatchChange::StyleUpdate { description, .. } => description.as_deref(),
        }
    }

    /// Wire name of the variant, as it appears in `patchType`.
    pub fn kind(&self) -> &'static str {
        match self {
            PatchChange::ReplaceSnippet { .. } => "replace-snippet",
            PatchChange::Replace { .. } => "replace",
            PatchChange::Insert { .. } => "insert",
            PatchChange::StyleUpdate { .. } => "style-update",
        }
    }
}

/// Validator output: the typed plan plus non-fatal issues.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub plan: PatchPlan,
    /// Informational only — never blocks apply (e.g. missing description).
    pub warnings: Vec<String>,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

/// Parse and validate a raw model response into a [`ValidatedPlan`].
///
/// Total over arbitrary input: every failure is a typed error, never a
/// panic. Any single invalid change fails the whole plan — partially-valid
/// plans invite partially-applied files.
pub fn parse_patch_plan(raw: &str) -> Result<ValidatedPlan, PatchError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| PatchError::Schema("no JSON object found in model response".into()))?;

    let value: Value = serde_json::from_str(json)
        .map_err(|e| PatchError::Schema(format!("malformed JSON: {e}")))?;

    validate_plan_value(&value)
}

/// Validate an already-parsed JSON value (the apply route receives the raw
/// plan as a JSON body, not a string).
pub fn validate_plan_value(value: &Value) -> Result<ValidatedPlan, PatchError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PatchError::Schema("plan is not a JSON object".into()))?;

    let changes_value = obj
        .get("changes")
        .ok_or_else(|| PatchError::Schema("missing `changes` array".into()))?;
    let changes_array = changes_value
        .as_array()
        .ok_or_else(|| PatchError::Schema("`changes` is not an array".into()))?;

    let mut changes = Vec::with_capacity(changes_array.len());
    let mut warnings = Vec::new();

    for (index, change) in changes_array.iter().enumerate() {
        let validated = validate_change(change, index, &mut warnings)?;
        changes.push(validated);
    }

    Ok(ValidatedPlan {
        plan: PatchPlan { changes },
        warnings,
    })
}

// ─── JSON extraction ──────────────────────────────────────────────────────────

/// Extract the first balanced top-level `{...}` object from free text.
///
/// Models sometimes wrap the JSON in prose or code fences; brace-depth
/// counting finds the object without needing to strip the wrapping.
/// String literals are tracked so braces inside them don't skew the depth.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Per-change validation ────────────────────────────────────────────────────

fn validate_change(
    value: &Value,
    index: usize,
    warnings: &mut Vec<String>,
) -> Result<PatchChange, PatchError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PatchError::Schema(format!("change {index}: not an object")))?;

    let patch_type = obj
        .get("patchType")
        .and_then(Value::as_str)
        .ok_or_else(|| PatchError::Schema(format!("change {index}: missing `patchType`")))?;

    let file_path = require_string(obj, "filePath", index)?;
    check_safe_path(&file_path)?;

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_owned);
    if description.is_none() {
        warnings.push(format!("change {index}: missing description"));
    }

    match patch_type {
        "replace-snippet" => {
            let snippet = require_string(obj, "match", index)?;
            if snippet.is_empty() {
                return Err(PatchError::Schema(format!(
                    "change {index}: `match` must be a non-empty string"
                )));
            }
            // Content may legitimately be empty — that is a deletion.
            let content = obj
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    PatchError::Schema(format!("change {index}: missing `content` string"))
                })?
                .to_owned();
            Ok(PatchChange::ReplaceSnippet {
                file_path,
                snippet,
                content,
                description,
            })
        }
        "replace" | "insert" => {
            let content = require_string(obj, "content", index)?;
            if content.is_empty() {
                return Err(PatchError::Schema(format!(
                    "change {index}: `content` must be non-empty for {patch_type}"
                )));
            }
            if patch_type == "replace" {
                Ok(PatchChange::Replace {
                    file_path,
                    content,
                    description,
                })
            } else {
                Ok(PatchChange::Insert {
                    file_path,
                    content,
                    description,
                })
            }
        }
        "style-update" => {
            let target_selector = require_string(obj, "targetSelector", index)?;
            if target_selector.is_empty() {
                return Err(PatchError::Schema(format!(
                    "change {index}: `targetSelector` must be non-empty"
                )));
            }
            let props = obj
                .get("cssProps")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    PatchError::Schema(format!("change {index}: missing `cssProps` object"))
                })?;
            if props.is_empty() {
                return Err(PatchError::Schema(format!(
                    "change {index}: `cssProps` must not be empty"
                )));
            }
            let mut css_props = std::collections::BTreeMap::new();
            for (key, val) in props {
                let val = val.as_str().ok_or_else(|| {
                    PatchError::Schema(format!(
                        "change {index}: cssProps.{key} must be a string"
                    ))
                })?;
                css_props.insert(key.clone(), val.to_owned());
            }
            Ok(PatchChange::StyleUpdate {
                file_path,
                target_selector,
                css_props,
                description,
            })
        }
        other => Err(PatchError::Schema(format!(
            "change {index}: unknown patchType {other:?}"
        ))),
    }
}

fn require_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    index: usize,
) -> Result<String, PatchError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| PatchError::Schema(format!("change {index}: missing `{field}` string")))
}

/// A file path is safe iff it is non-empty, relative, and never escapes
/// the project root. No silent clamping — unsafe paths reject the plan.
pub fn check_safe_path(path: &str) -> Result<(), PatchError> {
    if path.is_empty() {
        return Err(PatchError::UnsafePath(path.to_owned()));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(PatchError::UnsafePath(path.to_owned()));
    }
    // Windows drive prefixes count as absolute too.
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(PatchError::UnsafePath(path.to_owned()));
    }
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(PatchError::UnsafePath(path.to_owned()));
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
