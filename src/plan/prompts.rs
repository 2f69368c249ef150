//! Instruction prompt assembly for plan requests.
//!
//! One instruction message carries everything the model needs: the fixed
//! rule set, the context excerpts from the source file, and the selection
//! block. Rendered markup and actual source are labeled explicitly so the
//! model never copies attribute spellings from the rendered DOM back into
//! the file.

use crate::context::ContextBlock;
use crate::locator::{SelectionHint, SourceWindow};

/// Fixed rule set prepended to every plan request.
pub const PATCH_RULES: &str = "\
You edit a project source file by producing a patch plan.

Rules:
- Respond with a single JSON object only — no prose, no code fences.
- The object has one field: \"changes\", an array of patch changes.
- Each change has a \"patchType\" of exactly one of: \"replace-snippet\",
  \"replace\", \"insert\", \"style-update\".
- For \"replace-snippet\", \"match\" must be a VERBATIM substring of the
  actual source shown below — copy it exactly, including whitespace.
- Prefer minimal targeted edits (replace-snippet, style-update) over a
  whole-file \"replace\".
- Every change carries \"filePath\" (the relative path given below) and a
  short \"description\" of the edit.";

/// Assemble the instruction message for one plan request.
pub fn build_instruction(
    file_path: &str,
    context: &ContextBlock,
    hint: Option<&SelectionHint>,
    source_windows: &[SourceWindow],
) -> String {
    let mut sections: Vec<String> = vec![PATCH_RULES.to_owned()];

    sections.push(format!("File path: {file_path}"));

    sections.push(render_context(context));

    if let Some(hint) = hint {
        sections.push(render_selection(hint, source_windows));
    }

    sections.join("\n\n")
}

fn render_context(context: &ContextBlock) -> String {
    let mut out = String::new();
    if context.has_matches {
        out.push_str("Relevant excerpts of the ACTUAL SOURCE (verbatim):\n");
        for (idx, excerpt) in context.excerpts.iter().enumerate() {
            out.push_str(&format!(
                "\n--- excerpt {} (matched: {}) ---\n{}\n",
                idx + 1,
                excerpt.matched_terms.join(", "),
                excerpt.text
            ));
        }
    } else {
        out.push_str("Full ACTUAL SOURCE of the file (verbatim");
        if context.truncated {
            out.push_str(", truncated at the context cap");
        }
        out.push_str("):\n\n");
        if let Some(excerpt) = context.excerpts.first() {
            out.push_str(&excerpt.text);
        }
    }
    out
}

fn render_selection(hint: &SelectionHint, source_windows: &[SourceWindow]) -> String {
    let mut out = String::from(
        "The user selected this element in the preview. The fields below are \
         RENDERED OUTPUT — NOT SOURCE. Never copy attribute values from them; \
         match against the actual source excerpts instead.\n",
    );
    out.push_str(&format!("- tag: {}\n", hint.tag));
    if let Some(id) = &hint.id {
        out.push_str(&format!("- id: {id}\n"));
    }
    if let Some(class_name) = &hint.class_name {
        out.push_str(&format!("- class: {class_name}\n"));
    }
    if let Some(text) = &hint.text {
        out.push_str(&format!("- visible text: {text}\n"));
    }
    if let Some(outer) = &hint.outer_html {
        out.push_str(&format!("- rendered markup: {outer}\n"));
    }

    if !source_windows.is_empty() {
        out.push_str(
            "\nBest-guess authoring site in the ACTUAL SOURCE (line-numbered, verbatim):\n",
        );
        for window in source_windows {
            out.push_str(&format!("\n[{}]\n{}\n", window.reason, window.excerpt));
        }
    }
    out
}
