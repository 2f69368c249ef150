//! Plan request orchestrator.
//!
//! Composes the single instruction message sent to the code-generation
//! model — context excerpts, selection block, fixed rules — and normalizes
//! the conversation history around it. The response comes back as raw
//! text; validation happens separately in [`crate::patch`] so the client
//! can review a plan before anything is applied.

pub mod model;
pub mod prompts;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ModelConfig;
use crate::context::{build_context, ContextConfig};
use crate::locator::{locate_selection, SelectionHint};
use crate::patch::PatchError;

use model::{ModelRequest, PlanModel};

/// Conversation turns older than this are dropped from the request.
pub const MAX_HISTORY_MESSAGES: usize = 12;

// ─── Request types ────────────────────────────────────────────────────────────

/// One conversation turn, as the editor client sends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    #[serde(default)]
    pub content: String,
    /// Inline image URLs / data URLs attached to the turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.images.is_empty()
    }
}

/// The plan-request boundary payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub template_slug: Option<String>,
    #[serde(default)]
    pub selection_hint: Option<SelectionHint>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

// ─── Normalization ────────────────────────────────────────────────────────────

/// Keep the last [`MAX_HISTORY_MESSAGES`] turns, oldest first, dropping
/// any message with no text and no images.
pub fn normalize_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let kept: Vec<ChatMessage> = messages.iter().filter(|m| !m.is_empty()).cloned().collect();
    let skip = kept.len().saturating_sub(MAX_HISTORY_MESSAGES);
    kept.into_iter().skip(skip).collect()
}

/// A vision-capable model variant is required when any surviving message
/// carries images.
pub fn requires_vision(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| !m.images.is_empty())
}

/// True when the conversation has at least one user turn carrying text or
/// images. An image-only turn counts — it still drives a (vision) request.
pub fn has_user_content(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| m.role == "user" && !m.is_empty())
}

/// The latest user turn — the text that drives context building.
pub fn latest_user_text(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user" && !m.content.trim().is_empty())
        .map(|m| m.content.as_str())
}

// ─── Orchestration ────────────────────────────────────────────────────────────

/// Build the instruction, pick the model variant, invoke the backend, and
/// return the raw text response (pre-validation).
pub async fn request_plan(
    backend: &dyn PlanModel,
    model_config: &ModelConfig,
    context_config: &ContextConfig,
    file_path: &str,
    source: &str,
    selection_hint: Option<&SelectionHint>,
    messages: &[ChatMessage],
) -> Result<String, PatchError> {
    let history = normalize_messages(messages);
    let user_text = latest_user_text(&history).unwrap_or_default();

    let context = build_context(source, user_text, selection_hint, context_config);
    let source_windows = selection_hint
        .map(|hint| locate_selection(source, hint))
        .unwrap_or_default();

    let instruction = prompts::build_instruction(file_path, &context, selection_hint, &source_windows);

    let model = if requires_vision(&history) {
        model_config.vision_model.clone()
    } else {
        model_config.text_model.clone()
    };

    info!(
        model = %model,
        excerpts = context.excerpts.len(),
        targeted = context.has_matches,
        windows = source_windows.len(),
        "requesting patch plan"
    );

    // History goes out without its last user turn — that turn is folded
    // into the instruction message via the context block.
    let request = ModelRequest {
        model,
        history,
        instruction,
    };
    backend.generate(&request).await
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.into(),
            content: content.into(),
            images: vec![],
        }
    }

    #[test]
    fn normalization_drops_empty_and_caps_at_twelve() {
        let mut messages = vec![msg("user", "  "), msg("assistant", "")];
        for i in 0..15 {
            messages.push(msg("user", &format!("turn {i}")));
        }
        let normalized = normalize_messages(&messages);
        assert_eq!(normalized.len(), MAX_HISTORY_MESSAGES);
        // Oldest-first order preserved; the newest turns survive.
        assert_eq!(normalized[0].content, "turn 3");
        assert_eq!(normalized.last().unwrap().content, "turn 14");
    }

    #[test]
    fn image_only_message_survives_and_forces_vision() {
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: String::new(),
            images: vec!["data:image/png;base64,AA".into()],
        }];
        let normalized = normalize_messages(&messages);
        assert_eq!(normalized.len(), 1);
        assert!(requires_vision(&normalized));
        assert!(!requires_vision(&[msg("user", "hi")]));
    }

    #[test]
    fn user_content_check_counts_image_only_turns() {
        let image_only = ChatMessage {
            role: "user".into(),
            content: String::new(),
            images: vec!["data:image/png;base64,AA".into()],
        };
        assert!(has_user_content(&[image_only]));
        assert!(has_user_content(&[msg("user", "hi")]));
        assert!(!has_user_content(&[msg("user", "   "), msg("assistant", "reply")]));
        assert!(!has_user_content(&[]));
    }

    #[test]
    fn latest_user_text_skips_assistant_turns() {
        let messages = vec![
            msg("user", "first ask"),
            msg("assistant", "a reply"),
            msg("user", "second ask"),
            msg("assistant", "another reply"),
        ];
        assert_eq!(latest_user_text(&messages), Some("second ask"));
    }

    /// Canned backend that records what it was asked for.
    struct RecordingModel {
        seen: Mutex<Vec<ModelRequest>>,
        reply: String,
    }

    #[async_trait]
    impl PlanModel for RecordingModel {
        async fn generate(&self, request: &ModelRequest) -> Result<String, PatchError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn orchestrator_picks_vision_model_for_images() {
        let backend = RecordingModel {
            seen: Mutex::new(vec![]),
            reply: "{\"changes\":[]}".into(),
        };
        let model_config = ModelConfig::default();
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: "match this screenshot".into(),
            images: vec!["data:image/png;base64,AA".into()],
        }];

        let raw = request_plan(
            &backend,
            &model_config,
            &ContextConfig::default(),
            "app/live/medtrack/page.tsx",
            "<div>source</div>",
            None,
            &messages,
        )
        .await
        .unwrap();

        assert_eq!(raw, "{\"changes\":[]}");
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].model, model_config.vision_model);
        assert!(seen[0].instruction.contains("app/live/medtrack/page.tsx"));
    }

    #[tokio::test]
    async fn orchestrator_embeds_selection_and_source_windows() {
        let backend = RecordingModel {
            seen: Mutex::new(vec![]),
            reply: "ok".into(),
        };
        let source = "<button className=\"bg-sky-500 px-4 py-2\">Take</button>\n";
        let hint = SelectionHint {
            tag: "button".into(),
            class_name: Some("bg-sky-500 px-4 py-2".into()),
            text: Some("Take".into()),
            ..Default::default()
        };

        request_plan(
            &backend,
            &ModelConfig::default(),
            &ContextConfig::default(),
            "p.tsx",
            source,
            Some(&hint),
            &[msg("user", "make the button green")],
        )
        .await
        .unwrap();

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].model, ModelConfig::default().text_model);
        assert!(seen[0].instruction.contains("RENDERED OUTPUT — NOT SOURCE"));
        assert!(seen[0].instruction.contains("bg-sky-500"));
    }
}
