//! Rendering tool results for the model, with or without images.
//!
//! A tool result that carries an image is replayed differently depending
//! on whether the target model can look at pictures: vision models get the
//! image as a separate content part, everyone else gets a text note saying
//! the image was shown to the user. The base64 payload never lands in the
//! text either way.

use opencodex_core::message::{ContentPart, ImageUrl, TurnContent};
use opencodex_core::session::{ActionMetadata, AgentAction};

/// Bump whenever [`VISION_RULES`] changes.
pub const VISION_TABLE_VERSION: u32 = 3;

/// Appended to image results for models that cannot see them.
pub const NON_VISION_IMAGE_NOTE: &str = "\n\nNote: Image content cannot be analyzed by this model, but it is displayed to the user in the chat interface.";

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Prefix(&'static str),
    Contains(&'static str),
}

impl Pattern {
    fn matches(self, model: &str) -> bool {
        match self {
            Self::Prefix(p) => model.starts_with(p),
            Self::Contains(p) => model.contains(p),
        }
    }
}

/// Ordered capability rules. The first matching rule decides.
const VISION_RULES: &[(Pattern, bool)] = &[
    // OpenAI
    (Pattern::Prefix("gpt-4o"), true),
    (Pattern::Prefix("gpt-4-turbo"), true),
    (Pattern::Prefix("gpt-4-vision"), true),
    (Pattern::Prefix("gpt-4.1"), true),
    (Pattern::Prefix("gpt-4.5"), true),
    (Pattern::Prefix("gpt-5"), true),
    (Pattern::Prefix("gpt-4"), false),
    (Pattern::Prefix("gpt-3.5"), false),
    (Pattern::Prefix("o1-mini"), false),
    (Pattern::Prefix("o1"), true),
    (Pattern::Prefix("o3"), true),
    (Pattern::Prefix("o4"), true),
    // Anthropic
    (Pattern::Prefix("claude-instant"), false),
    (Pattern::Prefix("claude-v1"), false),
    (Pattern::Prefix("claude-2"), false),
    (Pattern::Prefix("claude-3"), true),
    (Pattern::Prefix("claude-sonnet"), true),
    (Pattern::Prefix("claude-opus"), true),
    (Pattern::Prefix("claude-haiku"), true),
    (Pattern::Prefix("claude-4"), true),
    // Google
    (Pattern::Prefix("palm"), false),
    (Pattern::Prefix("gemini-1.0"), false),
    (Pattern::Prefix("gemini-1.5"), true),
    (Pattern::Prefix("gemini-2"), true),
    (Pattern::Prefix("gemini-3"), true),
    // Open-weight multimodal
    (Pattern::Contains("llava"), true),
    (Pattern::Contains("pixtral"), true),
    (Pattern::Contains("qwen-vl"), true),
    (Pattern::Contains("qwen2-vl"), true),
    (Pattern::Contains("qwen2.5-vl"), true),
    (Pattern::Contains("-vl"), true),
    (Pattern::Contains("vision"), true),
];

/// Whether `model` accepts image content parts.
///
/// Case-insensitive. A provider namespace such as `openai/` is ignored.
/// Unknown models are assumed text-only.
pub fn supports_vision(model: &str) -> bool {
    let lowered = model.trim().to_ascii_lowercase();
    let id = lowered.rsplit('/').next().unwrap_or(&lowered);
    VISION_RULES
        .iter()
        .find(|(pattern, _)| pattern.matches(id))
        .is_some_and(|(_, capable)| *capable)
}

fn status_line(success: bool, output: &str) -> String {
    let status = if success { "SUCCESS" } else { "FAILURE" };
    format!("[{status}] {output}")
}

/// Renders tool results as turn content for one target model.
#[derive(Debug, Clone)]
pub struct VisionContentBuilder {
    vision: bool,
}

impl VisionContentBuilder {
    pub fn new(model: &str) -> Self {
        Self {
            vision: supports_vision(model),
        }
    }

    pub fn is_vision(&self) -> bool {
        self.vision
    }

    /// Render one tool outcome.
    pub fn render(
        &self,
        success: bool,
        output: &str,
        metadata: Option<&ActionMetadata>,
    ) -> TurnContent {
        let text = status_line(success, output);
        let Some(image) = metadata.and_then(ActionMetadata::image) else {
            return TurnContent::Text(text);
        };

        if self.vision {
            TurnContent::Parts(vec![
                ContentPart::Text { text },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.image_data.clone(),
                    },
                },
            ])
        } else {
            TurnContent::Text(text + NON_VISION_IMAGE_NOTE)
        }
    }

    /// Render a completed action. Returns `None` while it is still running.
    pub fn render_action(&self, action: &AgentAction) -> Option<TurnContent> {
        if !action.status.is_terminal() {
            return None;
        }
        let (success, output) = action.result()?;
        Some(self.render(success, output, action.action_metadata.as_ref()))
    }
}
