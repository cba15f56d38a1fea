pub const SECTION_SEPARATOR: &str = "\n\n";
pub const KNOWLEDGE_LABEL: &str = "Knowledge:\n";
pub const USER_LABEL: &str = "User: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Base64Png,
}

impl ImageEncoding {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Base64Png => "image/png",
        }
    }

    pub fn data_url(self, data: &str) -> String {
        format!("data:{};base64,{data}", self.mime())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDetail {
    High,
}

impl ImageDetail {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
        }
    }
}

/// One part of an outgoing user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        encoding: ImageEncoding,
        data: String,
        detail: ImageDetail,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn png_base64(data: impl Into<String>) -> Self {
        Self::Image {
            encoding: ImageEncoding::Base64Png,
            data: data.into(),
            detail: ImageDetail::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    parts: Vec<ContentPart>,
}

impl ChatRequest {
    pub fn new(parts: Vec<ContentPart>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    pub fn text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::Image { .. } => None,
        })
    }

    pub fn image_data(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            ContentPart::Image { data, .. } => Some(data.as_str()),
            ContentPart::Text { .. } => None,
        })
    }

    pub fn is_multimodal(&self) -> bool {
        self.image_data().is_some()
    }
}

/// Builds the single text part sent with every turn: instruction, knowledge, then the user text.
pub fn compose_prompt_text(instruction: &str, knowledge: &str, user_text: &str) -> String {
    let mut text = String::with_capacity(
        instruction.len()
            + knowledge.len()
            + user_text.len()
            + KNOWLEDGE_LABEL.len()
            + USER_LABEL.len()
            + SECTION_SEPARATOR.len() * 2,
    );
    text.push_str(instruction);
    text.push_str(SECTION_SEPARATOR);
    text.push_str(KNOWLEDGE_LABEL);
    text.push_str(knowledge);
    text.push_str(SECTION_SEPARATOR);
    text.push_str(USER_LABEL);
    text.push_str(user_text);
    text
}

pub fn compose_request(
    instruction: &str,
    knowledge: &str,
    user_text: &str,
    image_base64: Option<String>,
) -> ChatRequest {
    let mut parts = vec![ContentPart::text(compose_prompt_text(
        instruction,
        knowledge,
        user_text,
    ))];
    if let Some(data) = image_base64 {
        parts.push(ContentPart::png_base64(data));
    }
    ChatRequest::new(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_sections_appear_in_order() {
        let text = compose_prompt_text(
            "Be a helpful gardener.",
            "Tomatoes need six hours of sun.",
            "What soil should I use?",
        );
        assert_eq!(
            text,
            "Be a helpful gardener.\n\nKnowledge:\nTomatoes need six hours of sun.\n\nUser: What soil should I use?"
        );
    }

    #[test]
    fn empty_knowledge_keeps_label() {
        let text = compose_prompt_text("guide", "", "hi");
        assert_eq!(text, "guide\n\nKnowledge:\n\n\nUser: hi");
    }

    #[test]
    fn png_data_url_carries_mime_prefix() {
        assert_eq!(
            ImageEncoding::Base64Png.data_url("aGVsbG8="),
            "data:image/png;base64,aGVsbG8="
        );
    }

    #[test]
    fn request_without_image_is_text_only() {
        let request = compose_request("guide", "facts", "hi", None);
        assert_eq!(request.parts().len(), 1);
        assert!(!request.is_multimodal());
        assert!(request.text().unwrap_or_default().ends_with("User: hi"));
    }

    #[test]
    fn request_with_image_appends_high_detail_png_part() {
        let request = compose_request("guide", "facts", "hi", Some("aGVsbG8=".to_string()));
        assert!(request.is_multimodal());
        assert_eq!(
            request.parts()[1],
            ContentPart::Image {
                encoding: ImageEncoding::Base64Png,
                data: "aGVsbG8=".to_string(),
                detail: ImageDetail::High,
            }
        );
        assert!(matches!(request.parts()[0], ContentPart::Text { .. }));
    }
}
