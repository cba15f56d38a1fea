use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Image,
    Multimodal,
}

/// Raw bytes of an image the user supplied, plus the name it was uploaded under.
///
/// The bytes are not inspected here; decoding happens when the image is sent.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    name: String,
    bytes: Arc<[u8]>,
}

impl ImageUpload {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("image")
            .to_string();
        Ok(Self::new(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MessageContent {
    Text(String),
    Image(ImageUpload),
    Multimodal { text: String, image: ImageUpload },
}

/// One entry of the conversation history. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: MessageContent,
    is_error: bool,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            is_error: false,
        }
    }

    pub fn image(role: Role, image: ImageUpload) -> Self {
        Self {
            role,
            content: MessageContent::Image(image),
            is_error: false,
        }
    }

    pub fn multimodal(role: Role, text: impl Into<String>, image: ImageUpload) -> Self {
        Self {
            role,
            content: MessageContent::Multimodal {
                text: text.into(),
                image,
            },
            is_error: false,
        }
    }

    pub fn user(text: impl Into<String>, image: Option<ImageUpload>) -> Self {
        match image {
            Some(image) => Self::multimodal(Role::User, text, image),
            None => Self::text(Role::User, text),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Assistant turn recording a failed model call. Never a model answer.
    pub fn assistant_error(description: impl fmt::Display) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(format!("Error: {description}")),
            is_error: true,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn kind(&self) -> MessageKind {
        match self.content {
            MessageContent::Text(_) => MessageKind::Text,
            MessageContent::Image(_) => MessageKind::Image,
            MessageContent::Multimodal { .. } => MessageKind::Multimodal,
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) | MessageContent::Multimodal { text, .. } => Some(text),
            MessageContent::Image(_) => None,
        }
    }

    pub fn image_content(&self) -> Option<&ImageUpload> {
        match &self.content {
            MessageContent::Image(image) | MessageContent::Multimodal { image, .. } => Some(image),
            MessageContent::Text(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> ImageUpload {
        ImageUpload::new("terrace.png", vec![1_u8, 2, 3])
    }

    #[test]
    fn kind_matches_content_slots() {
        let text = Message::text(Role::User, "hello");
        assert_eq!(text.kind(), MessageKind::Text);
        assert_eq!(text.text_content(), Some("hello"));
        assert!(text.image_content().is_none());

        let image = Message::image(Role::User, upload());
        assert_eq!(image.kind(), MessageKind::Image);
        assert!(image.text_content().is_none());
        assert_eq!(image.image_content().map(ImageUpload::name), Some("terrace.png"));

        let both = Message::multimodal(Role::User, "look", upload());
        assert_eq!(both.kind(), MessageKind::Multimodal);
        assert_eq!(both.text_content(), Some("look"));
        assert_eq!(both.image_content().map(ImageUpload::len), Some(3));
    }

    #[test]
    fn user_constructor_picks_kind_from_image() {
        assert_eq!(Message::user("hi", None).kind(), MessageKind::Text);
        assert_eq!(
            Message::user("hi", Some(upload())).kind(),
            MessageKind::Multimodal
        );
    }

    #[test]
    fn assistant_error_is_tagged_and_prefixed() {
        let message = Message::assistant_error("model unavailable");
        assert_eq!(message.role(), Role::Assistant);
        assert!(message.is_error());
        assert_eq!(message.text_content(), Some("Error: model unavailable"));
        assert!(!Message::assistant("fine").is_error());
    }

    #[test]
    fn upload_from_path_uses_file_name() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("balcony.jpg");
        std::fs::write(&path, b"not really a jpeg")?;
        let upload = ImageUpload::from_path(&path)?;
        assert_eq!(upload.name(), "balcony.jpg");
        assert_eq!(upload.bytes(), b"not really a jpeg");
        assert!(ImageUpload::from_path(&temp.path().join("missing.png")).is_err());
        Ok(())
    }
}
