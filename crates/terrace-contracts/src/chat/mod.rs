mod command_registry;
mod history;
mod intent_parser;
mod message;
mod request;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use history::ConversationHistory;
pub use intent_parser::{parse_intent, Intent};
pub use message::{ImageUpload, Message, MessageKind, Role};
pub use request::{
    compose_prompt_text, compose_request, ChatRequest, ContentPart, ImageDetail, ImageEncoding,
    KNOWLEDGE_LABEL, SECTION_SEPARATOR, USER_LABEL,
};
