use std::path::PathBuf;
use std::sync::Arc;

use terrace_contracts::chat::{compose_request, ConversationHistory, ImageUpload, Message};
use terrace_contracts::events::{EventWriter, FailureStage, SessionEvent};
use thiserror::Error;

use crate::client::ChatModel;
use crate::normalizer::{image_digest, normalize_image, ImageDecodeError};

/// Operator guidance placed ahead of the knowledge text in every request.
pub const DEFAULT_INSTRUCTION: &str = include_str!("../resources/instruction.txt");

const REMOTE_ERROR_HINT: &str = "Please ensure your API key, project ID, and model ID are correct and the model supports multimodal input if an image was sent.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyPrompt,
    #[error("image could not be processed: {0}")]
    ImageDecode(#[from] ImageDecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub multimodal: bool,
    pub reply: Message,
}

impl TurnOutcome {
    pub fn is_error(&self) -> bool {
        self.reply.is_error()
    }
}

/// One user's conversation: history, the pending image, and the model it talks to.
pub struct ConversationSession {
    id: String,
    model: Arc<dyn ChatModel>,
    instruction: Arc<str>,
    knowledge: Arc<str>,
    history: ConversationHistory,
    pending_image: Option<ImageUpload>,
    state: SessionState,
    turns: u64,
    events: Option<EventWriter>,
}

impl ConversationSession {
    pub fn new(model: Arc<dyn ChatModel>, knowledge: impl Into<Arc<str>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model,
            instruction: Arc::from(DEFAULT_INSTRUCTION.trim_end()),
            knowledge: knowledge.into(),
            history: ConversationHistory::new(),
            pending_image: None,
            state: SessionState::Idle,
            turns: 0,
            events: None,
        }
    }

    /// Starts writing session events to `path` as JSONL.
    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let events = EventWriter::new(path, self.id.clone());
        events.emit(SessionEvent::SessionStarted {
            model_id: self.model.model_id().to_string(),
            knowledge_chars: self.knowledge.chars().count(),
        })?;
        self.events = Some(events);
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn pending_image(&self) -> Option<&ImageUpload> {
        self.pending_image.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn knowledge(&self) -> &str {
        &self.knowledge
    }

    /// Holds `image` for the next message, returning the one it replaces.
    pub fn attach_image(&mut self, image: ImageUpload) -> Option<ImageUpload> {
        self.emit(SessionEvent::ImageAttached {
            name: image.name().to_string(),
            bytes: image.len(),
            sha256: image_digest(image.bytes()),
        });
        self.pending_image.replace(image)
    }

    pub fn clear_image(&mut self) -> Option<ImageUpload> {
        let cleared = self.pending_image.take();
        if let Some(image) = &cleared {
            self.emit(SessionEvent::ImageCleared {
                name: image.name().to_string(),
            });
        }
        cleared
    }

    /// Sends `text` (plus the pending image, if any) and records both sides of the turn.
    ///
    /// Remote failures become an assistant error message rather than an `Err`. Only an
    /// empty prompt or an undecodable image abort the turn, and neither touches history.
    pub fn submit(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        // The slot is emptied by every send attempt, whatever the outcome.
        let image = self.pending_image.take();
        let encoded = match image.as_ref().map(|image| normalize_image(image.bytes())) {
            Some(Ok(normalized)) => {
                log::debug!(
                    "normalized image to {}x{} PNG",
                    normalized.width(),
                    normalized.height()
                );
                Some(normalized)
            }
            Some(Err(err)) => {
                log::warn!("dropping turn: {err}");
                self.emit(SessionEvent::TurnFailed {
                    turn: self.turns + 1,
                    stage: FailureStage::Image,
                    error: err.to_string(),
                });
                return Err(err.into());
            }
            None => None,
        };

        self.history.push(Message::user(text, image));
        let request = compose_request(
            &self.instruction,
            &self.knowledge,
            text,
            encoded.map(|normalized| normalized.into_base64()),
        );
        let multimodal = request.is_multimodal();

        self.state = SessionState::AwaitingResponse;
        self.turns += 1;
        self.emit(SessionEvent::TurnStarted {
            turn: self.turns,
            multimodal,
            prompt_chars: text.chars().count(),
        });

        let reply = match self.model.invoke(&request) {
            Ok(answer) => {
                self.emit(SessionEvent::TurnFinished {
                    turn: self.turns,
                    reply_chars: answer.chars().count(),
                });
                Message::assistant(answer)
            }
            Err(err) => {
                log::warn!("model call failed: {err}");
                self.emit(SessionEvent::TurnFailed {
                    turn: self.turns,
                    stage: FailureStage::Remote,
                    error: err.to_string(),
                });
                Message::assistant_error(format!(
                    "An error occurred during chat: {err}. {REMOTE_ERROR_HINT}"
                ))
            }
        };

        self.history.push(reply.clone());
        self.state = SessionState::Idle;
        Ok(TurnOutcome { multimodal, reply })
    }

    fn emit(&self, event: SessionEvent) {
        let Some(events) = &self.events else {
            return;
        };
        let kind = event.kind();
        if let Err(err) = events.emit(event) {
            log::warn!("failed to write {kind} event: {err:#}");
        }
    }
}
