mod client;
mod config;
mod knowledge;
mod normalizer;
mod session;
mod watsonx;

pub use client::{
    initialize_chat_model, validate_config, ChatModel, ClientCache, ClientInitError,
    DryrunChatModel, RemoteInvocationError,
};
pub use config::{
    knowledge_path_from_env, load_dotenv, DecodingMethod, GenerationParams, ModelConfig,
    API_KEY_ENV, DEFAULT_IAM_URL, DEFAULT_MODEL_ID, DEFAULT_SERVICE_URL, DEFAULT_TIMEOUT,
    IAM_URL_ENV, KNOWLEDGE_PATH_ENV, MODEL_ID_ENV, PLACEHOLDER_API_KEY, PLACEHOLDER_PROJECT_ID,
    PROJECT_ID_ENV, SERVICE_URL_ENV,
};
pub use knowledge::{load_knowledge, KnowledgeLoad, KnowledgeLoadError, DEFAULT_KNOWLEDGE_PATH};
pub use normalizer::{normalize_image, ImageDecodeError, NormalizedImage};
pub use session::{
    ConversationSession, SessionError, SessionState, TurnOutcome, DEFAULT_INSTRUCTION,
};
pub use watsonx::WatsonxChatModel;
