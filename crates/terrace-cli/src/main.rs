use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use terrace_contracts::chat::{parse_intent, ImageUpload, Message, MessageKind, CHAT_HELP_COMMANDS};
use terrace_engine::{
    initialize_chat_model, knowledge_path_from_env, load_dotenv, load_knowledge, ChatModel,
    ConversationSession, DryrunChatModel, ModelConfig, SessionError,
};

#[derive(Debug, Parser)]
#[command(
    name = "terrace",
    version,
    about = "Urban terrace farming assistant backed by a watsonx.ai vision model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat; attach photos with /image.
    Chat(ChatArgs),
    /// Send a single message and print the reply.
    Ask(AskArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Knowledge text injected into every request.
    #[arg(long)]
    knowledge: Option<PathBuf>,
    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Overrides WATSONX_MODEL_ID.
    #[arg(long)]
    model: Option<String>,
    /// Answer locally without contacting watsonx.ai.
    #[arg(long)]
    dryrun: bool,
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    session: SessionArgs,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("terrace error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    load_dotenv();
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Ask(args) => run_ask(args),
    }
}

fn open_session(args: &SessionArgs) -> Result<ConversationSession> {
    let mut config = ModelConfig::from_env();
    if let Some(model) = args.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        config.model_id = model.to_string();
    }
    config.timeout = Duration::from_secs(args.timeout_secs.max(1));

    let model: Arc<dyn ChatModel> = if args.dryrun {
        Arc::new(DryrunChatModel::new(config.model_id.clone()))
    } else {
        let client = initialize_chat_model(&config).context(
            "chatbot not initialized; check your watsonx.ai credentials and project ID",
        )?;
        log::info!("using watsonx chat model {}", config.model_id);
        client
    };

    let session = ConversationSession::new(model, session_knowledge(args));
    match &args.events {
        Some(path) => session
            .with_event_log(path)
            .with_context(|| format!("failed to open event log {}", path.display())),
        None => Ok(session),
    }
}

/// The loader already logs a warning when the file is unusable; the session then runs without it.
fn session_knowledge(args: &SessionArgs) -> String {
    let path = args
        .knowledge
        .clone()
        .unwrap_or_else(knowledge_path_from_env);
    load_knowledge(&path).text
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = open_session(&args.session)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Terrace chat started with {}. Type a message, or /help for commands.",
        session.model_id()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);

        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Anything else is sent as a message, with the attached image if one is pending.");
            }
            "attach_image" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    println!("/image requires a path");
                    continue;
                };
                match ImageUpload::from_path(&PathBuf::from(&path)) {
                    Ok(upload) => {
                        let name = upload.name().to_string();
                        match session.attach_image(upload) {
                            Some(previous) => println!(
                                "Image attached: {name} (replaces {}). Your next message will include it.",
                                previous.name()
                            ),
                            None => {
                                println!("Image attached: {name}. Your next message will include it.")
                            }
                        }
                    }
                    Err(err) => println!("Image not attached: {err:#}"),
                }
            }
            "clear_image" => match session.clear_image() {
                Some(image) => println!("Image cleared: {}", image.name()),
                None => println!("No image pending."),
            },
            "history" => {
                if session.history().is_empty() {
                    println!("No messages yet.");
                }
                for message in session.history() {
                    println!("{}\n", render_message(message));
                }
            }
            "status" => {
                println!("Session: {}", session.id());
                println!("Model: {}", session.model_id());
                println!("Turns: {}", session.turns());
                println!(
                    "Knowledge: {} chars",
                    session.knowledge().chars().count()
                );
                println!(
                    "Pending image: {}",
                    session
                        .pending_image()
                        .map(|image| image.name().to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
            }
            "quit" => break,
            "send" => {
                let prompt = intent.prompt.unwrap_or_default();
                println!("Thinking...");
                match session.submit(&prompt) {
                    Ok(outcome) => println!("{}\n", render_message(&outcome.reply)),
                    Err(SessionError::ImageDecode(err)) => {
                        println!("Error encoding image: {err}. Message not sent; attach a PNG or JPEG and try again.");
                    }
                    Err(SessionError::EmptyPrompt) => {}
                }
            }
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            other => println!("Unhandled action {other}"),
        }
    }

    Ok(())
}

fn run_ask(args: AskArgs) -> Result<i32> {
    let mut session = open_session(&args.session)?;
    if let Some(path) = &args.image {
        session.attach_image(ImageUpload::from_path(path)?);
    }
    let outcome = session
        .submit(&args.prompt)
        .context("message not sent")?;
    println!("{}", outcome.reply.text_content().unwrap_or_default());
    Ok(if outcome.is_error() { 1 } else { 0 })
}

fn render_message(message: &Message) -> String {
    let label = message.role().as_str();
    let image_line = message
        .image_content()
        .map(|image| format!("[image: {}]", image.name()));
    let text = message.text_content().unwrap_or_default();
    match (message.kind(), image_line) {
        (MessageKind::Multimodal, Some(image)) => format!("{label}: {image}\n{text}"),
        (MessageKind::Image, Some(image)) => format!("{label}: {image}"),
        _ => format!("{label}: {text}"),
    }
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use serde_json::json;
    use terrace_contracts::chat::{ImageUpload, Message, Role};

    use super::{render_message, session_knowledge, value_as_non_empty_string, Cli, Command};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_parses_prompt_image_and_dryrun() {
        let cli = Cli::parse_from([
            "terrace",
            "ask",
            "--prompt",
            "What soil should I use?",
            "--image",
            "terrace.png",
            "--dryrun",
        ]);
        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.prompt, "What soil should I use?");
                assert_eq!(
                    args.image.as_deref().and_then(|path| path.to_str()),
                    Some("terrace.png")
                );
                assert!(args.session.dryrun);
                assert_eq!(args.session.timeout_secs, 120);
            }
            Command::Chat(_) => panic!("expected ask"),
        }
    }

    fn chat_session_args(extra: &[&str]) -> super::SessionArgs {
        let mut argv = vec!["terrace", "chat", "--dryrun"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Chat(args) => args.session,
            Command::Ask(_) => panic!("expected chat"),
        }
    }

    #[test]
    fn knowledge_flag_selects_file_and_missing_file_yields_empty_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, "Mint needs its own pot.\n")?;
        let path_arg = path.display().to_string();
        assert_eq!(
            session_knowledge(&chat_session_args(&["--knowledge", &path_arg])),
            "Mint needs its own pot.\n"
        );

        let missing = temp.path().join("absent.txt").display().to_string();
        assert_eq!(
            session_knowledge(&chat_session_args(&["--knowledge", &missing])),
            ""
        );
        Ok(())
    }

    #[test]
    fn render_messages_by_kind() {
        let upload = ImageUpload::new("terrace.png", vec![0_u8; 4]);
        assert_eq!(
            render_message(&Message::user("What grows here?", Some(upload.clone()))),
            "user: [image: terrace.png]\nWhat grows here?"
        );
        assert_eq!(
            render_message(&Message::image(Role::User, upload)),
            "user: [image: terrace.png]"
        );
        assert_eq!(
            render_message(&Message::assistant("Tomatoes.")),
            "assistant: Tomatoes."
        );
        assert_eq!(
            render_message(&Message::assistant_error("timeout")),
            "assistant: Error: timeout"
        );
    }

    #[test]
    fn non_empty_string_helper_trims() {
        assert_eq!(
            value_as_non_empty_string(Some(&json!("  a.png "))),
            Some("a.png".to_string())
        );
        assert_eq!(value_as_non_empty_string(Some(&json!("   "))), None);
        assert_eq!(value_as_non_empty_string(Some(&json!(3))), None);
        assert_eq!(value_as_non_empty_string(None), None);
    }
}
