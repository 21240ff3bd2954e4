mod commands;
mod logging;

use anyhow::Context;
use armin_core::export::export_image;
use armin_core::markers::code_blocks;
use armin_core::{
    ConversationEngine, EngineEvent, MessageRole, Phase, PersonaCatalog, RejectReason,
    SendOutcome,
};
use clap::Parser;
use commands::{Command, SettingChange};
use config::{JsonFileStore, KeyValueStore, MemoryStore, PathManager, SettingsStore, load_env_file};
use llm::{GeneratedImage, GeminiGenerationClient, GenerationClient, builtin_models};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Armin AI: an educational chat in your terminal", long_about = None)]
struct Args {
    /// Model id for this and later sessions
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature, clamped to [0, 2]
    #[arg(long)]
    temperature: Option<f32>,

    /// Disable search grounding
    #[arg(long)]
    no_search: bool,

    /// Persona to start with
    #[arg(long)]
    persona: Option<String>,

    /// Store this API key (encrypted) in settings
    #[arg(long)]
    api_key: Option<String>,

    /// Load personas from a JSON file instead of the built-in catalog
    #[arg(long)]
    personas: Option<PathBuf>,

    /// Custom base URL for the Gemini API (e.g., for proxy)
    #[arg(long, env = "GEMINI_BASE_URL")]
    gemini_url: Option<String>,

    /// Keep settings, logs and exports under this directory
    #[arg(long, env = "ARMIN_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

struct AppState {
    engine: ConversationEngine,
    settings: SettingsStore,
    client: Arc<dyn GenerationClient>,
}

enum CommandResult {
    Continue,
    Exit,
}

fn open_store() -> Arc<dyn KeyValueStore> {
    match JsonFileStore::open_default() {
        Ok(store) => {
            info!(path = ?store.path(), "Using settings store");
            Arc::new(store)
        }
        Err(e) => {
            warn!("No settings location ({}), settings will not persist", e);
            Arc::new(MemoryStore::new())
        }
    }
}

fn apply_overrides(settings: &SettingsStore, args: &Args) -> anyhow::Result<()> {
    if let Some(model) = &args.model {
        settings.set_model(model.clone())?;
    }
    if let Some(temperature) = args.temperature {
        settings.set_temperature(temperature)?;
    }
    if args.no_search {
        settings.set_search(false)?;
    }
    if let Some(key) = &args.api_key {
        settings.set_api_key(Some(key.clone()))?;
    }
    Ok(())
}

fn print_status_bar(state: &AppState) {
    let terminal_width: usize = 80;
    let persona = state.engine.persona();
    let settings = state.settings.current();
    let status = format!(
        " {} {} • {} • t={:.1}{} ",
        persona.theme.icon,
        persona.name,
        settings.model,
        settings.temperature,
        if settings.enable_search { " • search" } else { "" }
    );
    let padding = terminal_width.saturating_sub(status.chars().count());
    let left_pad = padding / 2;
    let right_pad = padding - left_pad;

    println!("┌{}┐", "─".repeat(terminal_width - 2));
    println!("│{}{}{}│", " ".repeat(left_pad), status, " ".repeat(right_pad));
    println!("└{}┘", "─".repeat(terminal_width - 2));
}

fn position_of(engine: &ConversationEngine, id: armin_core::MessageId) -> Option<usize> {
    engine.messages().iter().position(|m| m.id == id).map(|i| i + 1)
}

/// Print engine events as they arrive
fn spawn_renderer(engine: ConversationEngine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Renderer lagged behind engine events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                EngineEvent::PhaseChanged(Phase::ThinkingDelay) => println!("🤔 thinking..."),
                EngineEvent::MessageAppended(message) if message.is_streaming => {
                    print!("armin> ");
                }
                EngineEvent::MessageAppended(message) => {
                    println!("armin> {}", message.content);
                    println!();
                }
                EngineEvent::Chunk { delta, .. } => print!("{}", delta),
                EngineEvent::Completed { id } => {
                    println!();
                    if let Some(message) = engine.messages().into_iter().find(|m| m.id == id) {
                        for source in &message.sources {
                            println!("  📚 {} <{}>", source.title, source.uri);
                        }
                    }
                    println!();
                }
                EngineEvent::Cancelled { id: Some(_) } => println!("\n[stopped]\n"),
                EngineEvent::Cancelled { id: None } => println!("[cancelled]\n"),
                EngineEvent::Failed { .. } => println!(),
                EngineEvent::ImageReady { id, .. } => {
                    if let Some(n) = position_of(&engine, id) {
                        println!("🖼  Image ready for message {} (/save-image {})", n, n);
                    }
                }
                EngineEvent::ImageFailed { id, .. } => {
                    if let Some(n) = position_of(&engine, id) {
                        println!("🖼  Image for message {} could not be generated", n);
                    }
                }
                EngineEvent::LogReset => println!("Conversation cleared."),
                EngineEvent::UserMessageAdded(_) | EngineEvent::PhaseChanged(_) => {}
            }
            let _ = std::io::stdout().flush();
        }
    })
}

fn spawn_notice_printer(engine: &ConversationEngine) -> tokio::task::JoinHandle<()> {
    let mut notices = engine.notifications().subscribe();
    tokio::spawn(async move {
        while notices.changed().await.is_ok() {
            let notice = notices.borrow_and_update().clone();
            if let Some(notice) = notice {
                eprintln!("[{:?}] {}", notice.kind, notice.message);
            }
        }
    })
}

/// Run an exchange in the background so /stop stays responsive
fn spawn_send(engine: &ConversationEngine, text: String, is_edit: bool) {
    let engine = engine.clone();
    tokio::spawn(async move {
        let outcome = if is_edit {
            engine.edit(&text).await
        } else {
            engine.send(&text).await
        };
        if let SendOutcome::Rejected(RejectReason::Busy) = outcome {
            println!("Still answering. Use /stop to cancel.");
        }
    });
}

fn exports_dir() -> PathBuf {
    PathManager::exports_dir().unwrap_or_else(|| PathBuf::from("."))
}

async fn execute(command: Command, state: &AppState) -> anyhow::Result<CommandResult> {
    let engine = &state.engine;
    match command {
        Command::Help => commands::print_help(),
        Command::Quit => {
            println!("Goodbye!");
            return Ok(CommandResult::Exit);
        }
        Command::Personas => {
            let current = engine.persona().id;
            for persona in engine.personas().iter() {
                let marker = if persona.id == current { "*" } else { " " };
                println!(
                    "{} {} {:<14} {} - {}",
                    marker, persona.theme.icon, persona.id, persona.name, persona.description
                );
            }
        }
        Command::Persona(id) => match engine.select_persona(&id) {
            Some(persona) => println!("Now talking to {} {}", persona.theme.icon, persona.name),
            None => println!("Unknown persona: {}. See /personas.", id),
        },
        Command::Attach(paths) => {
            let added = engine.attach_paths(&paths).await;
            println!(
                "{} file(s) attached, {} pending.",
                added,
                engine.draft().attachments.len()
            );
        }
        Command::Drop(index) => match engine.remove_attachment(index) {
            Some(attachment) => println!("Removed {}", attachment.display_name()),
            None => println!("No pending attachment {}", index + 1),
        },
        Command::Edit(text) => spawn_send(engine, text, true),
        Command::Stop => {
            if !engine.cancel() {
                println!("Nothing to stop.");
            }
        }
        Command::Explain(index) => {
            let engine = engine.clone();
            tokio::spawn(async move {
                if engine.regenerate_explanation(index).await.is_none() {
                    println!("Message {} is not an answer that can be explained.", index + 1);
                }
            });
        }
        Command::Code { message, block } => {
            let Some(entry) = engine.message(message) else {
                println!("No message {}", message + 1);
                return Ok(CommandResult::Continue);
            };
            let blocks = code_blocks(&entry.content);
            let Some((language, code)) = blocks.into_iter().nth(block) else {
                println!("Message {} has no code block {}", message + 1, block + 1);
                return Ok(CommandResult::Continue);
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.explain_code(language.as_deref(), &code).await;
            });
        }
        Command::Export { message, format } => match engine.export_message(message, format) {
            Some(artifact) => {
                let path = artifact
                    .write_to(&exports_dir())
                    .await
                    .context("writing export")?;
                engine.notifications().success(format!("Saved {}", path.display()));
            }
            None => println!("Message {} is not an answer.", message + 1),
        },
        Command::Analyze { paths, prompt } => {
            let mut files = Vec::new();
            for path in &paths {
                match armin_core::attachment::encode_path(path).await {
                    Ok(file) => files.push(file),
                    Err(e) => {
                        engine.notifications().error(e.to_string());
                    }
                }
            }
            if !files.is_empty() {
                println!("🔎 Analyzing {} file(s)...", files.len());
                if let Ok(text) = engine.analyze_files(&files, &prompt).await {
                    println!("{}\n", text);
                }
            }
        }
        Command::Look { path, prompt } => {
            let image = armin_core::attachment::encode_path(&path).await?;
            println!("🔎 Looking...");
            if let Ok(text) = engine.analyze_image(&image, &prompt).await {
                println!("{}\n", text);
            }
        }
        Command::Image(prompt) => {
            println!("🎨 Generating...");
            if let Ok(Some(image)) = engine.generate_image(&prompt).await {
                save_image(engine, &image).await?;
            }
        }
        Command::SaveImage(index) => {
            let uri = engine
                .message(index)
                .and_then(|m| m.images().first().cloned());
            match uri {
                Some(uri) => save_image(engine, &GeneratedImage { uri }).await?,
                None => println!("Message {} has no image.", index + 1),
            }
        }
        Command::Dictate => {
            if let Ok(transcript) = engine.dictate().await {
                println!("Draft: {}", transcript);
            }
        }
        Command::Settings => {
            let settings = state.settings.current();
            println!("  model:       {}", settings.model);
            println!("  temperature: {:.1}", settings.temperature);
            println!("  search:      {}", if settings.enable_search { "on" } else { "off" });
            println!(
                "  api key:     {}",
                match config::resolve_api_key(&settings) {
                    Some(_) if settings.api_key.is_some() => "stored",
                    Some(_) => "from environment",
                    None => "missing",
                }
            );
        }
        Command::Set(change) => {
            let settings = match change {
                SettingChange::Model(model) => state.settings.set_model(model)?,
                SettingChange::Temperature(t) => state.settings.set_temperature(t)?,
                SettingChange::Search(enabled) => state.settings.set_search(enabled)?,
                SettingChange::Key(key) => state.settings.set_api_key(key)?,
            };
            println!("Saved. ({:?})", settings);
        }
        Command::Models => {
            let settings = state.settings.current();
            let models = match state.client.list_models(&settings).await {
                Ok(models) => models,
                Err(e) => {
                    warn!("Listing models failed: {}", e);
                    builtin_models()
                }
            };
            for model in models {
                let marker = if model.id == settings.model { "*" } else { " " };
                println!("{} {:<32} {}", marker, model.id, model.name());
            }
        }
        Command::History => {
            for (i, message) in engine.messages().iter().enumerate() {
                let who = match message.role {
                    MessageRole::User => "you",
                    MessageRole::Model => "armin",
                };
                let mut flags = Vec::new();
                if message.is_streaming {
                    flags.push("streaming");
                }
                if message.is_error {
                    flags.push("error");
                }
                if !message.images().is_empty() {
                    flags.push("image");
                }
                if !message.attachments.is_empty() {
                    flags.push("attachments");
                }
                let preview: String = message.content.chars().take(70).collect();
                println!("{:>3} {:<5} {} [{}]", i + 1, who, preview.replace('\n', " "), flags.join(","));
            }
        }
    }
    Ok(CommandResult::Continue)
}

async fn save_image(engine: &ConversationEngine, image: &GeneratedImage) -> anyhow::Result<()> {
    match export_image(image) {
        Some(artifact) => {
            let path = artifact
                .write_to(&exports_dir())
                .await
                .context("writing image")?;
            engine.notifications().success(format!("Saved {}", path.display()));
        }
        None => println!("Image at {}", image.uri),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_file();
    let args = Args::parse();
    if let Some(dir) = &args.data_dir {
        PathManager::set_data_dir(dir.clone());
    }
    if let Err(e) = PathManager::ensure_dirs_exist() {
        eprintln!("[armin] Failed to create data directories: {}", e);
    }
    let _log_guard = logging::init_logging();

    let settings = SettingsStore::load(open_store());
    apply_overrides(&settings, &args)?;

    let catalog = match &args.personas {
        Some(path) => PersonaCatalog::load(path)
            .with_context(|| format!("loading personas from {}", path.display()))?,
        None => PersonaCatalog::builtin(),
    };

    let client: Arc<dyn GenerationClient> = Arc::new(match &args.gemini_url {
        Some(url) => GeminiGenerationClient::new(url.clone()),
        None => GeminiGenerationClient::default(),
    });
    let engine = ConversationEngine::new(client.clone(), settings.subscribe(), catalog);
    if let Some(id) = &args.persona {
        if engine.select_persona(id).is_none() {
            eprintln!("Unknown persona {}, using {}", id, engine.persona().id);
        }
    }

    let renderer = spawn_renderer(engine.clone());
    let notices = spawn_notice_printer(&engine);
    let state = AppState {
        engine,
        settings,
        client,
    };

    println!();
    println!("Type /help for commands, Ctrl+D or /quit to exit.");
    println!();
    print_status_bar(&state);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                println!();
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            match Command::parse(input) {
                Ok(command) => match execute(command, &state).await {
                    Ok(CommandResult::Exit) => break,
                    Ok(CommandResult::Continue) => {}
                    Err(e) => eprintln!("Error: {:#}", e),
                },
                Err(err) => println!("{}", err),
            }
            continue;
        }

        spawn_send(&state.engine, input.to_string(), false);
    }

    state.engine.cancel();
    state.engine.settle().await;
    renderer.abort();
    notices.abort();
    info!(messages = state.engine.messages().len(), "Session ended");
    Ok(())
}
