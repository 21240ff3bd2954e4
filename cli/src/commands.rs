//! Slash command parsing. Message and block numbers are 1-based on input.

use armin_core::ExportFormat;
use std::path::PathBuf;

#[derive(Debug, PartialEq)]
pub enum SettingChange {
    Model(String),
    Temperature(f32),
    Search(bool),
    /// `None` clears the stored key
    Key(Option<String>),
}

#[derive(Debug, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Personas,
    Persona(String),
    Attach(Vec<PathBuf>),
    Drop(usize),
    Edit(String),
    Stop,
    Explain(usize),
    Code { message: usize, block: usize },
    Export { message: usize, format: ExportFormat },
    Analyze { paths: Vec<PathBuf>, prompt: String },
    Look { path: PathBuf, prompt: String },
    Image(String),
    SaveImage(usize),
    Dictate,
    Settings,
    Set(SettingChange),
    Models,
    History,
}

fn index(arg: Option<&str>, usage: &str) -> Result<usize, String> {
    arg.and_then(|a| a.parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| format!("Usage: {}", usage))
}

/// Split `a b -- prompt words` into paths and the prompt
fn paths_and_prompt(rest: &str) -> (Vec<PathBuf>, String) {
    let (paths, prompt) = match rest.split_once(" -- ") {
        Some((paths, prompt)) => (paths, prompt.trim().to_string()),
        None => (rest, String::new()),
    };
    (paths.split_whitespace().map(PathBuf::from).collect(), prompt)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, String> {
        let Some(body) = input.strip_prefix('/') else {
            return Err("Not a command".to_string());
        };
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };
        let mut args = rest.split_whitespace();

        match name {
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "personas" => Ok(Command::Personas),
            "persona" => match args.next() {
                Some(id) => Ok(Command::Persona(id.to_string())),
                None => Err("Usage: /persona <id>".to_string()),
            },
            "attach" => {
                let paths: Vec<PathBuf> = args.map(PathBuf::from).collect();
                if paths.is_empty() {
                    return Err("Usage: /attach <path>...".to_string());
                }
                Ok(Command::Attach(paths))
            }
            "drop" => index(args.next(), "/drop <n>").map(Command::Drop),
            "edit" if !rest.is_empty() => Ok(Command::Edit(rest.to_string())),
            "edit" => Err("Usage: /edit <text>".to_string()),
            "stop" => Ok(Command::Stop),
            "explain" => index(args.next(), "/explain <n>").map(Command::Explain),
            "code" => {
                let message = index(args.next(), "/code <n> [block]")?;
                let block = match args.next() {
                    Some(block) => index(Some(block), "/code <n> [block]")?,
                    None => 0,
                };
                Ok(Command::Code { message, block })
            }
            "export" => {
                let message = index(args.next(), "/export <n> txt|html")?;
                let format = args
                    .next()
                    .map_or(Some(ExportFormat::Text), ExportFormat::parse)
                    .ok_or_else(|| "Usage: /export <n> txt|html".to_string())?;
                Ok(Command::Export { message, format })
            }
            "analyze" => {
                let (paths, prompt) = paths_and_prompt(rest);
                if paths.is_empty() {
                    return Err("Usage: /analyze <path>... [-- prompt]".to_string());
                }
                Ok(Command::Analyze { paths, prompt })
            }
            "look" => {
                let (mut paths, prompt) = paths_and_prompt(rest);
                if paths.len() != 1 {
                    return Err("Usage: /look <image> [-- prompt]".to_string());
                }
                Ok(Command::Look {
                    path: paths.remove(0),
                    prompt,
                })
            }
            "image" if !rest.is_empty() => Ok(Command::Image(rest.to_string())),
            "image" => Err("Usage: /image <prompt>".to_string()),
            "save-image" => index(args.next(), "/save-image <n>").map(Command::SaveImage),
            "dictate" => Ok(Command::Dictate),
            "settings" => Ok(Command::Settings),
            "set" => Self::parse_set(args.next(), args.next()),
            "models" => Ok(Command::Models),
            "history" => Ok(Command::History),
            _ => Err(format!(
                "Unknown command: /{}. Type /help for available commands.",
                name
            )),
        }
    }

    fn parse_set(key: Option<&str>, value: Option<&str>) -> Result<Self, String> {
        const USAGE: &str = "Usage: /set model|temperature|search|key <value>";
        let change = match (key, value) {
            (Some("model"), Some(model)) => SettingChange::Model(model.to_string()),
            (Some("temperature"), Some(value)) => value
                .parse::<f32>()
                .map(SettingChange::Temperature)
                .map_err(|_| format!("Not a number: {}", value))?,
            (Some("search"), Some(value)) => parse_bool(value)
                .map(SettingChange::Search)
                .ok_or_else(|| "Usage: /set search on|off".to_string())?,
            (Some("key"), Some("-")) | (Some("key"), None) => SettingChange::Key(None),
            (Some("key"), Some(key)) => SettingChange::Key(Some(key.to_string())),
            _ => return Err(USAGE.to_string()),
        };
        Ok(Command::Set(change))
    }
}

pub fn print_help() {
    println!("Available commands:");
    println!("  /personas                  - List personas");
    println!("  /persona <id>              - Switch persona (clears the conversation)");
    println!("  /attach <path>...          - Attach files to the next message");
    println!("  /drop <n>                  - Remove pending attachment n");
    println!("  /edit <text>               - Replace your last message and ask again");
    println!("  /stop                      - Stop the current answer");
    println!("  /explain <n>               - Step-by-step explanation of answer n");
    println!("  /code <n> [k]              - Explain code block k of message n");
    println!("  /export <n> txt|html       - Save answer n to a file");
    println!("  /analyze <path>... [-- p]  - Analyze files");
    println!("  /look <image> [-- p]       - Describe an image");
    println!("  /image <prompt>            - Generate an image");
    println!("  /save-image <n>            - Save the image of message n");
    println!("  /dictate                   - Add speech to the draft");
    println!("  /settings                  - Show settings");
    println!("  /set model|temperature|search|key <value>");
    println!("  /models                    - List available models");
    println!("  /history                   - Show the conversation");
    println!("  /quit, /exit               - Exit");
}
