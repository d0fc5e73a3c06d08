//! Slash commands typed into the chat box.

use serde_json::{Map, Value};

/// Default number of messages shown by `/history`.
pub const DEFAULT_HISTORY: usize = 10;

pub const HELP_TEXT: &str = "\
Available commands:
  /help                         show this help
  /sessions                     list sessions
  /new [title]                  start a new session
  /delete <id-prefix>           delete a session
  /clear                        clear the current session
  /title <text>                 rename the current session
  /stats                        statistics for the current session
  /history [n]                  show the last n messages
  /tools                        list available tools
  /prompts                      list available prompts
  /resources                    list available resources
  /prompt <name> [key=value..]  run a prompt
  @<uri>                        fetch a resource";

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Sessions,
    New(Option<String>),
    Delete(String),
    Clear,
    Title(String),
    Stats,
    History(usize),
    Tools,
    Prompts,
    Resources,
    Prompt {
        name: String,
        arguments: Map<String, Value>,
    },
    /// Known command with missing or malformed arguments.
    Usage(&'static str),
    Unknown(String),
}

impl Command {
    /// Parse a query that starts with `/`.
    pub fn parse(input: &str) -> Self {
        let input = input.trim().trim_start_matches('/');
        let (name, rest) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };
        match name.to_ascii_lowercase().as_str() {
            "help" | "?" => Command::Help,
            "sessions" => Command::Sessions,
            "new" => Command::New(Some(rest.to_string()).filter(|title| !title.is_empty())),
            "delete" if rest.is_empty() => Command::Usage("/delete <id-prefix>"),
            "delete" => Command::Delete(rest.to_string()),
            "clear" => Command::Clear,
            "title" if rest.is_empty() => Command::Usage("/title <text>"),
            "title" => Command::Title(rest.to_string()),
            "stats" => Command::Stats,
            "history" if rest.is_empty() => Command::History(DEFAULT_HISTORY),
            "history" => match rest.parse::<usize>() {
                Ok(count) if count > 0 => Command::History(count),
                _ => Command::Usage("/history [n]"),
            },
            "tools" => Command::Tools,
            "prompts" => Command::Prompts,
            "resources" => Command::Resources,
            "prompt" => parse_prompt(rest),
            other => Command::Unknown(other.to_string()),
        }
    }
}

fn parse_prompt(rest: &str) -> Command {
    let mut tokens = rest.split_whitespace();
    let Some(name) = tokens.next() else {
        return Command::Usage("/prompt <name> [key=value ...]");
    };
    let mut arguments = Map::new();
    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            return Command::Usage("/prompt <name> [key=value ...]");
        };
        arguments.insert(key.to_string(), Value::String(value.to_string()));
    }
    Command::Prompt {
        name: name.to_string(),
        arguments,
    }
}
