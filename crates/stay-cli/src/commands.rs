//! Slash commands for interactive mode

use stay_api::FormField;

/// A conversation reference: a 1-based position in the last listing, or an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Position(usize),
    Id(String),
}

impl Target {
    fn parse(arg: &str) -> Option<Self> {
        if arg.is_empty() {
            return None;
        }
        Some(match arg.parse::<usize>() {
            Ok(n) if n > 0 => Target::Position(n),
            _ => Target::Id(arg.to_string()),
        })
    }

    /// Resolve against the ids of the current listing
    pub fn resolve<'a>(&'a self, ids: &[&'a str]) -> Option<&'a str> {
        match self {
            Target::Position(n) => ids.get(n - 1).copied(),
            Target::Id(id) => Some(id.as_str()),
        }
    }
}

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    New,
    List,
    Open(Target),
    Delete(Target),
    Edit { message_id: i64, content: String },
    Regenerate { message_id: i64 },
    Confirm,
    Cancel,
    /// Fill in the latest open form
    Form,
    History,
    Quit,
    /// Bad arguments; the text says how to use the command
    Usage(&'static str),
    Unknown(String),
}

/// Parse a slash command; plain text yields `None`
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };

    Some(match command.to_lowercase().as_str() {
        "help" | "h" | "?" => Command::Help,
        "new" | "n" => Command::New,
        "list" | "ls" | "l" => Command::List,
        "open" | "o" => match Target::parse(args) {
            Some(target) => Command::Open(target),
            None => Command::Usage("/open <n|id>"),
        },
        "delete" | "rm" => match Target::parse(args) {
            Some(target) => Command::Delete(target),
            None => Command::Usage("/delete <n|id>"),
        },
        "edit" | "e" => {
            let parsed = args
                .split_once(char::is_whitespace)
                .and_then(|(id, text)| Some((id.parse::<i64>().ok()?, text.trim())))
                .filter(|(_, text)| !text.is_empty());
            match parsed {
                Some((message_id, content)) => Command::Edit {
                    message_id,
                    content: content.to_string(),
                },
                None => Command::Usage("/edit <message-id> <text>"),
            }
        }
        "regen" | "r" => match args.parse::<i64>() {
            Ok(message_id) => Command::Regenerate { message_id },
            Err(_) => Command::Usage("/regen <message-id>"),
        },
        "confirm" | "y" => Command::Confirm,
        "cancel" => Command::Cancel,
        "form" | "f" => Command::Form,
        "history" | "hist" => Command::History,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    })
}

pub fn help_message() -> String {
    r#"Commands:
  /new                      Start a new conversation
  /list                     List conversations
  /open <n|id>              Open a conversation by list position or id
  /delete <n|id>            Delete a conversation
  /edit <message-id> <text> Replace one of your messages and regenerate
  /regen <message-id>       Regenerate an assistant reply
  /confirm                  Confirm the pending action
  /cancel                   Dismiss the pending action
  /form                     Fill in the latest form from the assistant
  /history                  Show the messages of this conversation
  /quit                     Exit

Ctrl-C stops a reply while it streams."#
        .to_string()
}

/// Text shown when asking for a field, with its choices if any
pub fn field_prompt(field: &FormField) -> String {
    let mut prompt = field.label.clone();
    if let Some(options) = field.options.as_ref().filter(|o| !o.is_empty()) {
        let choices: Vec<String> = options
            .iter()
            .map(|o| o.as_str().map(str::to_string).unwrap_or_else(|| o.to_string()))
            .collect();
        prompt.push_str(&format!(" [{}]", choices.join("/")));
    } else if let Some(placeholder) = &field.placeholder {
        prompt.push_str(&format!(" (e.g. {})", placeholder));
    }
    if field.required {
        prompt.push_str(" *");
    }
    prompt
}

/// The user message sent for a filled form: one `label: value` line per
/// answered field. `None` when nothing was filled in.
pub fn form_reply(fields: &[FormField], values: &[String]) -> Option<String> {
    let lines: Vec<String> = fields
        .iter()
        .zip(values)
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(field, value)| format!("{}: {}", field.label, value.trim()))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
