use super::command_registry::{CommandKind, COMMANDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Noop,
    Say(String),
    Attach(String),
    Detach,
    Mode(String),
    VoiceStart,
    VoiceStop,
    Dream(String),
    Help,
    Quit,
    Unknown { command: String, arg: String },
}

fn find_kind(command: &str) -> Option<CommandKind> {
    COMMANDS
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.kind)
}

fn parse_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    parts
        .into_iter()
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_command(text: &str) -> ChatCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatCommand::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return ChatCommand::Say(raw_trimmed.to_string());
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return ChatCommand::Say(raw_trimmed.to_string());
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    match find_kind(&command) {
        Some(CommandKind::Attach) => ChatCommand::Attach(parse_path_arg(arg)),
        Some(CommandKind::Detach) => ChatCommand::Detach,
        Some(CommandKind::Mode) => ChatCommand::Mode(arg.to_ascii_lowercase()),
        Some(CommandKind::VoiceStart) => ChatCommand::VoiceStart,
        Some(CommandKind::VoiceStop) => ChatCommand::VoiceStop,
        Some(CommandKind::Dream) => ChatCommand::Dream(arg.to_string()),
        Some(CommandKind::Help) => ChatCommand::Help,
        Some(CommandKind::Quit) => ChatCommand::Quit,
        None => ChatCommand::Unknown {
            command,
            arg: arg.to_string(),
        },
    }
}
