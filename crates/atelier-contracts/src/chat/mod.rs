mod command_parser;
mod command_registry;
mod directive;
mod message;

pub use command_parser::{parse_command, ChatCommand};
pub use command_registry::CHAT_HELP_COMMANDS;
pub use directive::{escape_body, parse_reply, ParsedReply, VISUAL_PROMPT_MARKER};
pub use message::{Citation, ConciergeMessage, MessageId, Role, Transcript};
