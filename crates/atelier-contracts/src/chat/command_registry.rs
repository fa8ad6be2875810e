#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Attach,
    Detach,
    Mode,
    VoiceStart,
    VoiceStop,
    Dream,
    Help,
    Quit,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub kind: CommandKind,
}

pub(crate) const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "attach",
        kind: CommandKind::Attach,
    },
    CommandSpec {
        command: "detach",
        kind: CommandKind::Detach,
    },
    CommandSpec {
        command: "mode",
        kind: CommandKind::Mode,
    },
    CommandSpec {
        command: "voice_start",
        kind: CommandKind::VoiceStart,
    },
    CommandSpec {
        command: "voice_stop",
        kind: CommandKind::VoiceStop,
    },
    CommandSpec {
        command: "dream",
        kind: CommandKind::Dream,
    },
    CommandSpec {
        command: "help",
        kind: CommandKind::Help,
    },
    CommandSpec {
        command: "quit",
        kind: CommandKind::Quit,
    },
    CommandSpec {
        command: "exit",
        kind: CommandKind::Quit,
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/attach PATH",
    "/detach",
    "/mode director|guest",
    "/voice_start",
    "/voice_stop",
    "/dream TEXT",
    "/help",
    "/quit",
];
