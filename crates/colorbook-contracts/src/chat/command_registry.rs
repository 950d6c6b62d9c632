#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "export",
        action: "export",
    },
    CommandSpec {
        command: "clear",
        action: "clear",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const RETRY_COMMAND: CommandSpec = CommandSpec {
    command: "retry",
    action: "retry",
};

pub(crate) const NEW_BOOK_COMMAND: CommandSpec = CommandSpec {
    command: "new",
    action: "new_book",
};

pub const BOOK_HELP_COMMANDS: &[&str] = &[
    "/status",
    "/retry <page>",
    "/export",
    "/new <theme> <name> [pages]",
    "/help",
    "/quit",
];

pub const CHAT_HELP_COMMANDS: &[&str] = &["/history", "/clear", "/help", "/quit"];
