#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "platform",
        action: "set_platform",
    },
    CommandSpec {
        command: "toggle",
        action: "toggle_size",
    },
];

/// Commands taking a shell-quoted list.
pub(crate) const LIST_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "sizes",
    action: "set_sizes",
}];

/// Commands addressing one listed item by its 1-based position.
pub(crate) const ITEM_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "show",
        action: "show_item",
    },
    CommandSpec {
        command: "cancel",
        action: "cancel_edit",
    },
    CommandSpec {
        command: "preview",
        action: "retry_preview",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
];

/// Item position followed by free text.
pub(crate) const ITEM_TEXT_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "edit",
    action: "edit",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "catalog",
        action: "catalog",
    },
    CommandSpec {
        command: "list",
        action: "list",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "clear",
        action: "clear_history",
    },
    CommandSpec {
        command: "wait",
        action: "wait_previews",
    },
    CommandSpec {
        command: "error",
        action: "show_error",
    },
    CommandSpec {
        command: "dismiss",
        action: "dismiss_error",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/platform",
    "/sizes",
    "/toggle",
    "/catalog",
    "/list",
    "/show",
    "/edit",
    "/cancel",
    "/preview",
    "/download",
    "/history",
    "/clear",
    "/wait",
    "/error",
    "/dismiss",
    "/help",
    "/quit",
];
