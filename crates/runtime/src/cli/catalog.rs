//! The closed set of runtime CLI commands.
//!
//! Each command is a `const` descriptor. The invariants (non-empty token list,
//! a terminal state implies an in-progress state) are checked by `const fn`
//! constructors, so a malformed entry fails to compile rather than at runtime.

use stevedore_types::LifecycleState;

/// Static description of a CLI subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Subcommand tokens, e.g. `["connections", "list"]`.
    pub tokens: &'static [&'static str],
    /// Output is JSON (`true`) or raw text.
    pub structured_output: bool,
    /// The process may be killed on user request.
    pub cancellable: bool,
    /// Stdout may contain secrets and must never be echoed to the output log.
    pub redact_output: bool,
}

impl CommandDescriptor {
    pub const fn new(tokens: &'static [&'static str]) -> Self {
        assert!(!tokens.is_empty(), "a command needs at least one token");
        Self {
            tokens,
            structured_output: true,
            cancellable: false,
            redact_output: false,
        }
    }

    pub const fn text_output(mut self) -> Self {
        self.structured_output = false;
        self
    }

    pub const fn cancellable(mut self) -> Self {
        self.cancellable = true;
        self
    }

    pub const fn redact_output(mut self) -> Self {
        self.redact_output = true;
        self
    }

    /// Space-joined tokens, used in log lines and error messages.
    pub fn display_name(&self) -> String {
        self.tokens.join(" ")
    }
}

/// State transitions a lifecycle command drives on the local runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transitions {
    pub during: Option<LifecycleState>,
    pub on_error: Option<LifecycleState>,
    pub after: Option<LifecycleState>,
}

impl Transitions {
    pub const NONE: Transitions = Transitions {
        during: None,
        on_error: None,
        after: None,
    };

    pub const fn new(during: Option<LifecycleState>, on_error: Option<LifecycleState>, after: Option<LifecycleState>) -> Self {
        assert!(after.is_none() || during.is_some(), "a terminal state requires an in-progress state");
        Self { during, on_error, after }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleCommandKind {
    Install,
    Start,
    Stop,
    Remove,
    Upgrade,
}

impl std::fmt::Display for LifecycleCommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LifecycleCommandKind::Install => "install",
            LifecycleCommandKind::Start => "start",
            LifecycleCommandKind::Stop => "stop",
            LifecycleCommandKind::Remove => "remove",
            LifecycleCommandKind::Upgrade => "upgrade",
        };
        f.write_str(text)
    }
}

/// A command that changes the local runtime and participates in the lifecycle lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleCommand {
    pub kind: LifecycleCommandKind,
    pub descriptor: CommandDescriptor,
    /// The command takes `--tag <version>`.
    pub uses_version_tag: bool,
    /// Progress label; `{tag}` is replaced with the version.
    action_label: &'static str,
    pub transitions: Transitions,
}

impl LifecycleCommand {
    const fn new(
        kind: LifecycleCommandKind,
        descriptor: CommandDescriptor,
        uses_version_tag: bool,
        action_label: &'static str,
        transitions: Transitions,
    ) -> Self {
        Self {
            kind,
            descriptor,
            uses_version_tag,
            action_label,
            transitions,
        }
    }

    pub fn action_label(&self, tag: &str) -> String {
        self.action_label.replace("{tag}", tag)
    }

    pub const fn as_cli(self) -> CliCommand {
        CliCommand::Lifecycle(self)
    }
}

/// Any command the runner can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCommand {
    Plain(CommandDescriptor),
    Lifecycle(LifecycleCommand),
}

impl CliCommand {
    pub const fn descriptor(&self) -> &CommandDescriptor {
        match self {
            CliCommand::Plain(descriptor) => descriptor,
            CliCommand::Lifecycle(command) => &command.descriptor,
        }
    }

    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, CliCommand::Lifecycle(_))
    }

    pub fn lifecycle_kind(&self) -> Option<LifecycleCommandKind> {
        match self {
            CliCommand::Lifecycle(command) => Some(command.kind),
            CliCommand::Plain(_) => None,
        }
    }

    pub fn display_name(&self) -> String {
        self.descriptor().display_name()
    }
}

use LifecycleState::{ErrorGeneric, ErrorInstalling, ErrorStarting, Installing, Started, Starting, Stopped, Stopping};

pub const INSTALL: LifecycleCommand = LifecycleCommand::new(
    LifecycleCommandKind::Install,
    CommandDescriptor::new(&["install"]).text_output().cancellable(),
    true,
    "Pulling {tag} images",
    Transitions::new(Some(Installing), Some(ErrorInstalling), Some(Stopped)),
);

pub const START: LifecycleCommand = LifecycleCommand::new(
    LifecycleCommandKind::Start,
    CommandDescriptor::new(&["start"]).text_output(),
    true,
    "Starting {tag}",
    Transitions::new(Some(Starting), Some(ErrorStarting), Some(Started)),
);

pub const STOP: LifecycleCommand = LifecycleCommand::new(
    LifecycleCommandKind::Stop,
    CommandDescriptor::new(&["stop"]).text_output(),
    false,
    "Stopping",
    Transitions::new(Some(Stopping), Some(ErrorGeneric), Some(Stopped)),
);

pub const REMOVE: LifecycleCommand = LifecycleCommand::new(
    LifecycleCommandKind::Remove,
    CommandDescriptor::new(&["remove"]).text_output(),
    true,
    "Removing {tag} images",
    Transitions::new(None, Some(ErrorGeneric), None),
);

pub const UPGRADE: LifecycleCommand = LifecycleCommand::new(
    LifecycleCommandKind::Upgrade,
    CommandDescriptor::new(&["upgrade"]),
    false,
    "Migrating workspace",
    Transitions::NONE,
);

pub const STATUS: CliCommand = CliCommand::Plain(CommandDescriptor::new(&["status"]));
pub const CONNECTIONS_LIST: CliCommand = CliCommand::Plain(CommandDescriptor::new(&["connections", "list"]));
pub const CONNECTIONS_ADD: CliCommand = CliCommand::Plain(CommandDescriptor::new(&["connections", "add"]));
pub const CONNECTIONS_REMOVE: CliCommand = CliCommand::Plain(CommandDescriptor::new(&["connections", "remove"]));
pub const KEYRING_UPDATE: CliCommand = CliCommand::Plain(CommandDescriptor::new(&["seckeyring", "update"]));
pub const TOKEN_GET: CliCommand = CliCommand::Plain(CommandDescriptor::new(&["sectoken", "get"]).redact_output());

/// All lifecycle commands, in the order the install flow uses them.
pub const LIFECYCLE_COMMANDS: [LifecycleCommand; 5] = [STOP, REMOVE, INSTALL, START, UPGRADE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_install_is_cancellable() {
        for command in LIFECYCLE_COMMANDS {
            assert_eq!(command.descriptor.cancellable, command.kind == LifecycleCommandKind::Install, "{}", command.kind);
        }
        assert!(!STATUS.descriptor().cancellable);
    }

    #[test]
    fn terminal_states_always_have_an_in_progress_state() {
        for command in LIFECYCLE_COMMANDS {
            let transitions = command.transitions;
            assert!(transitions.after.is_none() || transitions.during.is_some());
        }
    }

    #[test]
    fn token_output_is_never_echoed() {
        assert!(TOKEN_GET.descriptor().redact_output);
        assert!(TOKEN_GET.descriptor().structured_output);
        assert!(!CONNECTIONS_LIST.descriptor().redact_output);
    }

    #[test]
    fn action_label_substitutes_the_tag() {
        assert_eq!(INSTALL.action_label("1.2.0"), "Pulling 1.2.0 images");
        assert_eq!(STOP.action_label("1.2.0"), "Stopping");
        assert_eq!(CONNECTIONS_LIST.display_name(), "connections list");
        assert_eq!(INSTALL.as_cli().lifecycle_kind(), Some(LifecycleCommandKind::Install));
        assert_eq!(STATUS.lifecycle_kind(), None);
    }
}
