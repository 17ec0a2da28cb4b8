//! Shell-integration signals in stream order.
//!
//! Merges the OSC marker decoder and the CSI mode tracker into one ordered
//! list of [`ShellSignal`]s, each tagged with the offset at which its
//! sequence ended. The reader feeds the terminal model up to that offset
//! before acting on the signal, so the model content always matches the
//! signal position.

use super::modes::{ModeEvent, ModeTracker};
use super::osc::{Located, OscDecoder, OscEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellSignal {
    PromptStart,
    CommandStart,
    CommandExecuted,
    CommandFinished { exit_code: i32 },
    CommandLine(String),
    Cwd(String),
    AlternateBuffer(bool),
    Cleared,
}

/// Where the shell is in its prompt/command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellPhase {
    /// Nothing seen yet (no integration, or before the first prompt).
    #[default]
    Unknown,
    Prompt,
    Input,
    Running,
}

/// Semantic shell state derived from the signals.
#[derive(Debug, Clone, Default)]
pub struct SemanticState {
    pub phase: ShellPhase,
    pub cwd: Option<String>,
    pub last_exit: Option<i32>,
    /// Command line reported by the shell itself (`633;E`), if any.
    pub reported_command: Option<String>,
}

impl SemanticState {
    pub fn apply(&mut self, signal: &ShellSignal) {
        match signal {
            ShellSignal::PromptStart => self.phase = ShellPhase::Prompt,
            ShellSignal::CommandStart => self.phase = ShellPhase::Input,
            ShellSignal::CommandExecuted => self.phase = ShellPhase::Running,
            ShellSignal::CommandFinished { exit_code } => {
                self.phase = ShellPhase::Prompt;
                self.last_exit = Some(*exit_code);
            }
            ShellSignal::CommandLine(line) => self.reported_command = Some(line.clone()),
            ShellSignal::Cwd(path) => self.cwd = Some(path.clone()),
            ShellSignal::AlternateBuffer(_) | ShellSignal::Cleared => {}
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ShellIntegration {
    osc: OscDecoder,
    modes: ModeTracker,
    state: SemanticState,
}

impl ShellIntegration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SemanticState {
        &self.state
    }

    /// Take the shell-reported command line, if one arrived for this command.
    pub fn take_reported_command(&mut self) -> Option<String> {
        self.state.reported_command.take()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Located<ShellSignal>> {
        let mut signals: Vec<Located<ShellSignal>> = self
            .osc
            .feed(bytes)
            .into_iter()
            .map(|(end, event)| (end, from_osc(event)))
            .chain(
                self.modes
                    .feed(bytes)
                    .into_iter()
                    .map(|(end, event)| (end, from_mode(event))),
            )
            .collect();
        // Stable: two signals can't end on the same byte, but keep OSC first if they did.
        signals.sort_by_key(|(end, _)| *end);

        for (_, signal) in &signals {
            self.state.apply(signal);
        }
        signals
    }
}

fn from_osc(event: OscEvent) -> ShellSignal {
    match event {
        OscEvent::Cwd(path) => ShellSignal::Cwd(path),
        OscEvent::PromptStart => ShellSignal::PromptStart,
        OscEvent::CommandStart => ShellSignal::CommandStart,
        OscEvent::CommandExecuted => ShellSignal::CommandExecuted,
        OscEvent::CommandFinished { exit_code } => ShellSignal::CommandFinished {
            exit_code: exit_code.unwrap_or(0),
        },
        OscEvent::CommandLine(line) => ShellSignal::CommandLine(line),
    }
}

fn from_mode(event: ModeEvent) -> ShellSignal {
    match event {
        ModeEvent::AlternateBuffer(enabled) => ShellSignal::AlternateBuffer(enabled),
        ModeEvent::ClearScrollback => ShellSignal::Cleared,
    }
}

/// Recover the typed command from the terminal text captured when input was
/// accepted, given the prompt captured when input began.
///
/// Rendered text has no trailing blanks, so an Enter on an empty prompt
/// leaves `"$"` for the prompt `"$ "`; that counts as no command.
pub fn command_from_input(text: &str, prompt: Option<&str>) -> Option<String> {
    let text = text.trim_end();
    let typed = prompt
        .filter(|p| !p.trim_end().is_empty())
        .and_then(|p| text.strip_prefix(p).or_else(|| text.strip_prefix(p.trim_end())))
        .unwrap_or_else(|| text.rsplit('\n').next().unwrap_or_default());
    let typed = typed.trim();
    (!typed.is_empty()).then(|| typed.to_string())
}
