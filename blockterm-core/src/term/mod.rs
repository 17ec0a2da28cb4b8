//! The headless terminal and the parsers that sit *next to* it.
//!
//! - `model`: alacritty-backed grid the PTY bytes are decoded into
//! - `style`: terminal colors/attributes as plain values
//! - `osc`: streaming OSC parser (OSC 7 cwd, OSC 133/633 prompt markers)
//! - `modes`: lightweight CSI tracker (alternate buffer, clear scrollback)
//! - `integration`: both of the above merged into ordered shell signals

pub mod integration;
pub mod model;
pub mod modes;
pub mod osc;
pub mod style;

pub use integration::{SemanticState, ShellIntegration, ShellPhase, ShellSignal};
pub use model::{TermSize, TerminalModel};
pub use style::{StyleRange, TermColor, TextStyle};
