//! Command-block engine for a terminal view.
//!
//! Turns the byte stream of a shell running on a PTY into a document made
//! of command blocks (prompt + command + output):
//!
//! - `term`: headless terminal model plus the shell-integration decoders
//! - `scraper`: styled snapshots of the running command's output
//! - `blocks`: the document and the block list over it
//! - `controller`: UI-thread state machine that applies snapshots
//! - `typeahead`: local echo prediction
//! - `session`: transport, reader thread, lifecycle notifications
//!
//! Threading: the session's reader thread is the only writer of the
//! terminal model; the [`OutputController`] (on the UI thread) is the only
//! writer of the document. They talk through [`dispatch`].

pub mod blocks;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod listeners;
pub mod scraper;
pub mod session;
pub mod term;
pub mod typeahead;

pub use blocks::{BlockId, CommandBlock, OutputModel};
pub use config::{SessionConfig, TypeAheadConfig};
pub use controller::{ControllerState, OutputController};
pub use dispatch::{UiDispatcher, UiEvent, UiQueue};
pub use error::{OutputError, SessionError};
pub use scraper::{OutputScraper, StyledOutput};
pub use session::{Delivery, PtyConnector, TerminalSession, TtyConnector};
pub use term::{TermSize, TerminalModel};
