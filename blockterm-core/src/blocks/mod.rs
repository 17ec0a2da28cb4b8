//! Command blocks and the document they are rendered into.
//!
//! A "block" is one shell interaction:
//! - prompt
//! - command line
//! - output (styled text scraped from the terminal model)
//! - exit code + timing
//!
//! [`OutputModel`] owns the blocks and the [`Document`] and is the only
//! place block offsets change.

pub mod document;
pub mod model;
pub mod output_model;

pub use document::{Document, DocumentEvent, DocumentListener};
pub use model::{
    BlockDecoration, BlockId, BlockSection, BlockState, CommandBlock, DecorationState,
    HighlightStyle, Highlighting,
};
pub use output_model::OutputModel;
