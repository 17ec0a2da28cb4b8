//! Command block data types.
//!
//! A block is one prompt + command + output unit, addressed by offsets into
//! the shared [`Document`](super::Document). The output model is the only
//! thing that moves those offsets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use uuid::Uuid;

use crate::term::TextStyle;

pub type BlockId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockState {
    /// Receiving output.
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBlock {
    pub id: BlockId,
    pub command: Option<String>,
    pub prompt: Option<String>,
    /// `start_offset <= command_start_offset <= output_start_offset <= end_offset`
    pub start_offset: usize,
    pub command_start_offset: usize,
    pub output_start_offset: usize,
    pub end_offset: usize,
    pub state: BlockState,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CommandBlock {
    pub(crate) fn new(command: Option<&str>, prompt: Option<&str>, offset: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.map(str::to_string),
            prompt: prompt.map(str::to_string),
            start_offset: offset,
            command_start_offset: offset,
            output_start_offset: offset,
            end_offset: offset,
            state: BlockState::Open,
            exit_code: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn has_prompt(&self) -> bool {
        self.prompt.is_some()
    }

    pub fn has_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.state == BlockState::Open
    }

    pub fn text_range(&self) -> Range<usize> {
        self.start_offset..self.end_offset
    }

    pub fn output_range(&self) -> Range<usize> {
        self.output_start_offset..self.end_offset
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    pub(crate) fn shift(&mut self, delta: isize) {
        self.start_offset = self.start_offset.saturating_add_signed(delta);
        self.command_start_offset = self.command_start_offset.saturating_add_signed(delta);
        self.output_start_offset = self.output_start_offset.saturating_add_signed(delta);
        self.end_offset = self.end_offset.saturating_add_signed(delta);
    }

    /// Pull inner offsets back inside `[start, end]` after the end moved left.
    pub(crate) fn clamp_to_end(&mut self) {
        self.output_start_offset = self.output_start_offset.min(self.end_offset);
        self.command_start_offset = self.command_start_offset.min(self.output_start_offset);
    }
}

/// Which part of a block an appended line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSection {
    Prompt,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecorationState {
    #[default]
    Normal,
    Error,
}

/// Visual frame around a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDecoration {
    pub state: DecorationState,
    pub first_block: bool,
}

/// Fixed prompt/command styles are resolved by the host theme; output
/// keeps the terminal style it was scraped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighlightStyle {
    Prompt,
    Command,
    Output(TextStyle),
}

/// Absolute `[start, end)` span in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlighting {
    pub start: usize,
    pub end: usize,
    pub style: HighlightStyle,
}

impl Highlighting {
    pub fn new(start: usize, end: usize, style: HighlightStyle) -> Self {
        Self { start, end, style }
    }

    pub(crate) fn shift(&mut self, delta: isize) {
        self.start = self.start.saturating_add_signed(delta);
        self.end = self.end.saturating_add_signed(delta);
    }
}
