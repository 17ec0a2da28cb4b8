//! The authoritative list of command blocks.
//!
//! Owns the document and keeps every block offset and highlighting span in
//! step with it. Consecutive blocks are separated by a single `"\n"` that
//! belongs to neither block. Blocks are kept in creation order and at most
//! the last one is open.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use super::document::{Document, DocumentListener};
use super::model::{
    BlockDecoration, BlockId, BlockSection, BlockState, CommandBlock, DecorationState,
    Highlighting,
};
use crate::error::OutputError;
use crate::listeners::ListenerId;

#[derive(Debug, Default)]
pub struct OutputModel {
    document: Document,
    blocks: Vec<CommandBlock>,
    highlightings: HashMap<BlockId, Vec<Highlighting>>,
    decorations: HashMap<BlockId, BlockDecoration>,
    /// The document already ends with the next block's separator.
    separator_pending: bool,
}

impl OutputModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn add_document_listener(&self, listener: Arc<dyn DocumentListener>) -> ListenerId {
        self.document.add_listener(listener)
    }

    pub fn remove_document_listener(&self, id: ListenerId) -> bool {
        self.document.remove_listener(id)
    }

    // ────────────────────────────────────────────────────────────────
    // Blocks
    // ────────────────────────────────────────────────────────────────

    /// Append a new, open block at the end of the document.
    ///
    /// The previous block must have been closed first.
    pub fn create_block(
        &mut self,
        command: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<BlockId, OutputError> {
        if let Some(open) = self.blocks.last().filter(|b| b.is_open()) {
            return Err(OutputError::BlockStillOpen(open.id));
        }
        if !self.document.is_empty() && !self.separator_pending {
            let end = self.document.len();
            self.document.insert(end, "\n");
        }
        self.separator_pending = false;
        let block = CommandBlock::new(command, prompt, self.document.len());
        let id = block.id;
        self.blocks.push(block);
        Ok(id)
    }

    pub fn blocks(&self) -> &[CommandBlock] {
        &self.blocks
    }

    pub fn blocks_len(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, id: BlockId) -> Option<&CommandBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn last_block(&self) -> Option<&CommandBlock> {
        self.blocks.last()
    }

    /// The last block, if it is still open.
    pub fn active_block(&self) -> Option<&CommandBlock> {
        self.blocks.last().filter(|b| b.is_open())
    }

    pub fn block_text(&self, id: BlockId) -> Option<&str> {
        self.block(id).map(|b| self.document.slice(b.text_range()))
    }

    pub fn close_last_block(&mut self) {
        if let Some(block) = self.blocks.last_mut() {
            block.state = BlockState::Closed;
        }
    }

    /// Close `id` and stamp its exit code and finish time.
    pub fn finish_block(&mut self, id: BlockId, exit_code: i32) -> Result<(), OutputError> {
        let index = self.index_of(id)?;
        let block = &mut self.blocks[index];
        block.state = BlockState::Closed;
        block.exit_code = Some(exit_code);
        block.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Append `text` to the end of a block. Appending the prompt or the
    /// command moves the later section starts past the new text.
    pub fn append_to_block(
        &mut self,
        id: BlockId,
        text: &str,
        section: BlockSection,
    ) -> Result<Range<usize>, OutputError> {
        let index = self.index_of(id)?;
        let at = self.blocks[index].end_offset;
        self.edit(index, at..at, text);

        let block = &mut self.blocks[index];
        match section {
            BlockSection::Prompt => {
                block.command_start_offset = block.end_offset;
                block.output_start_offset = block.end_offset;
            }
            BlockSection::Command => block.output_start_offset = block.end_offset,
        }
        Ok(at..at + text.len())
    }

    /// Replace the block's output span `[output_start, end)` with `text`.
    pub fn replace_output(&mut self, id: BlockId, text: &str) -> Result<(), OutputError> {
        let index = self.index_of(id)?;
        let range = self.blocks[index].output_range();
        self.edit(index, range, text);
        Ok(())
    }

    /// Cut the block back to `new_end`, dropping highlightings that reach
    /// past the new end.
    pub fn truncate_block(&mut self, id: BlockId, new_end: usize) -> Result<(), OutputError> {
        let index = self.index_of(id)?;
        let block = &self.blocks[index];
        let new_end = new_end.clamp(block.start_offset, block.end_offset);
        let range = new_end..block.end_offset;
        self.edit(index, range, "");
        self.blocks[index].clamp_to_end();

        if let Some(spans) = self.highlightings.get_mut(&id) {
            spans.retain(|h| h.end <= new_end);
        }
        Ok(())
    }

    /// Delete a block together with its separator line break and rebase
    /// everything after it.
    pub fn remove_block(&mut self, id: BlockId) -> Result<(), OutputError> {
        let index = self.index_of(id)?;
        let block = &self.blocks[index];
        let has_next = index + 1 < self.blocks.len();
        let range = if block.start_offset > 0 {
            block.start_offset - 1..block.end_offset
        } else if has_next {
            block.start_offset..block.end_offset + 1
        } else {
            block.text_range()
        };

        self.document.delete(range.clone());
        self.blocks.remove(index);
        self.highlightings.remove(&id);
        self.decorations.remove(&id);
        self.shift_from(index, -(range.len() as isize));
        Ok(())
    }

    /// Append a line break after the last block. The next block uses it as
    /// its separator instead of inserting one.
    pub fn append_line_break(&mut self) {
        let end = self.document.len();
        self.document.insert(end, "\n");
        self.separator_pending = true;
    }

    pub fn clear_blocks(&mut self) {
        let len = self.document.len();
        self.document.delete(0..len);
        self.blocks.clear();
        self.highlightings.clear();
        self.decorations.clear();
        self.separator_pending = false;
    }

    // ────────────────────────────────────────────────────────────────
    // Highlightings & decorations
    // ────────────────────────────────────────────────────────────────

    pub fn put_highlightings(
        &mut self,
        id: BlockId,
        spans: Vec<Highlighting>,
    ) -> Result<(), OutputError> {
        self.index_of(id)?;
        self.highlightings.insert(id, spans);
        Ok(())
    }

    pub fn get_highlightings(&self, id: BlockId) -> Option<&[Highlighting]> {
        self.highlightings.get(&id).map(Vec::as_slice)
    }

    /// Every span of every block, in document order.
    pub fn all_highlightings(&self) -> Vec<Highlighting> {
        self.blocks
            .iter()
            .filter_map(|b| self.highlightings.get(&b.id))
            .flatten()
            .copied()
            .collect()
    }

    /// Put a normal-state decoration around the block (no-op if it has one).
    pub fn install_decoration(&mut self, id: BlockId, first_block: bool) -> Result<(), OutputError> {
        self.index_of(id)?;
        self.decorations.entry(id).or_insert(BlockDecoration {
            state: DecorationState::Normal,
            first_block,
        });
        Ok(())
    }

    /// Set the decoration state, installing the decoration if needed.
    pub fn add_block_state(&mut self, id: BlockId, state: DecorationState) -> Result<(), OutputError> {
        let index = self.index_of(id)?;
        self.decorations
            .entry(id)
            .or_insert(BlockDecoration {
                state: DecorationState::Normal,
                first_block: index == 0,
            })
            .state = state;
        Ok(())
    }

    pub fn get_decoration(&self, id: BlockId) -> Option<&BlockDecoration> {
        self.decorations.get(&id)
    }

    // ────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────

    fn index_of(&self, id: BlockId) -> Result<usize, OutputError> {
        self.blocks
            .iter()
            .position(|b| b.id == id)
            .ok_or(OutputError::UnknownBlock(id))
    }

    /// Replace `range` (inside block `index`) and move the block end and
    /// every later block by the length difference.
    fn edit(&mut self, index: usize, range: Range<usize>, text: &str) {
        let delta = text.len() as isize - range.len() as isize;
        self.document.replace(range, text);
        let block = &mut self.blocks[index];
        block.end_offset = block.end_offset.saturating_add_signed(delta);
        self.shift_from(index + 1, delta);
    }

    fn shift_from(&mut self, first: usize, delta: isize) {
        if delta == 0 {
            return;
        }
        for block in &mut self.blocks[first..] {
            block.shift(delta);
            if let Some(spans) = self.highlightings.get_mut(&block.id) {
                spans.iter_mut().for_each(|h| h.shift(delta));
            }
        }
    }
}
