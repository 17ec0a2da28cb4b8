//! Error types for the block engine.
//!
//! `OutputError` covers lifecycle-contract breaches on the UI side (asking for
//! the open block when there is none, opening a second block). `SessionError`
//! covers the session surface. Transport failures stay `anyhow::Error` at the
//! connector boundary and are wrapped here when they have to cross it.

use thiserror::Error;

use crate::blocks::BlockId;

#[derive(Debug, Error)]
pub enum OutputError {
    /// The operation needs an open block and none exists.
    #[error("no active block")]
    NoActiveBlock,

    /// `create_block` was called while another block is still open.
    #[error("block {0} is still open")]
    BlockStillOpen(BlockId),

    /// The block id is not (or no longer) part of the output model.
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("no tokio runtime available to drive the session")]
    NoRuntime,

    #[error("session disposed")]
    Disposed,

    #[error("transport error: {0:#}")]
    Transport(#[from] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
