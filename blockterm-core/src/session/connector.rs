use anyhow::{Context, Result};
use portable_pty::{Child, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};
use std::io::{Read, Write};

use crate::term::TermSize;

/// Byte-stream transport to the shell.
///
/// The session takes the reader once, on start, and hands it to the reader
/// thread. Everything else is called from async tasks.
pub trait TtyConnector: Send {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>>;

    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    fn resize(&mut self, size: TermSize) -> Result<()>;

    /// Close the transport. The reader must see EOF afterwards.
    fn close(&mut self) -> Result<()>;
}

/// A shell running on a native pseudo-terminal.
pub struct PtyConnector {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    child: Option<Box<dyn Child + Send + Sync>>,
}

impl std::fmt::Debug for PtyConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyConnector")
            .field("writer", &self.writer.is_some())
            .field("child", &self.child.as_ref().and_then(|c| c.process_id()))
            .finish()
    }
}

impl PtyConnector {
    /// Spawn `shell` (or the platform default) on a fresh PTY.
    pub fn spawn(size: TermSize, shell: Option<&str>) -> Result<Self> {
        let pty_system = NativePtySystem::default();
        let pair = pty_system
            .openpty(pty_size(size))
            .context("Failed to open PTY")?;

        let child = pair
            .slave
            .spawn_command(shell_command(shell))
            .context("Failed to spawn shell process")?;
        // Only the child may hold the slave end, or the reader never sees EOF.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        tracing::info!(pid = ?child.process_id(), "shell spawned");
        Ok(Self {
            master: pair.master,
            writer: Some(writer),
            child: Some(child),
        })
    }

    pub fn child_is_alive(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | None => false,
            Some(Err(_)) => true,
        }
    }
}

impl TtyConnector for PtyConnector {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>> {
        self.master
            .try_clone_reader()
            .context("Failed to clone PTY reader")
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().context("PTY writer already closed")?;
        writer.write_all(bytes).context("Failed to write to PTY")?;
        writer.flush().context("Failed to flush PTY writer")
    }

    fn resize(&mut self, size: TermSize) -> Result<()> {
        self.master
            .resize(pty_size(size))
            .context("Failed to resize PTY")
    }

    fn close(&mut self) -> Result<()> {
        self.writer.take();
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait().context("Failed to poll shell process")?.is_none() {
            child.kill().context("Failed to kill shell process")?;
        }
        child.wait().context("Failed to reap shell process")?;
        Ok(())
    }
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.columns,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn shell_command(shell: Option<&str>) -> CommandBuilder {
    if let Some(shell) = shell {
        return CommandBuilder::new(shell);
    }
    if cfg!(windows) {
        let mut cmd = CommandBuilder::new("powershell.exe");
        cmd.arg("-NoLogo");
        cmd.arg("-NoExit");
        cmd
    } else {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        CommandBuilder::new(shell)
    }
}

/// Line terminator the platform's shells accept as Enter.
pub(crate) fn line_ending() -> &'static str {
    if cfg!(windows) {
        "\r\n"
    } else {
        "\n"
    }
}
