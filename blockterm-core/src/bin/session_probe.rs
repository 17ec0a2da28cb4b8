// blockterm-core/src/bin/session_probe.rs

use anyhow::{Context, Result};
use blockterm_core::blocks::BlockState;
use blockterm_core::{OutputController, PtyConnector, SessionConfig, TerminalSession};
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // RUST_LOG=blockterm_core=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    eprintln!("[session_probe] starting… (Ctrl+C to exit)");

    // Optional JSON config path as the only argument.
    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => SessionConfig::default(),
    };

    let connector = PtyConnector::spawn(config.size(), config.shell.as_deref())
        .context("PtyConnector::spawn failed")?;
    let (session, queue) = TerminalSession::new(config).context("TerminalSession::new failed")?;
    let mut controller = OutputController::for_session(&session, queue);
    session.add_termination_callback(|| eprintln!("\n[session_probe] shell exited"));
    session
        .start(Box::new(connector))
        .context("TerminalSession::start failed")?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let mut printed = HashSet::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[session_probe] Ctrl+C received, exiting…");
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line.context("stdin read failed")? else {
                    eprintln!("\n[session_probe] stdin closed, exiting…");
                    break;
                };
                let _ = session.send_command_to_execute(&line);
            }

            _ = tick.tick() => {
                controller.pump();
                print_finished_blocks(&controller, &mut printed);
                if controller.is_terminated() {
                    break;
                }
            }
        }
    }

    session.dispose();
    controller.pump();
    Ok(())
}

fn print_finished_blocks(controller: &OutputController, printed: &mut HashSet<blockterm_core::BlockId>) {
    let model = controller.output_model();
    for block in model.blocks() {
        if block.state != BlockState::Closed || !printed.insert(block.id) {
            continue;
        }
        let text = model.block_text(block.id).unwrap_or_default();
        println!("┌─ exit {:?}", block.exit_code);
        for line in text.lines() {
            println!("│ {line}");
        }
        println!("└─ {} ms", block.duration().map_or(0, |d| d.num_milliseconds()));
    }
}
