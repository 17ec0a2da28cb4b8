use crate::dispatch::{UiDispatcher, UiEvent};
use crate::scraper::{CommandOutputListener, OutputScraper, StyledOutput};
use crate::session::{ShellCommandListener, TerminalModelListener};

/// Turns background-thread callbacks into queued UI events.
///
/// Never touches the document; only snapshots the model (short read lock)
/// and posts.
pub(crate) struct UiForwarder {
    dispatcher: UiDispatcher,
    scraper: OutputScraper,
}

impl UiForwarder {
    pub(crate) fn new(dispatcher: UiDispatcher, scraper: OutputScraper) -> Self {
        Self {
            dispatcher,
            scraper,
        }
    }
}

impl CommandOutputListener for UiForwarder {
    fn command_output_changed(&self, output: StyledOutput) {
        self.dispatcher.post(UiEvent::OutputChanged(output));
    }
}

impl ShellCommandListener for UiForwarder {
    fn command_started(&self, command: Option<&str>, prompt: Option<&str>) {
        self.dispatcher.post(UiEvent::CommandStarted {
            command: command.map(str::to_string),
            prompt: prompt.map(str::to_string),
            epoch: self.scraper.model().epoch(),
        });
    }

    fn command_finished(&self, exit_code: i32) {
        self.dispatcher.post(UiEvent::CommandFinished {
            exit_code,
            output: self.scraper.scrape_output(),
        });
    }

    fn clear_invoked(&self) {
        self.dispatcher.post(UiEvent::Cleared);
    }
}

impl TerminalModelListener for UiForwarder {
    fn on_alternate_buffer_changed(&self, enabled: bool) {
        self.dispatcher.post(UiEvent::AlternateBufferChanged(enabled));
    }
}
