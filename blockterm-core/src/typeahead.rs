//! Local echo prediction ("type-ahead").
//!
//! Printable keystrokes are shown at the cursor before the shell echoes
//! them. Every confirmed buffer change is checked against the pending
//! predictions: an echoed character confirms its prediction, a different
//! character invalidates it and everything typed after it. Predictions the
//! shell never echoes are dropped by the [`Debouncer`].
//!
//! Predictions are never edited in place. They move from `Pending` to
//! `Confirmed` or `Invalidated` and are pruned afterwards.

use std::time::{Duration, Instant};

use crate::config::TypeAheadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredictionToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionState {
    Pending,
    Confirmed,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub token: PredictionToken,
    pub character: char,
    /// Grid column the character is expected to land in.
    pub column: usize,
    pub state: PredictionState,
    pub created_at: Instant,
}

impl Prediction {
    pub fn is_pending(&self) -> bool {
        self.state == PredictionState::Pending
    }
}

/// Trailing-edge debouncer with an upper bound.
///
/// Each `schedule` pushes the deadline out by `delay`, but never past
/// `max_delay` after the first call of the current burst.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    max_delay: Duration,
    first_call: Option<Instant>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay,
            max_delay: max_delay.max(delay),
            first_call: None,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        let first = *self.first_call.get_or_insert(now);
        self.deadline = Some((now + self.delay).min(first + self.max_delay));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn terminate(&mut self) {
        self.first_call = None;
        self.deadline = None;
    }
}

#[derive(Debug, Clone)]
pub struct TypeAheadPredictor {
    enabled: bool,
    predictions: Vec<Prediction>,
    next_token: u64,
    debouncer: Debouncer,
}

impl TypeAheadPredictor {
    pub fn new(config: &TypeAheadConfig) -> Self {
        Self {
            enabled: config.enabled,
            predictions: Vec::new(),
            next_token: 0,
            debouncer: Debouncer::new(config.debounce(), config.max_delay()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Predict the echo of `text` typed with the cursor at `cursor_column`.
    ///
    /// Anything that is not plain printable text (Enter, Backspace, arrow
    /// keys, ...) moves the cursor in ways we don't model, so it clears
    /// the predictions instead.
    pub fn on_key_typed(
        &mut self,
        text: &str,
        cursor_column: usize,
        now: Instant,
    ) -> Vec<PredictionToken> {
        if !self.enabled {
            return Vec::new();
        }
        if text.is_empty() || text.chars().any(char::is_control) {
            self.clear_predictions();
            return Vec::new();
        }
        self.prune();

        let mut column = self
            .predictions
            .last()
            .map_or(cursor_column, |last| last.column + 1);
        let mut tokens = Vec::with_capacity(text.len());
        for character in text.chars() {
            let token = PredictionToken(self.next_token);
            self.next_token += 1;
            self.predictions.push(Prediction {
                token,
                character,
                column,
                state: PredictionState::Pending,
                created_at: now,
            });
            tokens.push(token);
            column += 1;
        }
        self.debouncer.schedule(now);
        tokens
    }

    /// Match pending predictions against the confirmed cursor row.
    ///
    /// Columns left of the cursor have been written by the shell: a matching
    /// character confirms, anything else invalidates that prediction and all
    /// later ones. Columns at or past the cursor are still in flight.
    pub fn reconcile(&mut self, line: &[char], cursor_column: usize) {
        let mut broken = false;
        for prediction in self.predictions.iter_mut().filter(|p| p.is_pending()) {
            if broken {
                prediction.state = PredictionState::Invalidated;
                continue;
            }
            if prediction.column >= cursor_column {
                continue;
            }
            if line.get(prediction.column) == Some(&prediction.character) {
                prediction.state = PredictionState::Confirmed;
            } else {
                tracing::trace!(
                    column = prediction.column,
                    expected = %prediction.character,
                    "type-ahead misprediction"
                );
                prediction.state = PredictionState::Invalidated;
                broken = true;
            }
        }
        if !self.has_pending() {
            self.debouncer.terminate();
        }
    }

    /// Drop unconfirmed predictions once the debounce deadline has passed.
    /// Returns whether anything was cleared.
    pub fn debounce(&mut self, now: Instant) -> bool {
        if !self.debouncer.is_due(now) {
            return false;
        }
        let cleared = self.has_pending();
        self.clear_predictions();
        cleared
    }

    pub fn clear_predictions(&mut self) {
        for prediction in &mut self.predictions {
            if prediction.is_pending() {
                prediction.state = PredictionState::Invalidated;
            }
        }
        self.debouncer.terminate();
    }

    pub fn on_resize(&mut self) {
        self.clear_predictions();
    }

    pub fn on_alternate_buffer_changed(&mut self, _enabled: bool) {
        self.clear_predictions();
    }

    pub fn on_command_changed(&mut self) {
        self.clear_predictions();
    }

    pub fn has_pending(&self) -> bool {
        self.predictions.iter().any(Prediction::is_pending)
    }

    /// Predictions that should currently be drawn over the grid.
    pub fn overlay(&self) -> Vec<Prediction> {
        self.predictions
            .iter()
            .filter(|p| p.is_pending())
            .cloned()
            .collect()
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Forget settled predictions.
    pub fn prune(&mut self) {
        self.predictions.retain(Prediction::is_pending);
    }
}
