use super::osc::Located;

/// Mode transitions the block engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// DEC private 47 / 1047 / 1049 set or reset.
    AlternateBuffer(bool),
    /// `CSI 3 J`: the program asked to drop the scrollback (`clear`).
    ClearScrollback,
}

/// Lightweight CSI tracker, chunk-safe.
///
/// Only reports alternate-buffer *transitions*: a program that sets 1049
/// twice produces one event.
#[derive(Debug, Default, Clone)]
pub struct ModeTracker {
    alt_screen: bool,

    state: ParseState,
    cur_num: Option<u16>,
    nums: Vec<u16>,
    marker: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ParseState {
    #[default]
    Ground,
    Esc,
    Csi,
}

impl ModeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alt_screen(&self) -> bool {
        self.alt_screen
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Located<ModeEvent>> {
        let mut out = Vec::new();

        for (i, &b) in bytes.iter().enumerate() {
            match self.state {
                ParseState::Ground => {
                    if b == 0x1b {
                        self.state = ParseState::Esc;
                    }
                }
                ParseState::Esc => {
                    if b == b'[' {
                        self.state = ParseState::Csi;
                        self.marker = None;
                        self.cur_num = None;
                        self.nums.clear();
                    } else if b != 0x1b {
                        self.state = ParseState::Ground;
                    }
                }
                ParseState::Csi => {
                    let fresh = self.nums.is_empty() && self.cur_num.is_none();
                    if fresh && self.marker.is_none() && matches!(b, b'?' | b'>' | b'<' | b'=') {
                        self.marker = Some(b);
                        continue;
                    }

                    if b.is_ascii_digit() {
                        let d = (b - b'0') as u16;
                        self.cur_num = Some(self.cur_num.unwrap_or(0).saturating_mul(10).saturating_add(d));
                        continue;
                    }

                    if b == b';' || b == b':' {
                        self.nums.push(self.cur_num.take().unwrap_or(0));
                        continue;
                    }

                    // Intermediate bytes: keep collecting until the final byte.
                    if (0x20..=0x2f).contains(&b) {
                        continue;
                    }

                    if let Some(n) = self.cur_num.take() {
                        self.nums.push(n);
                    }
                    if let Some(event) = self.dispatch(b) {
                        out.push((i + 1, event));
                    }
                    self.state = ParseState::Ground;
                }
            }
        }

        out
    }

    fn dispatch(&mut self, final_byte: u8) -> Option<ModeEvent> {
        match (self.marker, final_byte) {
            (Some(b'?'), b'h' | b'l') => {
                let set = final_byte == b'h';
                let touches_alt = self
                    .nums
                    .iter()
                    .any(|&m| matches!(m, 47 | 1047 | 1049));
                if touches_alt && self.alt_screen != set {
                    self.alt_screen = set;
                    return Some(ModeEvent::AlternateBuffer(set));
                }
                None
            }
            (None, b'J') if self.nums.as_slice() == [3] => Some(ModeEvent::ClearScrollback),
            _ => None,
        }
    }
}
