//! Streaming decoder for the shell-integration OSC markers.
//!
//! Understands the FinalTerm/iTerm2 `133` family and its VS Code flavour
//! `633` (which can also carry the command line), plus OSC 7 for the cwd.
//! Sequences may be split across reads; the decoder keeps its state between
//! calls to [`OscDecoder::feed`].

/// A decoded marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OscEvent {
    /// `7;file://host/path`
    Cwd(String),
    /// `133;A` prompt about to be printed.
    PromptStart,
    /// `133;B` prompt printed, user input begins.
    CommandStart,
    /// `133;C` input accepted, command output begins.
    CommandExecuted,
    /// `133;D[;exit]`
    CommandFinished { exit_code: Option<i32> },
    /// `633;E;<command line>`
    CommandLine(String),
}

/// Where a sequence ended (one past its terminator) within the fed chunk.
pub type Located<T> = (usize, T);

#[derive(Debug, Default, Clone)]
pub struct OscDecoder {
    state: State,
    payload: Vec<u8>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Ground,
    Escape,
    Payload,
    PayloadEscape,
}

/// Payloads longer than this are not shell markers; stop buffering them.
const MAX_PAYLOAD: usize = 4096;

impl OscDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Located<OscEvent>> {
        let mut out = Vec::new();

        for (i, &b) in bytes.iter().enumerate() {
            self.state = match self.state {
                // C1 introducers (0x9d/0x9c) are not recognised: in a UTF-8
                // stream those bytes are continuation bytes.
                State::Ground => match b {
                    0x1b => State::Escape,
                    _ => State::Ground,
                },
                State::Escape => match b {
                    b']' => self.begin(),
                    0x1b => State::Escape,
                    _ => State::Ground,
                },
                State::Payload => match b {
                    0x07 => {
                        self.finish(i + 1, &mut out);
                        State::Ground
                    }
                    0x1b => State::PayloadEscape,
                    _ => {
                        if self.payload.len() < MAX_PAYLOAD {
                            self.payload.push(b);
                        }
                        State::Payload
                    }
                },
                State::PayloadEscape => {
                    if b == b'\\' {
                        self.finish(i + 1, &mut out);
                        State::Ground
                    } else if b == b']' {
                        // A new OSC started before the old one was terminated.
                        self.begin()
                    } else {
                        State::Ground
                    }
                }
            };
        }

        out
    }

    fn begin(&mut self) -> State {
        self.payload.clear();
        State::Payload
    }

    fn finish(&mut self, end: usize, out: &mut Vec<Located<OscEvent>>) {
        let payload = String::from_utf8_lossy(&self.payload).into_owned();
        self.payload.clear();
        if let Some(event) = parse_payload(&payload) {
            out.push((end, event));
        }
    }
}

fn parse_payload(payload: &str) -> Option<OscEvent> {
    let payload = payload.trim_matches('\0');

    if let Some(uri) = payload.strip_prefix("7;") {
        return Some(OscEvent::Cwd(decode_file_uri(uri)));
    }

    let marker = payload
        .strip_prefix("133;")
        .or_else(|| payload.strip_prefix("633;"))?;
    let mut fields = marker.split(';');
    match fields.next()? {
        "A" => Some(OscEvent::PromptStart),
        "B" => Some(OscEvent::CommandStart),
        "C" => Some(OscEvent::CommandExecuted),
        "D" => Some(OscEvent::CommandFinished {
            exit_code: fields.next().and_then(|code| code.trim().parse().ok()),
        }),
        "E" => Some(OscEvent::CommandLine(unescape_command_line(
            fields.next().unwrap_or_default(),
        ))),
        _ => None,
    }
}

/// `633;E` escapes `\` as `\\` and control bytes as `\xNN`.
fn unescape_command_line(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            Some('x') => {
                chars.next();
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) => out.push(byte as char),
                    Err(_) => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}

fn decode_file_uri(uri: &str) -> String {
    let uri = uri.trim();
    let Some(rest) = uri.strip_prefix("file://") else {
        return uri.to_string();
    };
    // Drop the host part: file://host/path -> /path
    let path = match rest.find('/') {
        Some(slash) => &rest[slash..],
        None => rest,
    };
    percent_decode(path)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
