use alacritty_terminal::term::cell::{Cell, Flags};
use alacritty_terminal::vte::ansi::{Color, NamedColor};
use serde::{Deserialize, Serialize};

/// Terminal-level color, before any palette/theme resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TermColor {
    #[default]
    Default,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl TermColor {
    pub fn from_alacritty(color: Color) -> Self {
        match color {
            Color::Spec(rgb) => TermColor::Rgb(rgb.r, rgb.g, rgb.b),
            Color::Indexed(i) => TermColor::Indexed(i),
            Color::Named(named) => Self::from_named(named),
        }
    }

    fn from_named(named: NamedColor) -> Self {
        match named {
            NamedColor::Black | NamedColor::DimBlack => TermColor::Black,
            NamedColor::Red | NamedColor::DimRed => TermColor::Red,
            NamedColor::Green | NamedColor::DimGreen => TermColor::Green,
            NamedColor::Yellow | NamedColor::DimYellow => TermColor::Yellow,
            NamedColor::Blue | NamedColor::DimBlue => TermColor::Blue,
            NamedColor::Magenta | NamedColor::DimMagenta => TermColor::Magenta,
            NamedColor::Cyan | NamedColor::DimCyan => TermColor::Cyan,
            NamedColor::White | NamedColor::DimWhite => TermColor::White,
            NamedColor::BrightBlack => TermColor::BrightBlack,
            NamedColor::BrightRed => TermColor::BrightRed,
            NamedColor::BrightGreen => TermColor::BrightGreen,
            NamedColor::BrightYellow => TermColor::BrightYellow,
            NamedColor::BrightBlue => TermColor::BrightBlue,
            NamedColor::BrightMagenta => TermColor::BrightMagenta,
            NamedColor::BrightCyan => TermColor::BrightCyan,
            NamedColor::BrightWhite => TermColor::BrightWhite,
            // Foreground/Background/Cursor and friends follow the palette.
            _ => TermColor::Default,
        }
    }
}

/// Style of a run of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextStyle {
    pub fg: TermColor,
    pub bg: TermColor,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
    pub dim: bool,
    pub strikeout: bool,
}

impl TextStyle {
    pub fn from_cell(cell: &Cell) -> Self {
        let flags = cell.flags;
        Self {
            fg: TermColor::from_alacritty(cell.fg),
            bg: TermColor::from_alacritty(cell.bg),
            bold: flags.contains(Flags::BOLD),
            italic: flags.contains(Flags::ITALIC),
            underline: flags.intersects(Flags::ALL_UNDERLINES),
            inverse: flags.contains(Flags::INVERSE),
            dim: flags.contains(Flags::DIM),
            strikeout: flags.contains(Flags::STRIKEOUT),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == TextStyle::default()
    }
}

/// A styled byte range `[start, end)` of some text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRange {
    pub start: usize,
    pub end: usize,
    pub style: TextStyle,
}

impl StyleRange {
    pub fn shifted(&self, base: usize) -> Self {
        Self {
            start: base + self.start,
            end: base + self.end,
            style: self.style,
        }
    }
}
