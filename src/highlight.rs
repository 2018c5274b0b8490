use crate::scan::{scan, Token, TokenKind};
use colored::Colorize;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// RGB color, serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_rgb_u32(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xFF) as u8,
            g: ((rgb >> 8) & 0xFF) as u8,
            b: (rgb & 0xFF) as u8,
        }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let rgb = u32::from_str_radix(digits, 16).ok()?;
        Some(Self::from_rgb_u32(rgb))
    }

    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Color::from_hex(&text)
            .ok_or_else(|| D::Error::custom(format!("invalid color `{text}`, expected #RRGGBB")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub color: Color,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
}

impl Style {
    pub const fn plain(color: Color) -> Self {
        Self {
            color,
            bold: false,
            italic: false,
        }
    }

    pub const fn bold(color: Color) -> Self {
        Self {
            color,
            bold: true,
            italic: false,
        }
    }

    pub const fn italic(color: Color) -> Self {
        Self {
            color,
            bold: false,
            italic: true,
        }
    }
}

/// Maps every token kind to a display style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub keyword: Style,
    pub string: Style,
    pub number: Style,
    pub comment: Style,
    pub identifier: Style,
    pub builtin: Style,
    pub function: Style,
    pub constant: Style,
    pub operator: Style,
    pub bracket: Style,
    pub plain: Style,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            keyword: Style::plain(Color::from_rgb_u32(0x569CD6)),
            string: Style::plain(Color::from_rgb_u32(0xCE9178)),
            number: Style::plain(Color::from_rgb_u32(0xB5CEA8)),
            comment: Style::italic(Color::from_rgb_u32(0x6A9955)),
            identifier: Style::plain(Color::from_rgb_u32(0x9CDCFE)),
            builtin: Style::plain(Color::from_rgb_u32(0x4EC9B0)),
            function: Style::plain(Color::from_rgb_u32(0xDCDCAA)),
            constant: Style::plain(Color::from_rgb_u32(0x4FC1FF)),
            operator: Style::plain(Color::from_rgb_u32(0xD4D4D4)),
            bracket: Style::plain(Color::from_rgb_u32(0xD4D4D4)),
            plain: Style::plain(Color::from_rgb_u32(0xD4D4D4)),
        }
    }

    pub fn light() -> Self {
        Self {
            keyword: Style::bold(Color::from_rgb_u32(0x0000FF)),
            string: Style::plain(Color::from_rgb_u32(0xA31515)),
            number: Style::plain(Color::from_rgb_u32(0x098658)),
            comment: Style::italic(Color::from_rgb_u32(0x008000)),
            identifier: Style::plain(Color::from_rgb_u32(0x001080)),
            builtin: Style::plain(Color::from_rgb_u32(0x267F99)),
            function: Style::plain(Color::from_rgb_u32(0x795E26)),
            constant: Style::plain(Color::from_rgb_u32(0x0070C1)),
            operator: Style::plain(Color::from_rgb_u32(0x000000)),
            bracket: Style::plain(Color::from_rgb_u32(0x000000)),
            plain: Style::plain(Color::from_rgb_u32(0x000000)),
        }
    }

    pub fn style(&self, kind: TokenKind) -> Style {
        match kind {
            TokenKind::Keyword => self.keyword,
            TokenKind::Str => self.string,
            TokenKind::Number => self.number,
            TokenKind::Comment => self.comment,
            TokenKind::Ident => self.identifier,
            TokenKind::Builtin => self.builtin,
            TokenKind::Function => self.function,
            TokenKind::Constant => self.constant,
            TokenKind::Operator => self.operator,
            TokenKind::Bracket => self.bracket,
            TokenKind::Plain => self.plain,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

/// Styled character range over the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyledSpan {
    pub start: usize,
    pub end: usize,
    pub style: Style,
}

/// Map a token stream onto styled char ranges. Pure; spans tile the input
/// in order with no gaps.
pub fn highlight(tokens: &[Token], theme: &Theme) -> Vec<StyledSpan> {
    let mut spans = Vec::with_capacity(tokens.len());
    let mut pos = 0;
    for token in tokens {
        let len = token.text.chars().count();
        spans.push(StyledSpan {
            start: pos,
            end: pos + len,
            style: theme.style(token.kind),
        });
        pos += len;
    }
    spans
}

/// Render one line of source as an ANSI-colored string for terminal output.
pub fn ansi_line(line: &str, theme: &Theme) -> String {
    let mut out = String::with_capacity(line.len());
    for token in scan(line) {
        let style = theme.style(token.kind);
        let mut piece = token
            .text
            .truecolor(style.color.r, style.color.g, style.color.b);
        if style.bold {
            piece = piece.bold();
        }
        if style.italic {
            piece = piece.italic();
        }
        out.push_str(&piece.to_string());
    }
    out
}
