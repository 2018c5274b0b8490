use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use std::fmt;

/// Byte range into the source text an error points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos + 1,
        }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lexing or parsing failure.
    Syntax,
    /// Unresolved identifier.
    Reference,
    /// Operation applied to a value that cannot support it.
    Type,
    /// Out-of-range operation, including call-stack exhaustion.
    Range,
    /// A value thrown by the running program.
    Thrown,
    /// Fuel, wall-clock, or cancellation budget exhausted.
    Budget,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Thrown => "Uncaught",
            ErrorKind::Budget => "ExecutionLimit",
        }
    }
}

/// Error from any stage of the script pipeline. Carries the byte span of the
/// offending construct so callers recover an exact line/column from source
/// text alone, never by parsing a rendered message.
#[derive(Debug, Clone)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
    pub help: Option<String>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, span: Span, message: String) -> Self {
        Self {
            kind,
            span,
            message,
            help: None,
        }
    }

    pub fn new_with_help(kind: ErrorKind, span: Span, message: String, help: String) -> Self {
        Self {
            kind,
            span,
            message,
            help: Some(help),
        }
    }

    pub fn syntax(span: Span, message: String) -> Self {
        Self::new(ErrorKind::Syntax, span, message)
    }

    pub fn syntax_with_help(span: Span, message: String, help: String) -> Self {
        Self::new_with_help(ErrorKind::Syntax, span, message, help)
    }

    pub fn reference(span: Span, message: String) -> Self {
        Self::new(ErrorKind::Reference, span, message)
    }

    pub fn type_error(span: Span, message: String) -> Self {
        Self::new(ErrorKind::Type, span, message)
    }

    pub fn range(span: Span, message: String) -> Self {
        Self::new(ErrorKind::Range, span, message)
    }

    pub fn thrown(span: Span, message: String) -> Self {
        Self::new(ErrorKind::Thrown, span, message)
    }

    pub fn budget(span: Span, message: String) -> Self {
        Self::new(ErrorKind::Budget, span, message)
    }

    /// Headline in the shape a browser console uses:
    /// `TypeError: x is not a function`, `Uncaught Error: boom`.
    pub fn headline(&self) -> String {
        match self.kind {
            ErrorKind::Thrown => format!("{} {}", self.kind.label(), self.message),
            _ => format!("{}: {}", self.kind.label(), self.message),
        }
    }

    /// 1-based line and column of the error's start within `source`.
    /// Columns count characters. The offset is clamped so a span at
    /// end-of-input resolves to the last line.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        resolve_line_col(source, self.span.start)
    }

    /// Plain-text diagnostic block: headline, location, then a numbered
    /// context window showing the offending line and its immediate
    /// neighbors, with a marker on the offending line and a caret under
    /// the column. Degrades to the headline alone when the source has no
    /// line to show.
    pub fn annotate(&self, source: &str) -> String {
        let mut out = self.headline();

        if source.is_empty() {
            return out;
        }

        let (line, col) = self.line_col(source);
        out.push_str(&format!("\n  at line {line}, column {col}"));

        let lines: Vec<&str> = source.lines().collect();
        if line > lines.len() {
            return out;
        }

        let first = if line > 1 { line - 1 } else { line };
        let last = (line + 1).min(lines.len());
        let width = digits(last);

        out.push('\n');
        for n in first..=last {
            let marker = if n == line { '>' } else { ' ' };
            out.push_str(&format!("\n{marker} {n:>width$} | {}", lines[n - 1]));
            if n == line {
                let pad = " ".repeat(col.saturating_sub(1));
                out.push_str(&format!("\n  {} | {pad}^", " ".repeat(width)));
            }
        }

        if let Some(help) = &self.help {
            out.push_str(&format!("\n\nhelp: {help}"));
        }

        out
    }

    /// Pretty-print an annotated report to the terminal.
    pub fn report(&self, source: &str, filename: Option<&str>) {
        let filename = filename.unwrap_or("<input>");

        let color = match self.kind {
            ErrorKind::Syntax => Color::Yellow,
            ErrorKind::Budget => Color::Cyan,
            _ => Color::Magenta,
        };

        let end = self.span.end.max(self.span.start + 1).min(source.len().max(1));
        let start = self.span.start.min(end.saturating_sub(1));

        let mut report_builder = Report::build(ReportKind::Error, filename, start)
            .with_message(format!("{}: {}", self.kind.label().fg(color), self.message))
            .with_label(
                Label::new((filename, start..end))
                    .with_message(&self.message)
                    .with_color(color),
            );

        if let Some(ref help_text) = self.help {
            report_builder =
                report_builder.with_note(format!("{}: {}", "help".fg(Color::Cyan), help_text));
        }

        let _ = report_builder
            .finish()
            .print((filename, Source::from(source)));
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.headline())
    }
}

impl std::error::Error for ScriptError {}

fn resolve_line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut line_start = 0;
    for (i, b) in source.bytes().enumerate() {
        if i >= offset {
            break;
        }
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    let col = source[line_start..offset].chars().count() + 1;
    (line, col)
}

fn digits(n: usize) -> usize {
    let mut n = n;
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_resolves_across_lines() {
        let source = "let a = 1\nlet b = 2\nboom";
        let err = ScriptError::reference(Span::new(20, 24), "boom is not defined".to_string());
        assert_eq!(err.line_col(source), (3, 1));
    }

    #[test]
    fn line_col_counts_chars_not_bytes() {
        let source = "let s = \"héé\" + oops";
        let byte_pos = source.find("oops").unwrap();
        let err = ScriptError::reference(Span::new(byte_pos, byte_pos + 4), "x".to_string());
        assert_eq!(err.line_col(source), (1, 19));
    }

    #[test]
    fn line_col_clamps_past_end() {
        let source = "x";
        let err = ScriptError::syntax(Span::single(40), "unexpected end of input".to_string());
        assert_eq!(err.line_col(source), (1, 2));
    }

    #[test]
    fn annotate_marks_offending_line_with_caret() {
        let source = "let a = 1\nlet b = oops\nlet c = 3";
        let err = ScriptError::reference(Span::new(18, 22), "oops is not defined".to_string());
        let block = err.annotate(source);

        assert!(block.starts_with("ReferenceError: oops is not defined"));
        assert!(block.contains("at line 2, column 9"));
        assert!(block.contains("> 2 | let b = oops"));
        assert!(block.contains("  1 | let a = 1"));
        assert!(block.contains("  3 | let c = 3"));

        let caret_line = block.lines().find(|l| l.trim_start().starts_with('|')).map(|_| ());
        assert!(caret_line.is_some());
        let caret = block.lines().find(|l| l.ends_with('^')).unwrap();
        assert_eq!(caret.chars().filter(|c| *c == '^').count(), 1);
        // caret sits under column 9 of the source line: "  N | " prefix is 6 wide
        assert_eq!(caret.chars().count(), 6 + 9 - 1 + 1);
    }

    #[test]
    fn annotate_first_line_window_has_no_line_zero() {
        let source = "boom()\nlet a = 1";
        let err = ScriptError::type_error(Span::new(0, 4), "boom is not a function".to_string());
        let block = err.annotate(source);
        assert!(block.contains("> 1 | boom()"));
        assert!(block.contains("  2 | let a = 1"));
        assert!(!block.contains(" 0 |"));
    }

    #[test]
    fn annotate_empty_source_is_headline_only() {
        let err = ScriptError::thrown(Span::single(0), "\"boom\"".to_string());
        assert_eq!(err.annotate(""), "Uncaught \"boom\"");
    }

    #[test]
    fn annotate_includes_help_note() {
        let err = ScriptError::syntax_with_help(
            Span::single(0),
            "expected ')' after arguments".to_string(),
            "function calls need closing parentheses".to_string(),
        );
        assert!(err.annotate("f(1").contains("help: function calls need closing parentheses"));
    }

    #[test]
    fn headline_shapes() {
        let t = ScriptError::thrown(Span::single(0), "Error: boom".to_string());
        assert_eq!(t.headline(), "Uncaught Error: boom");
        let r = ScriptError::reference(Span::single(0), "x is not defined".to_string());
        assert_eq!(r.headline(), "ReferenceError: x is not defined");
    }
}
