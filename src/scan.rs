use unicode_xid::UnicodeXID;

/// Lexical class of a display token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Str,
    Number,
    Comment,
    Ident,
    Builtin,
    Function,
    Constant,
    Operator,
    Bracket,
    Plain,
}

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Keyword => "keyword",
            TokenKind::Str => "string",
            TokenKind::Number => "number",
            TokenKind::Comment => "comment",
            TokenKind::Ident => "identifier",
            TokenKind::Builtin => "builtin",
            TokenKind::Function => "function",
            TokenKind::Constant => "constant",
            TokenKind::Operator => "operator",
            TokenKind::Bracket => "bracket",
            TokenKind::Plain => "plain",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Scan `source` into classified display tokens. Never fails; concatenating
/// the token texts reproduces `source` exactly, so unterminated literals
/// degrade to the longest token available rather than being dropped.
pub fn scan(source: &str) -> Vec<Token> {
    Scanner::new(source).scan_all()
}

const OPERATOR_CHARS: &str = "+-*/%=<>!&|?:.,;~^";
const BRACKET_CHARS: &str = "()[]{}";

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "break"
            | "const"
            | "continue"
            | "else"
            | "for"
            | "function"
            | "if"
            | "let"
            | "new"
            | "of"
            | "return"
            | "throw"
            | "typeof"
            | "var"
            | "while"
            | "do"
            | "case"
            | "switch"
            | "default"
    )
}

fn is_constant(word: &str) -> bool {
    matches!(
        word,
        "true" | "false" | "null" | "undefined" | "NaN" | "Infinity"
    )
}

fn is_builtin(word: &str) -> bool {
    matches!(
        word,
        "console"
            | "Math"
            | "JSON"
            | "String"
            | "Number"
            | "Boolean"
            | "Array"
            | "Object"
            | "Error"
            | "parseInt"
            | "parseFloat"
            | "isNaN"
    )
}

fn is_ident_start(c: char) -> bool {
    c.is_xid_start() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_xid_continue() || c == '$'
}

struct Scanner {
    chars: Vec<char>,
    start: usize,
    current: usize,
    tokens: Vec<Token>,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            tokens: Vec::new(),
        }
    }

    fn scan_all(mut self) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token();
        }
        self.tokens
    }

    fn scan_token(&mut self) {
        let c = self.advance();
        match c {
            '/' if self.peek() == Some('/') => self.line_comment(),
            '/' if self.peek() == Some('*') => self.block_comment(),
            '`' => self.template_string(),
            '\'' | '"' => self.quoted_string(c),
            '0' if matches!(self.peek(), Some('x') | Some('X'))
                && self.peek_next().is_some_and(|d| d.is_ascii_hexdigit()) =>
            {
                self.advance();
                while self.peek().is_some_and(|d| d.is_ascii_hexdigit()) {
                    self.advance();
                }
                self.push(TokenKind::Number);
            }
            c if c.is_ascii_digit() => self.number(),
            c if is_ident_start(c) => self.identifier(),
            c if OPERATOR_CHARS.contains(c) => self.operator_run(),
            c if BRACKET_CHARS.contains(c) => self.push(TokenKind::Bracket),
            _ => self.push(TokenKind::Plain),
        }
    }

    fn line_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.advance();
        }
        self.push(TokenKind::Comment);
    }

    fn block_comment(&mut self) {
        self.advance(); // the '*'
        while !self.is_at_end() {
            if self.peek() == Some('*') && self.peek_next() == Some('/') {
                self.advance();
                self.advance();
                break;
            }
            self.advance();
        }
        self.push(TokenKind::Comment);
    }

    // Backtick templates honor escapes and may span newlines; run to
    // end-of-input when unterminated.
    fn template_string(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.advance();
                if !self.is_at_end() {
                    self.advance();
                }
            } else if c == '`' {
                self.advance();
                break;
            } else {
                self.advance();
            }
        }
        self.push(TokenKind::Str);
    }

    // Quoted strings stop at the line boundary: an unterminated string ends
    // before the newline, without its closing quote.
    fn quoted_string(&mut self, quote: char) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            if c == '\\' {
                self.advance();
                if self.peek().is_some_and(|n| n != '\n') {
                    self.advance();
                }
            } else if c == quote {
                self.advance();
                break;
            } else {
                self.advance();
            }
        }
        self.push(TokenKind::Str);
    }

    fn number(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut ahead = self.current + 1;
            if matches!(self.chars.get(ahead), Some('+') | Some('-')) {
                ahead += 1;
            }
            if self.chars.get(ahead).is_some_and(|c| c.is_ascii_digit()) {
                while self.current < ahead {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        self.push(TokenKind::Number);
    }

    fn identifier(&mut self) {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let word: String = self.chars[self.start..self.current].iter().collect();
        let kind = if is_keyword(&word) {
            TokenKind::Keyword
        } else if is_constant(&word) {
            TokenKind::Constant
        } else if is_builtin(&word) {
            TokenKind::Builtin
        } else if self.peek() == Some('(') {
            TokenKind::Function
        } else {
            TokenKind::Ident
        };
        self.push(kind);
    }

    // Greedy run of operator characters, capped at three. Stops short of a
    // comment opener so `a=//x` keeps its comment.
    fn operator_run(&mut self) {
        while self.current - self.start < 3 {
            match self.peek() {
                Some(c) if OPERATOR_CHARS.contains(c) => {
                    if c == '/' && matches!(self.peek_next(), Some('/') | Some('*')) {
                        break;
                    }
                    self.advance();
                }
                _ => break,
            }
        }
        self.push(TokenKind::Operator);
    }

    fn push(&mut self, kind: TokenKind) {
        let text: String = self.chars[self.start..self.current].iter().collect();
        self.tokens.push(Token { kind, text });
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }
}
