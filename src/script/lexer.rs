use crate::error::{ScriptError, Span};
use std::collections::HashMap;
use unicode_xid::UnicodeXID;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Question,
    Percent,

    // One to three character tokens
    Plus,
    PlusPlus,
    PlusEqual,
    Minus,
    MinusMinus,
    MinusEqual,
    Star,
    StarEqual,
    Slash,
    SlashEqual,
    Bang,
    BangEqual,
    BangEqualEqual,
    Equal,
    EqualEqual,
    EqualEqualEqual,
    Arrow,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    AmpAmp,
    PipePipe,

    // Literals
    Identifier,
    Str,
    Template,
    Number,

    // Keywords
    Let,
    Const,
    Var,
    Function,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    Throw,
    New,
    Typeof,
    True,
    False,
    Null,

    // Special
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: String, span: Span) -> Self {
        Self {
            token_type,
            lexeme,
            span,
        }
    }
}

pub struct Lexer {
    chars: Vec<(usize, char)>,
    source_len: usize,
    offset: usize,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    keywords: HashMap<&'static str, TokenType>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self::with_offset(source, 0)
    }

    /// Lex a slice of a larger source, producing spans relative to the full
    /// text. Used for the expression chunks of template literals.
    pub fn with_offset(source: &str, offset: usize) -> Self {
        let mut keywords = HashMap::new();
        keywords.insert("let", TokenType::Let);
        keywords.insert("const", TokenType::Const);
        keywords.insert("var", TokenType::Var);
        keywords.insert("function", TokenType::Function);
        keywords.insert("if", TokenType::If);
        keywords.insert("else", TokenType::Else);
        keywords.insert("while", TokenType::While);
        keywords.insert("for", TokenType::For);
        keywords.insert("return", TokenType::Return);
        keywords.insert("break", TokenType::Break);
        keywords.insert("continue", TokenType::Continue);
        keywords.insert("throw", TokenType::Throw);
        keywords.insert("new", TokenType::New);
        keywords.insert("typeof", TokenType::Typeof);
        keywords.insert("true", TokenType::True);
        keywords.insert("false", TokenType::False);
        keywords.insert("null", TokenType::Null);

        Self {
            chars: source.char_indices().collect(),
            source_len: source.len(),
            offset,
            tokens: Vec::new(),
            start: 0,
            current: 0,
            keywords,
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, ScriptError> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenType::Eof,
            String::new(),
            Span::single(self.offset + self.source_len),
        ));

        Ok(std::mem::take(&mut self.tokens))
    }

    fn scan_token(&mut self) -> Result<(), ScriptError> {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenType::LeftParen),
            ')' => self.add_token(TokenType::RightParen),
            '{' => self.add_token(TokenType::LeftBrace),
            '}' => self.add_token(TokenType::RightBrace),
            '[' => self.add_token(TokenType::LeftBracket),
            ']' => self.add_token(TokenType::RightBracket),
            ',' => self.add_token(TokenType::Comma),
            ':' => self.add_token(TokenType::Colon),
            '.' => self.add_token(TokenType::Dot),
            ';' => self.add_token(TokenType::Semicolon),
            '?' => self.add_token(TokenType::Question),
            '%' => self.add_token(TokenType::Percent),
            '+' => {
                let token_type = if self.match_char('+') {
                    TokenType::PlusPlus
                } else if self.match_char('=') {
                    TokenType::PlusEqual
                } else {
                    TokenType::Plus
                };
                self.add_token(token_type);
            }
            '-' => {
                let token_type = if self.match_char('-') {
                    TokenType::MinusMinus
                } else if self.match_char('=') {
                    TokenType::MinusEqual
                } else {
                    TokenType::Minus
                };
                self.add_token(token_type);
            }
            '*' => {
                let token_type = if self.match_char('=') {
                    TokenType::StarEqual
                } else {
                    TokenType::Star
                };
                self.add_token(token_type);
            }
            '!' => {
                let token_type = if self.match_char('=') {
                    if self.match_char('=') {
                        TokenType::BangEqualEqual
                    } else {
                        TokenType::BangEqual
                    }
                } else {
                    TokenType::Bang
                };
                self.add_token(token_type);
            }
            '=' => {
                let token_type = if self.match_char('>') {
                    TokenType::Arrow
                } else if self.match_char('=') {
                    if self.match_char('=') {
                        TokenType::EqualEqualEqual
                    } else {
                        TokenType::EqualEqual
                    }
                } else {
                    TokenType::Equal
                };
                self.add_token(token_type);
            }
            '<' => {
                let token_type = if self.match_char('=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                self.add_token(token_type);
            }
            '>' => {
                let token_type = if self.match_char('=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.add_token(token_type);
            }
            '&' => {
                if self.match_char('&') {
                    self.add_token(TokenType::AmpAmp);
                } else {
                    return Err(ScriptError::syntax(
                        self.span_here(),
                        "Unexpected character: '&'".to_string(),
                    ));
                }
            }
            '|' => {
                if self.match_char('|') {
                    self.add_token(TokenType::PipePipe);
                } else {
                    return Err(ScriptError::syntax(
                        self.span_here(),
                        "Unexpected character: '|'".to_string(),
                    ));
                }
            }
            '/' => {
                if self.match_char('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment()?;
                } else if self.match_char('=') {
                    self.add_token(TokenType::SlashEqual);
                } else {
                    self.add_token(TokenType::Slash);
                }
            }
            ' ' | '\r' | '\t' | '\n' => {
                // Whitespace carries no meaning; statements are delimited by
                // structure, not newlines.
            }
            '"' | '\'' => self.string(c)?,
            '`' => self.template()?,
            c if c.is_ascii_digit() => self.number()?,
            c if c.is_xid_start() || c == '_' || c == '$' => self.identifier(),
            _ => {
                return Err(ScriptError::syntax(
                    self.span_here(),
                    format!("Unexpected character: '{}'", c),
                ));
            }
        }

        Ok(())
    }

    fn block_comment(&mut self) -> Result<(), ScriptError> {
        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(ScriptError::syntax(
            self.span_here(),
            "Unterminated block comment".to_string(),
        ))
    }

    fn string(&mut self, quote: char) -> Result<(), ScriptError> {
        let mut content = String::new();

        loop {
            if self.is_at_end() || self.peek() == '\n' {
                return Err(ScriptError::syntax(
                    self.span_here(),
                    "Unterminated string literal".to_string(),
                ));
            }
            let c = self.advance();
            if c == quote {
                break;
            }
            if c == '\\' {
                if self.is_at_end() {
                    return Err(ScriptError::syntax(
                        self.span_here(),
                        "Unterminated string literal".to_string(),
                    ));
                }
                content.push(unescape(self.advance()));
            } else {
                content.push(c);
            }
        }

        self.add_token_with_content(TokenType::Str, content);
        Ok(())
    }

    /// Backtick template. The raw inner text is kept as the lexeme; the
    /// parser splits out `${}` interpolations and decodes escapes.
    fn template(&mut self) -> Result<(), ScriptError> {
        loop {
            if self.is_at_end() {
                return Err(ScriptError::syntax(
                    self.span_here(),
                    "Unterminated template literal".to_string(),
                ));
            }
            let c = self.advance();
            if c == '`' {
                break;
            }
            if c == '\\' && !self.is_at_end() {
                self.advance();
            }
        }

        // Interior between the backticks, escapes intact.
        let raw: String = self.chars[self.start + 1..self.current - 1]
            .iter()
            .map(|(_, c)| *c)
            .collect();
        self.add_token_with_content(TokenType::Template, raw);
        Ok(())
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        // Hex form: 0x prefix plus hex digits
        if self.previous() == '0'
            && (self.peek() == 'x' || self.peek() == 'X')
            && self.peek_next().is_ascii_hexdigit()
        {
            self.advance();
            while self.peek().is_ascii_hexdigit() {
                self.advance();
            }
            return self.finish_number();
        }

        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        if self.peek() == 'e' || self.peek() == 'E' {
            let mut lookahead = self.current + 1;
            if matches!(self.char_at(lookahead), Some('+') | Some('-')) {
                lookahead += 1;
            }
            if self.char_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                while self.current < lookahead {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        self.finish_number()
    }

    fn finish_number(&mut self) -> Result<(), ScriptError> {
        let lexeme = self.lexeme_text();
        match parse_number(&lexeme) {
            Some(_) => {
                self.add_token_with_content(TokenType::Number, lexeme);
                Ok(())
            }
            None => Err(ScriptError::syntax(
                self.span_here(),
                format!("Invalid number literal: {}", lexeme),
            )),
        }
    }

    fn identifier(&mut self) {
        while self.peek().is_xid_continue() || self.peek() == '$' {
            self.advance();
        }

        let text = self.lexeme_text();
        let token_type = self
            .keywords
            .get(text.as_str())
            .cloned()
            .unwrap_or(TokenType::Identifier);

        self.add_token_with_content(token_type, text);
    }

    fn add_token(&mut self, token_type: TokenType) {
        let text = self.lexeme_text();
        self.add_token_with_content(token_type, text);
    }

    fn add_token_with_content(&mut self, token_type: TokenType, lexeme: String) {
        self.tokens
            .push(Token::new(token_type, lexeme, self.span_here()));
    }

    fn lexeme_text(&self) -> String {
        self.chars[self.start..self.current]
            .iter()
            .map(|(_, c)| *c)
            .collect()
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.current].1;
        self.current += 1;
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.peek() != expected {
            false
        } else {
            self.advance();
            true
        }
    }

    fn peek(&self) -> char {
        self.char_at(self.current).unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.char_at(self.current + 1).unwrap_or('\0')
    }

    fn previous(&self) -> char {
        self.chars[self.current - 1].1
    }

    fn char_at(&self, index: usize) -> Option<char> {
        self.chars.get(index).map(|(_, c)| *c)
    }

    fn byte_at(&self, index: usize) -> usize {
        self.chars
            .get(index)
            .map(|(b, _)| *b)
            .unwrap_or(self.source_len)
    }

    fn span_here(&self) -> Span {
        Span::new(
            self.offset + self.byte_at(self.start),
            self.offset + self.byte_at(self.current),
        )
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }
}

pub(crate) fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

/// Numeric lexeme to f64, accepting the hex form alongside decimal.
pub(crate) fn parse_number(lexeme: &str) -> Option<f64> {
    if let Some(hex) = lexeme
        .strip_prefix("0x")
        .or_else(|| lexeme.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map(|n| n as f64).ok()
    } else {
        lexeme.parse::<f64>().ok()
    }
}
