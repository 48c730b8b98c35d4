use crate::frontend::str_pool::IddStrPool;
use crate::frontend::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexerError {}

pub struct Lexer<'p> {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    /// True until the first non-blank character of the current line.
    line_start: bool,
    pool: &'p mut IddStrPool,
}

impl<'p> Lexer<'p> {
    pub fn new(source: &str, pool: &'p mut IddStrPool) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            line_start: true,
            pool,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
            self.line_start = true;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>, span: Span) -> LexerError {
        LexerError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    /// Skips blanks, newlines and both comment styles.
    fn skip_trivia(&mut self) -> Result<(), LexerError> {
        loop {
            match (self.current(), self.peek()) {
                (Some(' ' | '\t' | '\r' | '\n'), _) => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.current() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.span();
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek()) {
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => {
                                self.advance();
                            }
                            (None, _) => {
                                return Err(self.error("unterminated block comment", start));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Reads `#name rest-of-line`. The newline itself is left in place.
    fn read_directive(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        self.advance(); // consume '#'

        while matches!(self.current(), Some(' ' | '\t')) {
            self.advance();
        }

        let mut name = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.error("expected directive name after '#'", start));
        }

        let mut arg = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            if ch == '/' && self.peek() == Some('/') {
                break;
            }
            arg.push(ch);
            self.advance();
        }

        Ok(Token::Directive {
            name,
            arg: arg.trim().to_string(),
        })
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::Str(string));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => string.push('\n'),
                        Some('t') => string.push('\t'),
                        Some('r') => string.push('\r'),
                        Some('\\') => string.push('\\'),
                        Some('"') => string.push('"'),
                        Some('0') => string.push('\0'),
                        Some(ch) => {
                            return Err(self.error(
                                format!("unknown escape sequence: \\{}", ch),
                                self.span(),
                            ));
                        }
                        None => {
                            return Err(
                                self.error("unexpected EOF in escape sequence", self.span())
                            );
                        }
                    }
                    self.advance();
                }
                Some('\n') => {
                    return Err(
                        self.error("unterminated string (newline before closing quote)", start)
                    );
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error("unterminated string literal", start));
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start = self.span();

        // Hex: 0x... or 0X...
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance(); // '0'
            self.advance(); // 'x' or 'X'

            let mut hex = String::new();
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            if hex.is_empty() {
                return Err(self.error("expected hex digits after 0x", start));
            }
            let value = u32::from_str_radix(&hex, 16)
                .map_err(|_| self.error(format!("invalid hex number: 0x{}", hex), start))?;
            return Ok(Token::Int(value as i32));
        }

        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot {
                // `1.x` is a swizzle on a literal, not a float
                if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    has_dot = true;
                    digits.push('.');
                    self.advance();
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        // optional float suffix
        let suffixed = self.current() == Some('f');
        if suffixed {
            self.advance();
        }

        if has_dot || suffixed {
            let value: f32 = digits
                .parse()
                .map_err(|_| self.error(format!("invalid float: {}", digits), start))?;
            Ok(Token::Float(value))
        } else {
            let value: i32 = digits
                .parse()
                .map_err(|_| self.error(format!("invalid integer: {}", digits), start))?;
            Ok(Token::Int(value))
        }
    }

    fn read_identifier(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if let Some(keyword) = Token::keyword(&ident) {
            return Ok(keyword);
        }

        let idd = self
            .pool
            .allocate_string(&ident)
            .map_err(|e| self.error(format!("identifier '{}': {}", ident, e), start))?;
        Ok(Token::Ident(idd))
    }

    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let (token, width) = match (ch, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('-', Some('>')) => (Token::Arrow, 2),
            ('=', _) => (Token::Assign, 1),
            ('!', _) => (Token::Not, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('.', _) => (Token::Dot, 1),
            (';', _) => (Token::Semicolon, 1),
            (',', _) => (Token::Comma, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(token)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia()?;
            let span = self.span();

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    break;
                }
                Some('#') if self.line_start => self.read_directive()?,
                Some('#') => {
                    return Err(self.error("directives must start a line", span));
                }
                Some('"') => self.read_string()?,
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some('.') if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                    self.read_number()?
                }
                Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.read_identifier()?,
                Some(ch) => match self.read_operator() {
                    Some(token) => token,
                    None => {
                        return Err(self.error(format!("unexpected character '{}'", ch), span));
                    }
                },
            };

            self.line_start = false;
            tokens.push(Spanned { token, span });
        }

        Ok(tokens)
    }
}
