use crate::frontend::lexer::Spanned;
use crate::frontend::str_pool::IddStrPool;
use crate::frontend::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, identifiers print their pooled text
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned], pool: &IddStrPool) {
        for s in tokens {
            println!("{}", self.format_one(s, pool));
        }
    }

    pub fn format_one(&self, s: &Spanned, pool: &IddStrPool) -> String {
        let line = s.span.line;
        let col = s.span.col;

        let kind = Self::kind(&s.token);
        let colr = if self.color { Self::color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let text = if self.show_debug_repr {
            match &s.token {
                Token::Ident(idd) => format!("Ident({:?})", pool.get(*idd)),
                other => format!("{:?}", other),
            }
        } else {
            s.token.describe(pool)
        };

        format!(
            "[{:02}:{:02}] {}{:<8} {}{}",
            line, col, colr, kind, text, reset
        )
    }

    fn kind(t: &Token) -> &'static str {
        use Token::*;
        match t {
            Eof => "EOF",
            Directive { .. } => "DIRECTIVE",

            // literals
            Int(_) => "INT",
            Float(_) => "FLOAT",
            Str(_) => "STRING",

            // names
            Ident(_) => "IDENT",

            // structure
            LParen | RParen => "PAREN",
            LBracket | RBracket => "BRACKET",
            LBrace | RBrace => "BRACE",
            Semicolon | Comma => "PUNCT",

            // ops / comparisons
            Plus | Minus | Star | Slash | Percent | Dot | Arrow | Assign => "OP",
            EqEq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",
            AndAnd | OrOr | Not => "LOGIC",

            _ => "KEYWORD",
        }
    }

    fn color(t: &Token) -> &'static str {
        use Token::*;
        match t {
            Eof | Directive { .. } => Self::DIM,
            Str(_) => Self::GRN,
            Int(_) | Float(_) => Self::CYN,
            Ident(_) => Self::YEL,
            Plus | Minus | Star | Slash | Percent | Dot | Arrow | Assign => Self::MAG,
            EqEq | NotEq | Lt | LtEq | Gt | GtEq | AndAnd | OrOr | Not => Self::MAG,
            _ => Self::RESET,
        }
    }
}
