use crate::frontend::str_pool::{Idd, IddStrPool};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i32),
    Float(f32),
    Str(String),

    // Names live in the compilation's identifier pool
    Ident(Idd),

    // A whole preprocessor line: `#name rest-of-line`
    Directive { name: String, arg: String },

    // Keywords
    If,
    Elif,
    Else,
    While,
    Return,
    Struct,
    Enum,
    Extern,

    // Punctuation
    Semicolon,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Arrow,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Comparison
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Logic
    AndAnd,
    OrOr,
    Not,

    Assign,

    Eof,
}

impl Token {
    pub fn keyword(word: &str) -> Option<Token> {
        let token = match word {
            "if" => Token::If,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "while" => Token::While,
            "return" => Token::Return,
            "struct" => Token::Struct,
            "enum" => Token::Enum,
            "extern" => Token::Extern,
            _ => return None,
        };
        Some(token)
    }

    /// Source-like rendering, resolving identifiers through the pool.
    pub fn describe(&self, pool: &IddStrPool) -> String {
        match self {
            Token::Ident(idd) => pool.get(*idd).to_string(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Ident(idd) => write!(f, "identifier#{}", idd.index()),
            Token::Directive { name, arg } => write!(f, "#{} {}", name, arg),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::Return => write!(f, "return"),
            Token::Struct => write!(f, "struct"),
            Token::Enum => write!(f, "enum"),
            Token::Extern => write!(f, "extern"),
            Token::Semicolon => write!(f, ";"),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Dot => write!(f, "."),
            Token::Arrow => write!(f, "->"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::LtEq => write!(f, "<="),
            Token::GtEq => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Assign => write!(f, "="),
            Token::Eof => write!(f, "EOF"),
        }
    }
}
