//! Directive processing for BlockScript sources.
//!
//! The preprocessor is a small state machine. Every `#if` pushes a frame that
//! remembers whether its current branch is enabled and whether one of its
//! branches has already been taken, so only the first true branch of an
//! `#if / #elseif / #else` chain survives. `#define`, `#undef` and `#include` are queued
//! on the top frame and performed by [`Preprocessor::flush_command`], which
//! does nothing while the top frame is disabled.
//!
//! [`Preprocessor::expand`] drives the machine over a lexed buffer: it drops
//! tokens of disabled regions, substitutes defined identifiers and splices in
//! the tokens of included buffers. Definitions are visible from the point
//! they are made onwards; there is no forward visibility.

use thiserror::Error;
use tracing::{debug, trace};

use crate::frontend::lexer::{Lexer, Span, Spanned};
use crate::frontend::str_pool::IddStrPool;
use crate::frontend::token::Token;

pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 16;

/// Host hook that resolves `#include "path"`.
///
/// `close` is called exactly once after every `open`, whether it succeeded
/// or not.
pub trait FileIncluder {
    fn open(&mut self, path: &str) -> std::io::Result<String>;

    fn close(&mut self, _path: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PpCommand {
    #[default]
    None,
    Include,
    Define,
    Undef,
    If,
    ElseIf,
    Else,
    EndIf,
}

/// One nesting level of conditional compilation.
#[derive(Debug, Clone)]
pub struct PpState {
    pub command: PpCommand,
    pub string_arg: String,
    pub code_arg: String,
    pub is_if_enabled: bool,
    pub chose_path: bool,
    seen_else: bool,
}

impl PpState {
    fn root() -> Self {
        PpState {
            command: PpCommand::None,
            string_arg: String::new(),
            code_arg: String::new(),
            is_if_enabled: true,
            chose_path: true,
            seen_else: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub value: String,
    pub buffer_size: usize,
    pub is_include: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessorError {
    #[error("missing definition name")]
    MissingName,

    #[error("duplicate definition '{0}'")]
    DuplicateDefinition(String),

    #[error("#include used but no file includer is configured")]
    NoFileIncluder,

    #[error("could not open include '{path}': {reason}")]
    IncludeOpen { path: String, reason: String },

    #[error("include depth limit ({0}) exceeded")]
    IncludeDepth(usize),

    #[error("#{0} without matching #if")]
    Unmatched(String),

    #[error("#elseif after #else")]
    ElseIfAfterElse,

    #[error("unterminated #if")]
    UnterminatedIf,

    #[error("unknown directive #{0}")]
    UnknownDirective(String),

    #[error("invalid #if expression: {0}")]
    BadCondition(String),

    #[error("{0}")]
    Lex(String),
}

/// A preprocessor error with the location of the offending directive.
#[derive(Debug, Clone, Error)]
#[error("{line}:{col}: {error}")]
pub struct PpDiagnostic {
    pub line: usize,
    pub col: usize,
    pub error: PreprocessorError,
}

impl PpDiagnostic {
    fn new(span: Span, error: PreprocessorError) -> Self {
        PpDiagnostic {
            line: span.line,
            col: span.col,
            error,
        }
    }
}

pub struct Preprocessor<'i> {
    /// Never empty; index 0 is the always-enabled root frame.
    states: Vec<PpState>,
    definitions: Vec<Definition>,
    includer: Option<&'i mut dyn FileIncluder>,
    has_include: bool,
    max_include_depth: usize,
}

impl Default for Preprocessor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'i> Preprocessor<'i> {
    pub fn new() -> Self {
        Preprocessor {
            states: vec![PpState::root()],
            definitions: Vec::new(),
            includer: None,
            has_include: false,
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }

    pub fn with_file_includer(mut self, includer: &'i mut dyn FileIncluder) -> Self {
        self.includer = Some(includer);
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    fn top(&self) -> &PpState {
        // states always holds the root frame
        &self.states[self.states.len() - 1]
    }

    fn top_mut(&mut self) -> &mut PpState {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    pub fn depth(&self) -> usize {
        self.states.len() - 1
    }

    pub fn new_state(&mut self) {
        let mut state = PpState::root();
        state.chose_path = false;
        self.states.push(state);
    }

    pub fn pop_state(&mut self) -> Result<(), PreprocessorError> {
        if self.states.len() == 1 {
            return Err(PreprocessorError::Unmatched("endif".to_string()));
        }
        self.states.pop();
        Ok(())
    }

    pub fn set_command(&mut self, command: PpCommand) {
        self.top_mut().command = command;
    }

    pub fn set_string_arg(&mut self, arg: impl Into<String>) {
        self.top_mut().string_arg = arg.into();
    }

    pub fn set_code_arg(&mut self, arg: impl Into<String>) {
        self.top_mut().code_arg = arg.into();
    }

    pub fn set_if_active(&mut self, active: bool) {
        self.top_mut().is_if_enabled = active;
    }

    pub fn set_chose_path(&mut self, chose: bool) {
        self.top_mut().chose_path = chose;
    }

    pub fn is_if_active(&self) -> bool {
        self.top().is_if_enabled
    }

    pub fn chose_path(&self) -> bool {
        self.top().chose_path
    }

    /// Performs the pending command of the top frame.
    pub fn flush_command(&mut self) -> Result<(), PreprocessorError> {
        let active = self.is_if_active();
        let top = self.top_mut();
        let command = std::mem::take(&mut top.command);
        let name = std::mem::take(&mut top.string_arg);
        let value = std::mem::take(&mut top.code_arg);

        match command {
            PpCommand::Define if active => {
                if name.is_empty() {
                    return Err(PreprocessorError::MissingName);
                }
                if self.find_definition_by_name(&name).is_some() {
                    return Err(PreprocessorError::DuplicateDefinition(name));
                }
                trace!(%name, %value, "definition registered");
                self.definitions.push(Definition {
                    name,
                    buffer_size: value.len(),
                    value,
                    is_include: false,
                });
                Ok(())
            }
            PpCommand::Undef if active => {
                if name.is_empty() {
                    return Err(PreprocessorError::MissingName);
                }
                // undefining an unknown name is allowed
                self.definitions.retain(|d| d.is_include || d.name != name);
                trace!(%name, "definition removed");
                Ok(())
            }
            PpCommand::Include if active => {
                let includer = self
                    .includer
                    .as_mut()
                    .ok_or(PreprocessorError::NoFileIncluder)?;
                let opened = includer.open(&name);
                includer.close(&name);
                match opened {
                    Ok(buffer) => {
                        debug!(path = %name, bytes = buffer.len(), "include opened");
                        self.definitions.push(Definition {
                            name,
                            buffer_size: buffer.len(),
                            value: buffer,
                            is_include: true,
                        });
                        self.has_include = true;
                        Ok(())
                    }
                    Err(e) => Err(PreprocessorError::IncludeOpen {
                        path: name,
                        reason: e.to_string(),
                    }),
                }
            }
            _ => Ok(()),
        }
    }

    /// Finds a macro definition. Include records are never returned.
    pub fn find_definition_by_name(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|d| !d.is_include && d.name == name)
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn has_include_buffer(&self) -> bool {
        self.has_include
    }

    /// Hands out the buffer of the include opened by the last flush.
    pub fn take_include(&mut self) -> Option<String> {
        if !self.has_include {
            return None;
        }
        self.has_include = false;
        self.definitions
            .iter()
            .rev()
            .find(|d| d.is_include)
            .map(|d| d.value.clone())
    }

    /// Presets a definition from the host, as if `#define name value` had
    /// been written before the first line.
    pub fn register_definition(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<(), PreprocessorError> {
        self.set_command(PpCommand::Define);
        self.set_string_arg(name);
        self.set_code_arg(value);
        self.flush_command()
    }

    fn begin_if(&mut self, cond: bool) {
        let parent_active = self.is_if_active();
        self.new_state();
        self.set_command(PpCommand::If);
        let taken = parent_active && cond;
        self.set_if_active(taken);
        // a disabled parent counts as already decided
        self.set_chose_path(taken || !parent_active);
    }

    fn else_if(&mut self, cond: bool) -> Result<(), PreprocessorError> {
        if self.states.len() == 1 {
            return Err(PreprocessorError::Unmatched("elseif".to_string()));
        }
        if self.top().seen_else {
            return Err(PreprocessorError::ElseIfAfterElse);
        }
        self.set_command(PpCommand::ElseIf);
        if self.chose_path() {
            self.set_if_active(false);
        } else {
            self.set_if_active(cond);
            self.set_chose_path(cond);
        }
        Ok(())
    }

    fn else_branch(&mut self) -> Result<(), PreprocessorError> {
        if self.states.len() == 1 {
            return Err(PreprocessorError::Unmatched("else".to_string()));
        }
        if self.top().seen_else {
            return Err(PreprocessorError::Unmatched("else".to_string()));
        }
        self.set_command(PpCommand::Else);
        let take = !self.chose_path();
        self.set_if_active(take);
        self.set_chose_path(true);
        self.top_mut().seen_else = true;
        Ok(())
    }

    fn end_if(&mut self) -> Result<(), PreprocessorError> {
        self.set_command(PpCommand::EndIf);
        self.pop_state()
    }

    // ------------------------------------------------------------------
    // Expansion driver
    // ------------------------------------------------------------------

    /// Lexes `source` and applies every directive, returning the token
    /// stream the parser sees (terminated by `Eof`).
    pub fn expand(
        &mut self,
        source: &str,
        pool: &mut IddStrPool,
    ) -> Result<Vec<Spanned>, PpDiagnostic> {
        let mut out = Vec::new();
        let end = self.expand_into(source, pool, &mut out, 0)?;
        out.push(Spanned {
            token: Token::Eof,
            span: end,
        });
        Ok(out)
    }

    fn expand_into(
        &mut self,
        source: &str,
        pool: &mut IddStrPool,
        out: &mut Vec<Spanned>,
        include_depth: usize,
    ) -> Result<Span, PpDiagnostic> {
        let tokens = Lexer::new(source, pool).tokenize().map_err(|e| PpDiagnostic {
            line: e.line,
            col: e.col,
            error: PreprocessorError::Lex(e.message),
        })?;

        let base_depth = self.states.len();
        let mut end = Span { line: 1, col: 1 };

        for Spanned { token, span } in tokens {
            end = span;
            match token {
                Token::Eof => break,
                Token::Directive { name, arg } => {
                    self.directive(&name, &arg, span, pool, out, include_depth)?;
                }
                _ if !self.is_if_active() => {}
                Token::Ident(idd) => {
                    let substitution = self
                        .find_definition_by_name(pool.get(idd))
                        .map(|d| d.value.clone());
                    match substitution {
                        Some(value) => self.substitute(&value, span, pool, out)?,
                        None => out.push(Spanned {
                            token: Token::Ident(idd),
                            span,
                        }),
                    }
                }
                token => out.push(Spanned { token, span }),
            }
        }

        if self.states.len() != base_depth {
            return Err(PpDiagnostic::new(end, PreprocessorError::UnterminatedIf));
        }
        Ok(end)
    }

    /// Splices the tokens of a definition value, reported at the use site.
    fn substitute(
        &self,
        value: &str,
        span: Span,
        pool: &mut IddStrPool,
        out: &mut Vec<Spanned>,
    ) -> Result<(), PpDiagnostic> {
        let tokens = Lexer::new(value, pool)
            .tokenize()
            .map_err(|e| PpDiagnostic::new(span, PreprocessorError::Lex(e.message)))?;
        for spanned in tokens {
            if matches!(spanned.token, Token::Eof) {
                break;
            }
            out.push(Spanned {
                token: spanned.token,
                span,
            });
        }
        Ok(())
    }

    fn directive(
        &mut self,
        name: &str,
        arg: &str,
        span: Span,
        pool: &mut IddStrPool,
        out: &mut Vec<Spanned>,
        include_depth: usize,
    ) -> Result<(), PpDiagnostic> {
        let at = |error| PpDiagnostic::new(span, error);

        match name {
            "define" => {
                let arg = arg.trim();
                let split = arg
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(arg.len());
                let (def_name, value) = arg.split_at(split);
                self.set_command(PpCommand::Define);
                self.set_string_arg(def_name);
                self.set_code_arg(value.trim());
                self.flush_command().map_err(at)
            }
            "include" => {
                let path = arg
                    .trim()
                    .trim_matches(|c| c == '"' || c == '<' || c == '>');
                self.set_command(PpCommand::Include);
                self.set_string_arg(path);
                self.flush_command().map_err(at)?;

                if let Some(buffer) = self.take_include() {
                    if include_depth + 1 > self.max_include_depth {
                        return Err(at(PreprocessorError::IncludeDepth(self.max_include_depth)));
                    }
                    // included tokens and errors are reported at the #include line
                    let mut spliced = Vec::new();
                    self.expand_into(&buffer, pool, &mut spliced, include_depth + 1)
                        .map_err(|d| at(d.error))?;
                    out.extend(spliced.into_iter().map(|s| Spanned {
                        token: s.token,
                        span,
                    }));
                }
                Ok(())
            }
            "undef" => {
                self.set_command(PpCommand::Undef);
                self.set_string_arg(arg.trim());
                self.flush_command().map_err(at)
            }
            "ifdef" | "ifndef" => {
                let defined = self.find_definition_by_name(arg.trim()).is_some();
                let cond = self.is_if_active() && (defined == (name == "ifdef"));
                self.begin_if(cond);
                Ok(())
            }
            "if" => {
                let cond = if self.is_if_active() {
                    self.eval_condition(arg, pool).map_err(at)?
                } else {
                    false
                };
                self.begin_if(cond);
                Ok(())
            }
            "elseif" | "elif" => {
                let cond = if self.states.len() > 1 && !self.chose_path() {
                    self.eval_condition(arg, pool).map_err(at)?
                } else {
                    false
                };
                self.else_if(cond).map_err(at)
            }
            "else" => self.else_branch().map_err(at),
            "endif" => self.end_if().map_err(at),
            other if self.is_if_active() => {
                Err(at(PreprocessorError::UnknownDirective(other.to_string())))
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // #if expressions
    // ------------------------------------------------------------------

    fn eval_condition(&self, text: &str, pool: &mut IddStrPool) -> Result<bool, PreprocessorError> {
        let mut tokens = Vec::new();
        self.condition_tokens(text, pool, &mut tokens, 0)?;
        if tokens.is_empty() {
            return Err(PreprocessorError::BadCondition("empty expression".to_string()));
        }

        let mut eval = CondEval { tokens, pos: 0 };
        let value = eval.or()?;
        if eval.pos != eval.tokens.len() {
            return Err(PreprocessorError::BadCondition(format!(
                "unexpected '{}'",
                eval.tokens[eval.pos]
            )));
        }
        Ok(value != 0)
    }

    /// Lexes a condition, replacing names by their (recursively lexed) values.
    fn condition_tokens(
        &self,
        text: &str,
        pool: &mut IddStrPool,
        out: &mut Vec<Token>,
        nesting: usize,
    ) -> Result<(), PreprocessorError> {
        if nesting > 16 {
            return Err(PreprocessorError::BadCondition(
                "definition expansion too deep".to_string(),
            ));
        }

        let tokens = Lexer::new(text, pool)
            .tokenize()
            .map_err(|e| PreprocessorError::BadCondition(e.message))?;

        for spanned in tokens {
            match spanned.token {
                Token::Eof => break,
                Token::Ident(idd) => {
                    let name = pool.get(idd).to_string();
                    match name.as_str() {
                        "true" => out.push(Token::Int(1)),
                        "false" => out.push(Token::Int(0)),
                        _ => {
                            let value = self
                                .find_definition_by_name(&name)
                                .map(|d| d.value.clone())
                                .ok_or_else(|| {
                                    PreprocessorError::BadCondition(format!(
                                        "'{}' is not defined",
                                        name
                                    ))
                                })?;
                            out.push(Token::LParen);
                            self.condition_tokens(&value, pool, out, nesting + 1)?;
                            out.push(Token::RParen);
                        }
                    }
                }
                token => out.push(token),
            }
        }
        Ok(())
    }
}

/// Integer evaluator for `#if` conditions.
struct CondEval {
    tokens: Vec<Token>,
    pos: usize,
}

impl CondEval {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bad(&self, message: &str) -> PreprocessorError {
        PreprocessorError::BadCondition(message.to_string())
    }

    fn or(&mut self) -> Result<i32, PreprocessorError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let rhs = self.and()?;
            lhs = ((lhs != 0) || (rhs != 0)) as i32;
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<i32, PreprocessorError> {
        let mut lhs = self.equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let rhs = self.equality()?;
            lhs = ((lhs != 0) && (rhs != 0)) as i32;
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<i32, PreprocessorError> {
        let mut lhs = self.relation()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => Token::EqEq,
                Some(Token::NotEq) => Token::NotEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.relation()?;
            lhs = match op {
                Token::EqEq => (lhs == rhs) as i32,
                _ => (lhs != rhs) as i32,
            };
        }
    }

    fn relation(&mut self) -> Result<i32, PreprocessorError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(t @ (Token::Lt | Token::Gt | Token::LtEq | Token::GtEq)) => t.clone(),
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = match op {
                Token::Lt => (lhs < rhs) as i32,
                Token::Gt => (lhs > rhs) as i32,
                Token::LtEq => (lhs <= rhs) as i32,
                _ => (lhs >= rhs) as i32,
            };
        }
    }

    fn additive(&mut self) -> Result<i32, PreprocessorError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Token::Plus,
                Some(Token::Minus) => Token::Minus,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = match op {
                Token::Plus => lhs.wrapping_add(rhs),
                _ => lhs.wrapping_sub(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<i32, PreprocessorError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(t @ (Token::Star | Token::Slash | Token::Percent)) => t.clone(),
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = match op {
                Token::Star => lhs.wrapping_mul(rhs),
                _ if rhs == 0 => return Err(self.bad("division by zero")),
                Token::Slash => lhs.wrapping_div(rhs),
                _ => lhs.wrapping_rem(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<i32, PreprocessorError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok((self.unary()? == 0) as i32)
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(self.unary()?.wrapping_neg())
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<i32, PreprocessorError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Int(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let value = self.or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.bad("expected ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(other) => Err(PreprocessorError::BadCondition(format!(
                "unexpected '{}'",
                other
            ))),
            None => Err(self.bad("unexpected end of expression")),
        }
    }
}
