use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::parser_error::ParserError;
use crate::frontend::str_pool::IddStrPool;
use crate::frontend::token::Token;
use crate::lang::ast::{
    ArgDec, BinOp, EnumDef, Exp, ExpKind, FunDef, IfBranch, Program, Stmt, StructDef, TypeRef,
    UnOp, VarDecl,
};

/// Recursive-descent parser for BlockScript.
///
/// Consumes the preprocessed token stream and produces a `Program`. Syntax
/// errors do not stop the parse: the parser records the error, skips to the
/// next statement boundary and carries on, so one run reports every error it
/// can find.
///
/// Notes:
/// - Type names are ordinary identifiers. A statement starting with two
///   identifiers in a row is a declaration.
/// - Casts (`int(x)`) parse as calls and are resolved by the builder.
/// - A minus sign in front of a numeric literal is folded into the literal.
pub struct Parser<'p> {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token.
    ///
    /// Used to provide stable source locations for errors at end of input.
    last_span: Option<Span>,
    pool: &'p IddStrPool,
    errors: Vec<ParserError>,
}

type ParseResult<T> = Result<T, ParserError>;

impl<'p> Parser<'p> {
    /// Creates a parser over lexer or preprocessor output.
    ///
    /// Directive tokens are dropped; they only mean something to the
    /// preprocessor.
    pub fn new(tokens: Vec<Spanned>, pool: &'p IddStrPool) -> Self {
        let tokens: Vec<Spanned> = tokens
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Directive { .. }))
            .collect();
        Parser {
            tokens,
            pos: 0,
            last_span: None,
            pool,
            errors: Vec::new(),
        }
    }

    /// Returns the current token without consuming it.
    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    /// Advances the token stream by one and returns the consumed token.
    fn advance(&mut self) -> Option<&Spanned> {
        let token = self.tokens.get(self.pos);
        if let Some(s) = token {
            self.last_span = Some(s.span);
        }
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|s| &s.token)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Eof))
    }

    /// Span of the current token, or of the last one consumed.
    fn span(&self) -> Span {
        match self.current() {
            Some(s) => s.span,
            None => self.last_span.unwrap_or(Span { line: 1, col: 1 }),
        }
    }

    /// Constructs a `ParserError` at the most relevant location.
    fn error(&self, message: &str) -> ParserError {
        let span = self.span();
        ParserError {
            message: message.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    fn found(&self) -> String {
        match self.peek() {
            None | Some(Token::Eof) => "end of input".to_string(),
            Some(token) => format!("'{}'", token.describe(self.pool)),
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> ParseResult<Span> {
        if self.check(&token) {
            let span = self.span();
            self.advance();
            Ok(span)
        } else {
            Err(self.error(&format!("expected {}, found {}", what, self.found())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<(String, Span)> {
        match self.peek() {
            Some(Token::Ident(idd)) => {
                let name = self.pool.get(*idd).to_string();
                let span = self.span();
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.error(&format!("expected {}, found {}", what, self.found()))),
        }
    }

    /// Parses a complete program.
    ///
    /// Returns every syntax error found when the source is malformed.
    pub fn parse(&mut self) -> Result<Program, Vec<ParserError>> {
        let mut items = Vec::new();

        while !self.at_eof() {
            match self.parse_statement() {
                Ok(stmt) => items.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize(true);
                }
            }
        }

        if self.errors.is_empty() {
            Ok(Program { items })
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    /// Skips past the statement that failed to parse.
    ///
    /// Stops after a `;` at the current nesting level, after a complete
    /// `{ ... }` group, or before the `}` closing the enclosing block.
    fn synchronize(&mut self, top_level: bool) {
        let mut depth = 0usize;
        loop {
            let token = match self.peek() {
                None | Some(Token::Eof) => return,
                Some(t) => t.clone(),
            };
            match token {
                Token::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                Token::LBrace => depth += 1,
                Token::RBrace if depth == 0 => {
                    // a stray '}' at top level would otherwise stop us forever
                    if top_level {
                        self.advance();
                    }
                    return;
                }
                Token::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                }
                _ => {}
            }
            self.advance();
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Return) => self.parse_return(),
            Some(Token::Struct) => self.parse_struct(),
            Some(Token::Enum) => self.parse_enum(),
            Some(Token::Extern) => self.parse_declaration(),
            Some(Token::Ident(_)) if matches!(self.peek_next(), Some(Token::Ident(_))) => {
                self.parse_declaration()
            }
            _ => {
                let exp = self.parse_expression()?;
                self.expect(Token::Semicolon, "';' after expression")?;
                Ok(Stmt::Expr(exp))
            }
        }
    }

    /// Parses a variable or function declaration:
    ///
    /// ```text
    /// extern? type name dims (= exp)? ;
    /// type name ( params ) { body }
    /// ```
    fn parse_declaration(&mut self) -> ParseResult<Stmt> {
        let is_extern = self.check(&Token::Extern);
        if is_extern {
            self.advance(); // consume 'extern'
        }

        let (type_name, type_span) = self.expect_ident("type name")?;
        let (name, span) = self.expect_ident("declaration name")?;

        if self.check(&Token::LParen) {
            if is_extern {
                return Err(self.error("'extern' applies to variables only"));
            }
            let ret = TypeRef {
                name: type_name,
                dims: Vec::new(),
                span: type_span,
            };
            return self.parse_function(ret, name, span);
        }

        let dims = self.parse_dims()?;
        let init = if self.check(&Token::Assign) {
            self.advance(); // consume '='
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(Token::Semicolon, "';' after declaration")?;

        Ok(Stmt::VarDecl(VarDecl {
            is_extern,
            ty: TypeRef {
                name: type_name,
                dims,
                span: type_span,
            },
            name,
            init,
            span,
            storage: None,
            resolved: None,
        }))
    }

    /// Parses `( params ) { body }` or a bodiless `( params ) ;`.
    fn parse_function(&mut self, ret: TypeRef, name: String, span: Span) -> ParseResult<Stmt> {
        self.advance(); // consume '('

        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let (type_name, type_span) = self.expect_ident("parameter type")?;
                let (param, param_span) = self.expect_ident("parameter name")?;
                let dims = self.parse_dims()?;
                params.push(ArgDec {
                    ty: TypeRef {
                        name: type_name,
                        dims,
                        span: type_span,
                    },
                    name: param,
                    span: param_span,
                });
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance(); // consume ','
            }
        }
        self.expect(Token::RParen, "')' after parameters")?;

        let body = if self.check(&Token::Semicolon) {
            self.advance(); // consume ';'
            None
        } else {
            Some(self.parse_block()?)
        };

        Ok(Stmt::Fun(FunDef {
            ret,
            name,
            params,
            body,
            span,
            info: None,
        }))
    }

    /// Parses `([INT])*`. Sizes must be positive literals.
    fn parse_dims(&mut self) -> ParseResult<Vec<usize>> {
        let mut dims = Vec::new();
        while self.check(&Token::LBracket) {
            self.advance(); // consume '['
            match self.peek() {
                Some(Token::Int(n)) if *n > 0 => {
                    dims.push(*n as usize);
                    self.advance();
                }
                _ => return Err(self.error("array size must be a positive integer literal")),
            }
            self.expect(Token::RBracket, "']' after array size")?;
        }
        Ok(dims)
    }

    /// Parses `{ stmt* }`, recovering from errors inside the block.
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;

        let mut body = Vec::new();
        loop {
            if self.check(&Token::RBrace) {
                self.advance(); // consume '}'
                return Ok(body);
            }
            if self.at_eof() {
                return Err(self.error("unexpected end of input, expected '}'"));
            }
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize(false);
                }
            }
        }
    }

    fn parse_condition(&mut self, keyword: &str) -> ParseResult<Exp> {
        self.expect(Token::LParen, &format!("'(' after '{}'", keyword))?;
        let cond = self.parse_expression()?;
        self.expect(Token::RParen, "')' after condition")?;
        Ok(cond)
    }

    /// Parses an if chain:
    ///
    /// ```text
    /// if (c) { } elif (c) { } else if (c) { } else { }
    /// ```
    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance(); // consume 'if'

        let cond = self.parse_condition("if")?;
        let body = self.parse_block()?;
        let mut branches = vec![IfBranch { cond, body }];
        let mut else_body = None;

        loop {
            match (self.peek(), self.peek_next()) {
                (Some(Token::Elif), _) => {
                    self.advance(); // consume 'elif'
                }
                (Some(Token::Else), Some(Token::If)) => {
                    self.advance(); // consume 'else'
                    self.advance(); // consume 'if'
                }
                (Some(Token::Else), _) => {
                    self.advance(); // consume 'else'
                    else_body = Some(self.parse_block()?);
                    break;
                }
                _ => break,
            }
            let cond = self.parse_condition("elif")?;
            let body = self.parse_block()?;
            branches.push(IfBranch { cond, body });
        }

        Ok(Stmt::If {
            branches,
            else_body,
            span,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance(); // consume 'while'

        let cond = self.parse_condition("while")?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body, span })
    }

    fn parse_return(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance(); // consume 'return'

        let value = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::Semicolon, "';' after return")?;
        Ok(Stmt::Return { value, span })
    }

    /// Parses a struct definition:
    ///
    /// ```text
    /// struct Name { type member dims; ... } ;?
    /// ```
    fn parse_struct(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance(); // consume 'struct'

        let (name, _) = self.expect_ident("struct name")?;
        self.expect(Token::LBrace, "'{' after struct name")?;

        let mut members = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_eof() {
                return Err(self.error("unexpected end of input, expected '}'"));
            }
            let (type_name, type_span) = self.expect_ident("member type")?;
            let (member, _) = self.expect_ident("member name")?;
            let dims = self.parse_dims()?;
            self.expect(Token::Semicolon, "';' after member")?;
            members.push((
                TypeRef {
                    name: type_name,
                    dims,
                    span: type_span,
                },
                member,
            ));
        }
        self.advance(); // consume '}'
        if self.check(&Token::Semicolon) {
            self.advance();
        }

        Ok(Stmt::Struct(StructDef {
            name,
            members,
            span,
        }))
    }

    /// Parses an enum definition:
    ///
    /// ```text
    /// enum Name { A, B = 4, C = -1, } ;?
    /// ```
    fn parse_enum(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance(); // consume 'enum'

        let (name, _) = self.expect_ident("enum name")?;
        self.expect(Token::LBrace, "'{' after enum name")?;

        let mut values = Vec::new();
        while !self.check(&Token::RBrace) {
            let (value_name, _) = self.expect_ident("enumerant name")?;
            let value = if self.check(&Token::Assign) {
                self.advance(); // consume '='
                let negative = self.check(&Token::Minus);
                if negative {
                    self.advance();
                }
                match self.peek() {
                    Some(Token::Int(n)) => {
                        let n = if negative { n.wrapping_neg() } else { *n };
                        self.advance();
                        Some(n)
                    }
                    _ => return Err(self.error("enumerant value must be an integer literal")),
                }
            } else {
                None
            };
            values.push((value_name, value));

            if self.check(&Token::Comma) {
                self.advance();
            } else if !self.check(&Token::RBrace) {
                return Err(self.error(&format!("expected ',' or '}}', found {}", self.found())));
            }
        }
        self.advance(); // consume '}'
        if self.check(&Token::Semicolon) {
            self.advance();
        }

        Ok(Stmt::Enum(EnumDef { name, values, span }))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn parse_expression(&mut self) -> ParseResult<Exp> {
        self.parse_assign()
    }

    /// Assignment is right associative and binds loosest.
    fn parse_assign(&mut self) -> ParseResult<Exp> {
        let target = self.parse_or()?;
        if !self.check(&Token::Assign) {
            return Ok(target);
        }
        self.advance(); // consume '='
        let value = self.parse_assign()?;
        let span = target.span;
        Ok(Exp::new(
            ExpKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    /// One left-associative precedence level.
    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> ParseResult<Exp>,
        ops: &[(Token, BinOp)],
    ) -> ParseResult<Exp> {
        let mut lhs = next(self)?;
        loop {
            let op = match self.peek() {
                Some(token) => ops.iter().find(|(t, _)| t == token).map(|(_, op)| *op),
                None => None,
            };
            let Some(op) = op else {
                return Ok(lhs);
            };
            self.advance();
            let rhs = next(self)?;
            let span = lhs.span;
            lhs = Exp::new(
                ExpKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn parse_or(&mut self) -> ParseResult<Exp> {
        self.binary_level(Self::parse_and, &[(Token::OrOr, BinOp::Or)])
    }

    fn parse_and(&mut self) -> ParseResult<Exp> {
        self.binary_level(Self::parse_equality, &[(Token::AndAnd, BinOp::And)])
    }

    fn parse_equality(&mut self) -> ParseResult<Exp> {
        self.binary_level(
            Self::parse_relation,
            &[(Token::EqEq, BinOp::Eq), (Token::NotEq, BinOp::Ne)],
        )
    }

    fn parse_relation(&mut self) -> ParseResult<Exp> {
        self.binary_level(
            Self::parse_additive,
            &[
                (Token::Lt, BinOp::Lt),
                (Token::Gt, BinOp::Gt),
                (Token::LtEq, BinOp::Le),
                (Token::GtEq, BinOp::Ge),
            ],
        )
    }

    fn parse_additive(&mut self) -> ParseResult<Exp> {
        self.binary_level(
            Self::parse_term,
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
        )
    }

    fn parse_term(&mut self) -> ParseResult<Exp> {
        self.binary_level(
            Self::parse_unary,
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Mod),
            ],
        )
    }

    fn parse_unary(&mut self) -> ParseResult<Exp> {
        let op = match self.peek() {
            Some(Token::Minus) => UnOp::Neg,
            Some(Token::Not) => UnOp::Not,
            _ => return self.parse_postfix(),
        };
        let span = self.span();
        self.advance();
        let operand = self.parse_unary()?;

        let kind = match (op, operand.kind) {
            (UnOp::Neg, ExpKind::Int(n)) => ExpKind::Int(n.wrapping_neg()),
            (UnOp::Neg, ExpKind::Float(f)) => ExpKind::Float(-f),
            (op, kind) => ExpKind::Unary {
                op,
                operand: Box::new(Exp::new(kind, operand.span)),
            },
        };
        Ok(Exp::new(kind, span))
    }

    fn parse_postfix(&mut self) -> ParseResult<Exp> {
        let mut exp = self.parse_primary()?;

        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.advance(); // consume '['
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket, "']' after index")?;
                    let span = exp.span;
                    exp = Exp::new(
                        ExpKind::Index {
                            base: Box::new(exp),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                Some(Token::Dot) => {
                    self.advance(); // consume '.'
                    let (name, _) = self.expect_ident("member name after '.'")?;
                    let span = exp.span;
                    exp = Exp::new(
                        ExpKind::Member {
                            base: Box::new(exp),
                            name,
                            access: None,
                        },
                        span,
                    );
                }
                Some(Token::Arrow) => {
                    self.advance(); // consume '->'
                    let (name, _) = self.expect_ident("method or property name after '->'")?;
                    let args = if self.check(&Token::LParen) {
                        Some(self.parse_args()?)
                    } else {
                        None
                    };
                    let span = exp.span;
                    exp = Exp::new(
                        ExpKind::Arrow {
                            object: Box::new(exp),
                            name,
                            args,
                            target: None,
                        },
                        span,
                    );
                }
                _ => return Ok(exp),
            }
        }
    }

    /// Parses `( exp (, exp)* )`.
    fn parse_args(&mut self) -> ParseResult<Vec<Exp>> {
        self.advance(); // consume '('
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance(); // consume ','
            }
        }
        self.expect(Token::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Exp> {
        let span = self.span();
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.error("unexpected end of input")),
        };

        match token {
            Token::Int(n) => {
                self.advance();
                Ok(Exp::new(ExpKind::Int(n), span))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Exp::new(ExpKind::Float(f), span))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Exp::new(ExpKind::Str(s), span))
            }
            Token::Ident(idd) => {
                self.advance();
                let name = self.pool.get(idd).to_string();
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Exp::new(
                        ExpKind::Call {
                            name,
                            args,
                            target: None,
                        },
                        span,
                    ))
                } else {
                    Ok(Exp::new(
                        ExpKind::Ident {
                            name,
                            resolved: None,
                        },
                        span,
                    ))
                }
            }
            Token::LParen => {
                self.advance(); // consume '('
                let exp = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(exp)
            }
            _ => Err(self.error(&format!("expected expression, found {}", self.found()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn parse(source: &str) -> Program {
        let mut pool = IddStrPool::new();
        let tokens = Lexer::new(source, &mut pool).tokenize().unwrap();
        Parser::new(tokens, &pool)
            .parse()
            .unwrap_or_else(|e| panic!("parse failed: {:?}", e))
    }

    fn parse_errs(source: &str) -> Vec<ParserError> {
        let mut pool = IddStrPool::new();
        let tokens = Lexer::new(source, &mut pool).tokenize().unwrap();
        Parser::new(tokens, &pool).parse().unwrap_err()
    }

    fn single_exp(source: &str) -> Exp {
        let program = parse(source);
        match program.items.into_iter().next() {
            Some(Stmt::Expr(e)) => e,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_function_definition() {
        let program = parse("int Add(int a, int b) { return a + b; }");
        let Stmt::Fun(f) = &program.items[0] else {
            panic!("expected function");
        };
        assert_eq!(f.name, "Add");
        assert_eq!(f.ret.name, "int");
        let params: Vec<&str> = f.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(params, vec!["a", "b"]);
        assert_eq!(f.body.as_ref().map(|b| b.len()), Some(1));
    }

    #[test]
    fn test_prototype_has_no_body() {
        let program = parse("void Tick(float dt);");
        let Stmt::Fun(f) = &program.items[0] else {
            panic!("expected function");
        };
        assert!(f.body.is_none());
    }

    #[test]
    fn test_extern_array_declaration() {
        let program = parse("extern float grid[2][3] = 0;");
        let Stmt::VarDecl(v) = &program.items[0] else {
            panic!("expected declaration");
        };
        assert!(v.is_extern);
        assert_eq!(v.ty.dims, vec![2, 3]);
        assert!(v.init.is_some());
    }

    #[test]
    fn test_precedence() {
        let exp = single_exp("x = 1 + 2 * 3 < 10 && y;");
        let ExpKind::Assign { value, .. } = exp.kind else {
            panic!("expected assignment");
        };
        let ExpKind::Binary { op, lhs, .. } = value.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::And);
        let ExpKind::Binary { op, lhs, .. } = lhs.kind else {
            panic!("expected comparison");
        };
        assert_eq!(op, BinOp::Lt);
        let ExpKind::Binary { op, rhs, .. } = lhs.kind else {
            panic!("expected addition");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(rhs.kind, ExpKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_negative_literal_is_folded() {
        let exp = single_exp("f(-3, -1.5, -x);");
        let ExpKind::Call { args, .. } = exp.kind else {
            panic!("expected call");
        };
        assert!(matches!(args[0].kind, ExpKind::Int(-3)));
        assert!(matches!(args[1].kind, ExpKind::Float(f) if f == -1.5));
        assert!(matches!(args[2].kind, ExpKind::Unary { op: UnOp::Neg, .. }));
    }

    #[test]
    fn test_if_chain_accepts_elif_and_else_if() {
        let program = parse("if (a) { } elif (b) { } else if (c) { } else { f(); }");
        let Stmt::If {
            branches,
            else_body,
            ..
        } = &program.items[0]
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 3);
        assert_eq!(else_body.as_ref().map(|b| b.len()), Some(1));
    }

    #[test]
    fn test_postfix_chain() {
        let exp = single_exp("p.pos.xy = obj->Child(1)->size[2];");
        let ExpKind::Assign { target, value } = exp.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target.kind, ExpKind::Member { ref name, .. } if name == "xy"));
        let ExpKind::Index { base, .. } = value.kind else {
            panic!("expected index");
        };
        let ExpKind::Arrow { object, args, .. } = base.kind else {
            panic!("expected arrow");
        };
        assert!(args.is_none());
        assert!(matches!(object.kind, ExpKind::Arrow { args: Some(_), .. }));
    }

    #[test]
    fn test_struct_and_enum() {
        let program = parse("struct P { int id; float w[2]; }; enum E { A, B = 5, C = -2, }");
        let Stmt::Struct(s) = &program.items[0] else {
            panic!("expected struct");
        };
        assert_eq!(s.members.len(), 2);
        assert_eq!(s.members[1].0.dims, vec![2]);
        let Stmt::Enum(e) = &program.items[1] else {
            panic!("expected enum");
        };
        assert_eq!(
            e.values,
            vec![
                ("A".to_string(), None),
                ("B".to_string(), Some(5)),
                ("C".to_string(), Some(-2))
            ]
        );
    }

    #[test]
    fn test_errors_accumulate_across_statements() {
        let errs = parse_errs("int a = ;\nint b = 2;\nf(;\nint Ok() { x = ; return 1; }");
        assert_eq!(errs.len(), 3, "errors were: {:?}", errs);
        assert_eq!(errs[0].line, 1);
        assert_eq!(errs[1].line, 3);
        assert_eq!(errs[2].line, 4);
    }

    #[test]
    fn test_error_location_and_message() {
        let errs = parse_errs("int x = 1\nint y = 2;");
        assert_eq!(errs[0].to_string(), "2:1: expected ';' after declaration, found 'int'");
    }

    #[test]
    fn test_missing_closing_brace() {
        let errs = parse_errs("int F() { return 1;");
        assert!(
            errs[0].message.contains("expected '}'"),
            "msg was: {}",
            errs[0].message
        );
    }

    #[test]
    fn test_zero_array_size_rejected() {
        let errs = parse_errs("int a[0];");
        assert!(errs[0].message.contains("positive"), "msg was: {}", errs[0].message);
    }
}
