//! Recursive-descent parser producing the condition AST
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons (chained),
//! `+ -`, `* / // %`, unary minus, postfix (attribute, index, call).

use super::RuleError;
use super::lexer::{Spanned, Token, tokenize};

/// Longest accepted condition source, in bytes.
pub const MAX_SOURCE_LEN: usize = 4096;
/// Deepest accepted expression tree. Parentheses, calls, unary operators and
/// every link of an operator or accessor chain each add a level.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `a < b <= c` holds when every adjacent pair holds.
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
}

impl Expr {
    /// Visit this node and every descendant, parents first.
    pub fn walk<'e>(&'e self, visit: &mut dyn FnMut(&'e Expr)) {
        visit(self);
        match self {
            Expr::Literal(_) | Expr::Name(_) => {}
            Expr::List(items) | Expr::Call(_, items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expr::Unary(_, inner) | Expr::Attr(inner, _) => inner.walk(visit),
            Expr::Binary(_, lhs, rhs)
            | Expr::And(lhs, rhs)
            | Expr::Or(lhs, rhs)
            | Expr::Index(lhs, rhs) => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Compare(first, rest) => {
                first.walk(visit);
                for (_, operand) in rest {
                    operand.walk(visit);
                }
            }
            Expr::Method(receiver, _, args) => {
                receiver.walk(visit);
                for arg in args {
                    arg.walk(visit);
                }
            }
        }
    }
}

/// Parse a condition into an expression tree.
pub fn parse(source: &str) -> Result<Expr, RuleError> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(RuleError::TooComplex(format!(
            "condition is {} bytes, limit is {MAX_SOURCE_LEN}",
            source.len()
        )));
    }

    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(RuleError::Syntax {
            offset: 0,
            message: "empty condition".to_string(),
        });
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end: source.len(),
    };
    let expr = parser.expression()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(RuleError::Syntax {
            offset: extra.offset,
            message: format!("unexpected {:?} after end of expression", extra.token),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|t| &t.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), RuleError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> RuleError {
        RuleError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), RuleError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(RuleError::TooComplex(format!(
                "nesting deeper than {MAX_NESTING} levels"
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn leave_n(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn expression(&mut self) -> Result<Expr, RuleError> {
        self.enter()?;
        let expr = self.or_expr();
        self.leave();
        expr
    }

    fn or_expr(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.and_expr()?;
        let mut levels = 0;
        while self.eat(&Token::Or) {
            self.enter()?;
            levels += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.leave_n(levels);
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.not_expr()?;
        let mut levels = 0;
        while self.eat(&Token::And) {
            self.enter()?;
            levels += 1;
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.leave_n(levels);
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, RuleError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let inner = self.not_expr();
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner?)));
        }
        self.comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek()? {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            Token::In => CompareOp::In,
            Token::Not if self.peek_at(1) == Some(&Token::In) => {
                self.pos += 1;
                CompareOp::NotIn
            }
            Token::Is if self.peek_at(1) == Some(&Token::Not) => {
                self.pos += 1;
                CompareOp::Ne
            }
            Token::Is => CompareOp::Eq,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, RuleError> {
        let first = self.additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn additive(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.multiplicative()?;
        let mut levels = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => {
                    self.leave_n(levels);
                    return Ok(lhs);
                }
            };
            self.pos += 1;
            self.enter()?;
            levels += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.unary()?;
        let mut levels = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::SlashSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => {
                    self.leave_n(levels);
                    return Ok(lhs);
                }
            };
            self.pos += 1;
            self.enter()?;
            levels += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, RuleError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let inner = self.unary();
        self.leave();
        Ok(Expr::Unary(op, Box::new(inner?)))
    }

    fn postfix(&mut self) -> Result<Expr, RuleError> {
        let mut expr = self.primary()?;
        let mut levels = 0;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    self.enter()?;
                    levels += 1;
                    let name = match self.peek() {
                        Some(Token::Ident(name)) => name.clone(),
                        _ => return Err(self.error("expected attribute name after '.'")),
                    };
                    self.pos += 1;
                    if self.peek() == Some(&Token::LParen) {
                        let args = self.arguments()?;
                        expr = Expr::Method(Box::new(expr), name, args);
                    } else {
                        expr = Expr::Attr(Box::new(expr), name);
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    self.enter()?;
                    levels += 1;
                    let key = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(key));
                }
                Some(Token::LParen) => {
                    return Err(self.error("only named functions and methods can be called"));
                }
                _ => {
                    self.leave_n(levels);
                    return Ok(expr);
                }
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, RuleError> {
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "',' or ')'")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, RuleError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of condition"));
        };

        let expr = match token {
            Token::Int(v) => Expr::Literal(Literal::Int(v)),
            Token::Float(v) => Expr::Literal(Literal::Float(v)),
            Token::Str(s) => Expr::Literal(Literal::Str(s)),
            Token::True => Expr::Literal(Literal::Bool(true)),
            Token::False => Expr::Literal(Literal::Bool(false)),
            Token::None => Expr::Literal(Literal::None),
            Token::Ident(name) => {
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    let args = self.arguments()?;
                    return Ok(Expr::Call(name, args));
                }
                return Ok(Expr::Name(name));
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.pos += 1;
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma, "',' or ']'")?;
                        // Trailing comma.
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                    }
                }
                return Ok(Expr::List(items));
            }
            other => return Err(self.error(format!("unexpected {other:?}"))),
        };

        self.pos += 1;
        Ok(expr)
    }
}
