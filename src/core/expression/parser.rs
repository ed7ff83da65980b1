//! Expression parser
//!
//! Converts resolved tokens into a typed AST by recursive descent:
//!
//! ```text
//! expression := comparison
//! comparison := term (("=" | "==" | "!=" | "<>" | "<" | "<=" | ">" | ">=") term)*
//! term       := factor (("+" | "-") factor)*
//! factor     := unary (("*" | "/") unary)*
//! unary      := "-" unary | primary
//! primary    := literal | resolved | name "(" arguments? ")" | "(" expression ")"
//! ```

use super::tokenizer::{Lexeme, Token};
use crate::core::functions;
use crate::core::value::Value;
use crate::error::EvalError;
use std::fmt;

/// Nesting bound for parentheses, calls and unary chains.
const MAX_DEPTH: usize = 128;

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "=" | "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::LtEq,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::GtEq,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

/// Abstract Syntax Tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal or an already-resolved column value
    Literal(Value),
    /// Function call: name(arg1, arg2, ...)
    FunctionCall { name: String, args: Vec<Expr> },
    /// Binary operation: left op right
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation: -expr
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

impl Expr {
    /// Visit every function call in the tree, outermost first.
    pub fn for_each_call<'a>(&'a self, f: &mut impl FnMut(&'a str, usize)) {
        match self {
            Expr::Literal(_) => {}
            Expr::FunctionCall { name, args } => {
                f(name, args.len());
                for arg in args {
                    arg.for_each_call(f);
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                left.for_each_call(f);
                right.for_each_call(f);
            }
            Expr::UnaryOp { operand, .. } => operand.for_each_call(f),
        }
    }

    /// Whether evaluating the node can only give a number, Null or an error.
    pub fn yields_number(&self) -> bool {
        match self {
            Expr::Literal(value) => matches!(value, Value::Number(_) | Value::Null),
            Expr::UnaryOp { .. } => true,
            Expr::BinaryOp { op, .. } => !op.is_comparison(),
            Expr::FunctionCall { name, args } if name.eq_ignore_ascii_case("if") => {
                args.iter().skip(1).all(Expr::yields_number)
            }
            Expr::FunctionCall { name, .. } => functions::returns_number(name),
        }
    }
}

/// Recursive-descent parser over resolved tokens
pub struct Parser {
    lexemes: Vec<Lexeme>,
    position: usize,
    depth: usize,
    end_offset: usize,
}

impl Parser {
    pub fn new(lexemes: Vec<Lexeme>) -> Self {
        let end_offset = lexemes.last().map_or(0, |l| l.position + 1);
        Self {
            lexemes,
            position: 0,
            depth: 0,
            end_offset,
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, EvalError> {
        if self.lexemes.is_empty() {
            return Err(EvalError::syntax("Empty expression", 0));
        }
        let expr = self.expression()?;

        if let Some(lexeme) = self.peek() {
            return Err(EvalError::syntax(
                format!("Unexpected {} after expression", describe(&lexeme.token)),
                lexeme.position,
            ));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.position)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|l| &l.token)
    }

    /// Character offset of the current token, or just past the end.
    fn offset(&self) -> usize {
        self.peek().map_or(self.end_offset, |l| l.position)
    }

    fn advance(&mut self) -> Option<Lexeme> {
        let lexeme = self.lexemes.get(self.position).cloned();
        if lexeme.is_some() {
            self.position += 1;
        }
        lexeme
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn match_operator(&mut self, allowed: &[BinaryOp]) -> Option<BinaryOp> {
        if let Some(Token::Operator(symbol)) = self.peek_token() {
            if let Some(op) = BinaryOp::from_symbol(symbol).filter(|op| allowed.contains(op)) {
                self.position += 1;
                return Some(op);
            }
        }
        None
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::syntax(
                "Expression is nested too deeply",
                self.offset(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let expr = self.comparison();
        self.leave();
        expr
    }

    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        while let Some(op) = self.match_operator(ops) {
            let right = next(self)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[
                BinaryOp::Eq,
                BinaryOp::NotEq,
                BinaryOp::Lt,
                BinaryOp::LtEq,
                BinaryOp::Gt,
                BinaryOp::GtEq,
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[BinaryOp::Add, BinaryOp::Sub], Self::factor)
    }

    fn factor(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[BinaryOp::Mul, BinaryOp::Div], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.match_operator(&[BinaryOp::Sub]).is_some() {
            self.enter()?;
            let operand = self.unary();
            self.leave();
            Ok(Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand: Box::new(operand?),
            })
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let offset = self.offset();
        let Some(lexeme) = self.advance() else {
            return Err(EvalError::syntax("Unexpected end of expression", offset));
        };

        match lexeme.token {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Text(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Bool(b) => Ok(Expr::Literal(Value::Bool(b))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Resolved(value) => Ok(Expr::Literal(value)),

            Token::Identifier(name) => {
                if !self.match_token(&Token::OpenParen) {
                    return Err(EvalError::syntax(
                        format!(
                            "Unknown identifier '{}' (column references are written {{{}}})",
                            name, name
                        ),
                        lexeme.position,
                    ));
                }
                let args = self.arguments()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(EvalError::syntax(
                        format!("Expected ')' after arguments of {}()", name),
                        self.offset(),
                    ));
                }
                Ok(Expr::FunctionCall { name, args })
            }

            Token::OpenParen => {
                let expr = self.expression()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(EvalError::syntax("Expected ')'", self.offset()));
                }
                Ok(expr)
            }

            Token::ColumnRef(name) => Err(EvalError::syntax(
                format!("Unresolved column reference {{{}}}", name),
                lexeme.position,
            )),

            other => Err(EvalError::syntax(
                format!("Unexpected {}", describe(&other)),
                lexeme.position,
            )),
        }
    }

    /// Comma-separated arguments up to, not including, ')'
    fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.peek_token() == Some(&Token::CloseParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        Ok(args)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::Text(s) => format!("text '{}'", s),
        Token::Bool(b) => format!("'{}'", b),
        Token::Null => "'null'".to_string(),
        Token::Identifier(name) => format!("identifier '{}'", name),
        Token::ColumnRef(name) => format!("column reference {{{}}}", name),
        Token::Resolved(_) => "column value".to_string(),
        Token::Operator(op) => format!("operator '{}'", op),
        Token::OpenParen => "'('".to_string(),
        Token::CloseParen => "')'".to_string(),
        Token::Comma => "','".to_string(),
    }
}

/// Parse resolved tokens.
pub fn parse(lexemes: Vec<Lexeme>) -> Result<Expr, EvalError> {
    Parser::new(lexemes).parse()
}
