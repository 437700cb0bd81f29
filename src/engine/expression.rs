//! Candidate expression language.
//!
//! Accepts what the search engine emits: numbers, the variables `x1..xn`
//! (`x` is shorthand for `x1`), named constants, `+ - * /`, `^` or `**`
//! for powers, unary minus and calls to the enabled function library.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use nalgebra::DMatrix;
use rayon::prelude::*;
use regex::Regex;

use crate::core::config::FunctionName;
use crate::engine::adapter::EvaluationError;

// --- Tokens ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<num>(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|(?P<op>\*\*|[-+*/^()])|(?P<bad>\S)",
        )
        .expect("token pattern is valid")
    })
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, EvaluationError> {
    let mut out = Vec::new();
    for caps in token_regex().captures_iter(src) {
        let Some(m) = caps.get(0) else { continue };
        let offset = m.start();
        let tok = if let Some(num) = caps.name("num") {
            let v = num.as_str().parse::<f64>().map_err(|_| EvaluationError::Syntax {
                offset,
                message: format!("bad number '{}'", num.as_str()),
            })?;
            Token::Num(v)
        } else if let Some(id) = caps.name("ident") {
            Token::Ident(id.as_str().to_string())
        } else if let Some(op) = caps.name("op") {
            match op.as_str() {
                "(" => Token::LParen,
                ")" => Token::RParen,
                "**" => Token::Op("^"),
                "^" => Token::Op("^"),
                "+" => Token::Op("+"),
                "-" => Token::Op("-"),
                "*" => Token::Op("*"),
                _ => Token::Op("/"),
            }
        } else {
            return Err(EvaluationError::Syntax {
                offset,
                message: format!("unexpected character '{}'", m.as_str()),
            });
        };
        out.push((offset, tok));
    }
    Ok(out)
}

// --- Syntax Tree ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Symbol(String),
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(FunctionName, Box<Node>),
}

impl Node {
    fn size(&self) -> usize {
        match self {
            Node::Num(_) | Node::Symbol(_) => 1,
            Node::Neg(inner) | Node::Call(_, inner) => 1 + inner.size(),
            Node::Binary(_, a, b) => 1 + a.size() + b.size(),
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        match self {
            Node::Neg(inner) | Node::Call(_, inner) => inner.visit(f),
            Node::Binary(_, a, b) => {
                a.visit(f);
                b.visit(f);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Num(v) => write!(f, "{}", v),
            Node::Symbol(s) => f.write_str(s),
            Node::Neg(inner) => write!(f, "(-{})", inner),
            Node::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            Node::Call(func, inner) => write!(f, "{}({})", func, inner),
        }
    }
}

// --- Parser (recursive descent) ---

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        t
    }

    fn error(&self, message: impl Into<String>) -> EvaluationError {
        EvaluationError::Syntax { offset: self.offset(), message: message.into() }
    }

    fn expr(&mut self) -> Result<Node, EvaluationError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("+")) => BinaryOp::Add,
                Some(Token::Op("-")) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Node, EvaluationError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("*")) => BinaryOp::Mul,
                Some(Token::Op("/")) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Node, EvaluationError> {
        match self.peek() {
            Some(Token::Op("-")) => {
                self.bump();
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op("+")) => {
                self.bump();
                self.unary()
            }
            _ => self.power(),
        }
    }

    // Right associative; the exponent may carry its own sign.
    fn power(&mut self) -> Result<Node, EvaluationError> {
        let base = self.atom()?;
        if let Some(Token::Op("^")) = self.peek() {
            self.bump();
            let exponent = self.unary()?;
            return Ok(Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node, EvaluationError> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Num(v)) => Ok(Node::Num(v)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.bump();
                    let func = name
                        .parse::<FunctionName>()
                        .map_err(|_| EvaluationError::UnknownSymbol(name.clone()))?;
                    let arg = self.expr()?;
                    self.expect_rparen()?;
                    Ok(Node::Call(func, Box::new(arg)))
                } else {
                    Ok(Node::Symbol(name))
                }
            }
            Some(other) => Err(EvaluationError::Syntax {
                offset,
                message: format!("unexpected token {:?}", other),
            }),
            None => Err(EvaluationError::Syntax { offset, message: "unexpected end of input".into() }),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), EvaluationError> {
        match self.bump() {
            Some(Token::RParen) => Ok(()),
            _ => Err(self.error("expected ')'")),
        }
    }
}

// --- Resolved Form ---

#[derive(Debug, Clone)]
enum Compiled {
    Num(f64),
    Var(usize),
    Neg(Box<Compiled>),
    Binary(BinaryOp, Box<Compiled>, Box<Compiled>),
    Call(FunctionName, Box<Compiled>),
}

impl Compiled {
    fn eval(&self, row: &[f64]) -> f64 {
        match self {
            Compiled::Num(v) => *v,
            Compiled::Var(i) => row[*i],
            Compiled::Neg(inner) => -inner.eval(row),
            Compiled::Binary(op, a, b) => op.apply(a.eval(row), b.eval(row)),
            Compiled::Call(func, inner) => func.apply(inner.eval(row)),
        }
    }
}

/// Maps `x`, `x1`, `x2`, ... to a 0-based column index.
fn variable_column(name: &str) -> Option<usize> {
    if name == "x" {
        return Some(0);
    }
    let digits = name.strip_prefix('x')?;
    match digits.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n - 1),
        _ => None,
    }
}

// --- Public API ---

/// A parsed candidate expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    pub fn parse(src: &str) -> Result<Self, EvaluationError> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(EvaluationError::Syntax { offset: 0, message: "empty expression".into() });
        }
        let mut parser = Parser { tokens, pos: 0, end: src.len() };
        let root = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(Self { root })
    }

    /// Node count; the complexity axis of the Pareto frontier.
    pub fn complexity(&self) -> usize {
        self.root.size()
    }

    /// Functions the expression calls, each listed once.
    pub fn functions(&self) -> Vec<FunctionName> {
        let mut out = Vec::new();
        self.root.visit(&mut |n| {
            if let Node::Call(f, _) = n {
                if !out.contains(f) {
                    out.push(*f);
                }
            }
        });
        out
    }

    /// Fails if the expression calls a function outside `allowed`.
    pub fn check_functions(&self, allowed: &[FunctionName]) -> Result<(), EvaluationError> {
        match self.functions().into_iter().find(|f| !allowed.contains(f)) {
            Some(f) => Err(EvaluationError::DisallowedFunction(f.to_string())),
            None => Ok(()),
        }
    }

    fn compile(&self, dims: usize, constants: &BTreeMap<String, f64>) -> Result<Compiled, EvaluationError> {
        fn go(node: &Node, dims: usize, constants: &BTreeMap<String, f64>) -> Result<Compiled, EvaluationError> {
            Ok(match node {
                Node::Num(v) => Compiled::Num(*v),
                Node::Symbol(name) => {
                    if let Some(v) = constants.get(name) {
                        Compiled::Num(*v)
                    } else if let Some(col) = variable_column(name) {
                        if col >= dims {
                            return Err(EvaluationError::VariableOutOfRange {
                                name: name.clone(),
                                column: col + 1,
                                dims,
                            });
                        }
                        Compiled::Var(col)
                    } else {
                        return Err(EvaluationError::UnknownSymbol(name.clone()));
                    }
                }
                Node::Neg(inner) => Compiled::Neg(Box::new(go(inner, dims, constants)?)),
                Node::Binary(op, a, b) => Compiled::Binary(
                    *op,
                    Box::new(go(a, dims, constants)?),
                    Box::new(go(b, dims, constants)?),
                ),
                Node::Call(f, inner) => Compiled::Call(*f, Box::new(go(inner, dims, constants)?)),
            })
        }
        go(&self.root, dims, constants)
    }

    /// Evaluates the expression on every row of `inputs`, in parallel.
    /// Symbols are resolved once up front; domain errors yield NaN entries.
    pub fn evaluate_rows(
        &self,
        inputs: &DMatrix<f64>,
        constants: &BTreeMap<String, f64>,
    ) -> Result<Vec<f64>, EvaluationError> {
        let compiled = self.compile(inputs.ncols(), constants)?;
        let rows: Vec<Vec<f64>> = inputs.row_iter().map(|r| r.iter().copied().collect()).collect();
        Ok(rows.par_iter().map(|row| compiled.eval(row)).collect())
    }

    /// Single-point evaluation.
    pub fn evaluate_at(&self, point: &[f64], constants: &BTreeMap<String, f64>) -> Result<f64, EvaluationError> {
        let compiled = self.compile(point.len(), constants)?;
        Ok(compiled.eval(point))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}
