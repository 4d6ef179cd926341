use crate::errors::{Result, SimError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Scalar functions of the expression language
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Func {
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tan,
    Min,
    Max,
}

impl Func {
    fn from_name(name: &str) -> Option<Func> {
        Some(match name {
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => return None,
        })
    }

    fn is_variadic(&self) -> bool {
        matches!(self, Func::Min | Func::Max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Clone, Debug, PartialEq)]
enum Ast {
    Num(f64),
    Var(String),
    Neg(Box<Ast>),
    Bin(BinOp, Box<Ast>, Box<Ast>),
    Call(Func, Vec<Ast>),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && matches!(bytes[i] as char, '0'..='9' | '.') {
                    i += 1;
                }
                // optional exponent
                if i < bytes.len() && matches!(bytes[i] as char, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && matches!(bytes[j] as char, '+' | '-') {
                        j += 1;
                    }
                    if j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &src[start..i];
                let value = text.parse::<f64>().map_err(|_| {
                    SimError::ParseError(format!("invalid number literal '{text}'"))
                })?;
                tokens.push(Token::Num(value));
            }
            'a'..='z' | '_' => {
                let start = i;
                while i < bytes.len() && matches!(bytes[i] as char, 'a'..='z' | '0'..='9' | '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(src[start..i].to_string()));
            }
            _ => {
                return Err(SimError::ParseError(format!(
                    "unexpected character '{c}' at offset {i}"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Binding power of unary minus. Above `^` so that `-2^2 == (-2)^2`.
const NEG_BP: u8 = 40;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(SimError::ParseError(format!(
                "expected {token:?}, got {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Ast> {
        let mut lhs = match self.next() {
            Some(Token::Num(v)) => Ast::Num(v),
            Some(Token::Minus) => Ast::Neg(Box::new(self.parse_expr(NEG_BP)?)),
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                inner
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let func = Func::from_name(&name).ok_or_else(|| {
                        SimError::ParseError(format!("unknown function '{name}'"))
                    })?;
                    let mut args = vec![self.parse_expr(0)?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.pos += 1;
                        args.push(self.parse_expr(0)?);
                    }
                    self.expect(Token::RParen)?;
                    if func.is_variadic() && args.len() < 2 {
                        return Err(SimError::ParseError(format!(
                            "'{name}' takes at least 2 arguments, got {}",
                            args.len()
                        )));
                    }
                    if !func.is_variadic() && args.len() != 1 {
                        return Err(SimError::ParseError(format!(
                            "'{name}' takes exactly 1 argument, got {}",
                            args.len()
                        )));
                    }
                    Ast::Call(func, args)
                } else {
                    Ast::Var(name)
                }
            }
            other => {
                return Err(SimError::ParseError(format!(
                    "unexpected token {other:?}"
                )))
            }
        };

        loop {
            let (op, lbp, rbp) = match self.peek() {
                Some(Token::Plus) => (BinOp::Add, 10, 11),
                Some(Token::Minus) => (BinOp::Sub, 10, 11),
                Some(Token::Star) => (BinOp::Mul, 20, 21),
                Some(Token::Slash) => (BinOp::Div, 20, 21),
                // right-associative
                Some(Token::Caret) => (BinOp::Pow, 31, 30),
                _ => break,
            };
            if lbp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(rbp)?;
            lhs = Ast::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }
}

/// A parsed algebraic formula over process variable aliases.
///
/// Grammar: `+ - * / ^` with parentheses and unary minus, function calls
/// `name(arg[, arg...])` over a fixed set of scalar functions, identifiers
/// matching `[a-z_][a-z0-9_]*` case-sensitively. Precedence from loosest to
/// tightest: `+ -`, `* /`, `^` (right-associative), unary minus.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    src: String,
    ast: Ast,
}

impl Expr {
    /// Parses the formula, failing with [SimError::ParseError] on
    /// malformed input.
    pub fn parse(src: &str) -> Result<Expr> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(SimError::ParseError("empty formula".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let ast = parser.parse_expr(0)?;
        if parser.pos != parser.tokens.len() {
            return Err(SimError::ParseError(format!(
                "trailing input after expression: {:?}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(Expr {
            src: src.to_string(),
            ast,
        })
    }

    /// The original formula text.
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Aliases referenced by the formula, sorted and unique.
    pub fn aliases(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        collect_aliases(&self.ast, &mut set);
        set
    }

    /// Checks that a formula parses and references only known aliases.
    /// Used at definition time, before any evaluation happens.
    pub fn valid(src: &str, known: &HashSet<String>) -> bool {
        match Expr::parse(src) {
            Ok(expr) => expr.aliases().iter().all(|a| known.contains(a)),
            Err(_) => false,
        }
    }

    /// Evaluates the formula against an alias-to-value map.
    ///
    /// Fails with [SimError::UnboundAlias] when a referenced alias is
    /// missing and [SimError::Domain] when the computation leaves the
    /// real domain or overflows.
    pub fn eval(&self, env: &HashMap<String, f64>) -> Result<f64> {
        eval_ast(&self.ast, env)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.src)
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.src)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let src = String::deserialize(deserializer)?;
        Expr::parse(&src).map_err(D::Error::custom)
    }
}

fn collect_aliases(ast: &Ast, set: &mut BTreeSet<String>) {
    match ast {
        Ast::Num(_) => {}
        Ast::Var(name) => {
            set.insert(name.clone());
        }
        Ast::Neg(inner) => collect_aliases(inner, set),
        Ast::Bin(_, lhs, rhs) => {
            collect_aliases(lhs, set);
            collect_aliases(rhs, set);
        }
        Ast::Call(_, args) => {
            for a in args {
                collect_aliases(a, set);
            }
        }
    }
}

fn finite(v: f64, what: &str) -> Result<f64> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(SimError::Domain(format!("non-finite result in {what}")))
    }
}

fn eval_ast(ast: &Ast, env: &HashMap<String, f64>) -> Result<f64> {
    match ast {
        Ast::Num(v) => Ok(*v),
        Ast::Var(name) => env
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnboundAlias(name.clone())),
        Ast::Neg(inner) => Ok(-eval_ast(inner, env)?),
        Ast::Bin(op, lhs, rhs) => {
            let a = eval_ast(lhs, env)?;
            let b = eval_ast(rhs, env)?;
            let v = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Pow => a.powf(b),
            };
            finite(v, &format!("{op:?}"))
        }
        Ast::Call(func, args) => {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(eval_ast(a, env)?);
            }
            let v = match func {
                Func::Exp => vals[0].exp(),
                Func::Log => {
                    if vals[0] <= 0. {
                        return Err(SimError::Domain(format!("log of {}", vals[0])));
                    }
                    vals[0].ln()
                }
                Func::Log10 => {
                    if vals[0] <= 0. {
                        return Err(SimError::Domain(format!("log10 of {}", vals[0])));
                    }
                    vals[0].log10()
                }
                Func::Sqrt => {
                    if vals[0] < 0. {
                        return Err(SimError::Domain(format!("sqrt of {}", vals[0])));
                    }
                    vals[0].sqrt()
                }
                Func::Abs => vals[0].abs(),
                Func::Sin => vals[0].sin(),
                Func::Cos => vals[0].cos(),
                Func::Tan => vals[0].tan(),
                Func::Min => vals.iter().copied().fold(f64::INFINITY, f64::min),
                Func::Max => vals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            finite(v, &format!("{func:?}"))
        }
    }
}
