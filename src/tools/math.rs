//! Calculator tool: a small recursive-descent arithmetic evaluator
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := ("-" | "+") unary | power
//! power   := primary (("^" | "**") unary)?
//! primary := number | name | name "(" expr ")" | "(" expr ")"
//! ```
//!
//! `^` is exponentiation and right-associative; unary minus binds looser
//! than it, so `-2^2` is `-4`.

use std::sync::Arc;

use async_trait::async_trait;

use super::registry::{ArgSpec, Constraint, ToolSpec};
use super::{str_arg, Arguments, ToolContext, ToolError, ToolHandler};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MathError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unknown function or constant '{0}'")]
    UnknownName(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NotFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, MathError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() || c == ',' && is_digit_group(&chars, i) => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == ',' && is_digit_group(&chars, i))
                {
                    i += 1;
                }
                // scientific notation: 1e5, 2.5E-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().filter(|&&c| c != ',').collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| MathError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Num(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name = chars[start..i].iter().collect::<String>().to_lowercase();
                // "3 x 4" reads as multiplication
                tokens.push(if name == "x" { Token::Star } else { Token::Ident(name) });
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 2;
            }
            _ => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' | '−' => Token::Minus,
                    '*' | '×' => Token::Star,
                    '/' | '÷' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '(' | '[' => Token::LParen,
                    ')' | ']' => Token::RParen,
                    other => return Err(MathError::UnexpectedChar(other)),
                });
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// `1,000,000` style thousands separator: a comma followed by exactly three digits
fn is_digit_group(chars: &[char], comma: usize) -> bool {
    comma > 0
        && chars[comma - 1].is_ascii_digit()
        && chars.len() >= comma + 4
        && chars[comma + 1..comma + 4].iter().all(char::is_ascii_digit)
        && chars.get(comma + 4).map_or(true, |c| !c.is_ascii_digit())
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), MathError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(MathError::UnexpectedToken(format!("{t:?}"))),
            None => Err(MathError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<f64, MathError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, MathError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(MathError::DivisionByZero);
                    }
                    value /= rhs;
                }
                Some(Token::Percent) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(MathError::DivisionByZero);
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, MathError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, MathError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, MathError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let arg = self.expr()?;
                    self.expect(Token::RParen)?;
                    apply(&name, arg)
                } else {
                    constant(&name)
                }
            }
            Some(t) => Err(MathError::UnexpectedToken(format!("{t:?}"))),
            None => Err(MathError::UnexpectedEnd),
        }
    }
}

fn constant(name: &str) -> Result<f64, MathError> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        _ => Err(MathError::UnknownName(name.to_string())),
    }
}

fn apply(name: &str, x: f64) -> Result<f64, MathError> {
    Ok(match name {
        "sqrt" => x.sqrt(),
        "abs" => x.abs(),
        "ln" => x.ln(),
        "log" | "log10" => x.log10(),
        "log2" => x.log2(),
        "exp" => x.exp(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => x.round(),
        _ => return Err(MathError::UnknownName(name.to_string())),
    })
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<f64, MathError> {
    let mut parser = Parser {
        tokens: tokenize(expression)?,
        pos: 0,
    };
    let value = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(MathError::UnexpectedToken(format!("{extra:?}")));
    }
    if !value.is_finite() {
        return Err(MathError::NotFinite);
    }
    Ok(value)
}

/// Integral values print without a fraction, others with at most 10 decimals
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let text = format!("{value:.10}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

struct Calculator;

#[async_trait]
impl ToolHandler for Calculator {
    async fn call(&self, args: &Arguments, _ctx: &ToolContext) -> Result<String, ToolError> {
        let expression = str_arg(args, "expression")?;
        let value = evaluate(expression)
            .map_err(|e| ToolError::InvalidArguments(format!("cannot evaluate '{expression}': {e}")))?;
        Ok(format_number(value))
    }
}

pub fn calculator() -> ToolSpec {
    ToolSpec::new(
        "calculator",
        "Evaluate an arithmetic expression. Supports + - * / % ^ (or **), parentheses, \
         sqrt, abs, ln, log, exp, sin, cos, tan, floor, ceil, round and the constants pi and e. \
         Use for any calculation the user asks for.",
        vec![ArgSpec::string("expression", "The expression to evaluate, e.g. '2^10 + 5 * 3'")
            .required()
            .constraint(Constraint::MaxLength(500))],
        Arc::new(Calculator),
    )
}
