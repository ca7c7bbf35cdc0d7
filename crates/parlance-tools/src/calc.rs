//! Arithmetic expression evaluator for the `calculate` tool.
//!
//! Recursive-descent parser over a small expression grammar: the four
//! arithmetic operators plus `%`, exponentiation (`^` or `**`, right
//! associative), unary minus, parentheses, the constants `pi` and `e`, and
//! a fixed set of math functions. Evaluation happens during parsing; there
//! is no AST.

use anyhow::{bail, Result};

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        bail!("unexpected trailing input at token {}", parser.pos);
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut raw = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' {
                        raw.push(d);
                        chars.next();
                        // Exponent sign directly after e/E.
                        if (d == 'e' || d == 'E') && matches!(chars.peek(), Some('+') | Some('-')) {
                            raw.push(chars.next().unwrap_or_default());
                        }
                    } else {
                        break;
                    }
                }
                let value: f64 = raw.parse().map_err(|_| anyhow::anyhow!("bad number: {raw}"))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                // `**` is exponentiation.
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Caret);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '^' => {
                chars.next();
                tokens.push(Token::Caret);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            other => bail!("unexpected character: {other:?}"),
        }
    }

    if tokens.is_empty() {
        bail!("empty expression");
    }
    Ok(tokens)
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => bail!("expected {token:?}, found {other:?}"),
        }
    }

    fn expr(&mut self) -> Result<f64> {
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

    fn term(&mut self) -> Result<f64> {
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
                        bail!("division by zero");
                    }
                    value /= rhs;
                }
                Some(Token::Percent) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        bail!("modulo by zero");
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    /// Unary minus binds looser than exponentiation: `-2^2` is `-(2^2)`.
    fn unary(&mut self) -> Result<f64> {
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

    fn power(&mut self) -> Result<f64> {
        let base = self.atom()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.pos += 1;
            // Right associative: 2^3^2 = 2^(3^2). The exponent may carry its
            // own sign: 2^-3.
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let mut args = vec![self.expr()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    apply_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            other => bail!("expected a value, found {other:?}"),
        }
    }
}

fn constant(name: &str) -> Result<f64> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        other => bail!("unknown constant: {other}"),
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64> {
    let unary = |f: fn(f64) -> f64| -> Result<f64> {
        if args.len() != 1 {
            bail!("{name} expects 1 argument, got {}", args.len());
        }
        Ok(f(args[0]))
    };
    match name {
        "sqrt" => {
            let v = unary(f64::sqrt)?;
            if v.is_nan() {
                bail!("sqrt of a negative number");
            }
            Ok(v)
        }
        "abs" => unary(f64::abs),
        "ln" => unary(f64::ln),
        "log" | "log10" => unary(f64::log10),
        "log2" => unary(f64::log2),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "asin" => unary(f64::asin),
        "acos" => unary(f64::acos),
        "atan" => unary(f64::atan),
        "ceil" => unary(f64::ceil),
        "floor" => unary(f64::floor),
        "round" => unary(f64::round),
        "min" | "max" => {
            if args.len() < 2 {
                bail!("{name} expects at least 2 arguments");
            }
            let init = args[0];
            Ok(args[1..].iter().fold(init, |acc, &v| {
                if name == "min" {
                    acc.min(v)
                } else {
                    acc.max(v)
                }
            }))
        }
        "pow" => {
            if args.len() != 2 {
                bail!("pow expects 2 arguments, got {}", args.len());
            }
            Ok(args[0].powf(args[1]))
        }
        other => bail!("unknown function: {other}"),
    }
}
