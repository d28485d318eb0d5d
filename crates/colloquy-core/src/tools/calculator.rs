//! Arithmetic tool for the command-line assistant
//!
//! Evaluates a single arithmetic expression over `+ - * / ^`, parentheses and
//! `sqrt(...)`. Tool parameters are restricted to strings, integers and
//! booleans, so the whole expression arrives as one string and is parsed here
//! rather than passed as separate numeric operands.

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};

use crate::tools::{DeclaredType, FnTool, Signature, Tool};

pub fn calculator_tool() -> Tool {
    let function = FnTool::new(
        Signature::new("calculator").param("expression", DeclaredType::String),
        |args: Map<String, Value>| async move { evaluate_arguments(&args) },
    );

    // The builder only fails on a malformed declaration, which is fixed above.
    match Tool::builder(function)
        .description(
            "Evaluates an arithmetic expression with +, -, *, /, ^, parentheses and sqrt(x)",
        )
        .parameter("expression", "The expression to evaluate, for example \"(2 + 3) * 4\"")
        .required("expression")
        .build()
    {
        Ok(tool) => tool,
        Err(e) => unreachable!("calculator declaration is invalid: {}", e),
    }
}

fn evaluate_arguments(args: &Map<String, Value>) -> Result<Value> {
    let expression = args
        .get("expression")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing or invalid 'expression' parameter"))?;

    let result = evaluate(expression)?;
    let formatted = format_number(result);
    log::info!("Calculator: {} = {}", expression, formatted);

    Ok(json!({ "expression": expression, "result": formatted }))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.6}", value)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// Deepest nesting of parentheses, unary signs and exponents accepted.
const MAX_DEPTH: usize = 256;

pub fn evaluate(expression: &str) -> Result<f64> {
    let mut parser = Parser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.chars.len() {
        bail!(
            "Unexpected '{}' at position {}",
            parser.chars[parser.pos],
            parser.pos
        );
    }
    if !value.is_finite() {
        bail!("Result is not a finite number");
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<f64>) -> Result<f64> {
        if self.depth >= MAX_DEPTH {
            bail!("Expression is nested more than {} levels deep", MAX_DEPTH);
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    // term := power (('*' | '/') power)*
    fn term(&mut self) -> Result<f64> {
        let mut value = self.power()?;
        loop {
            if self.eat('*') {
                value *= self.power()?;
            } else if self.eat('/') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    bail!("Division by zero is not allowed");
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    // power := unary ('^' power)?
    fn power(&mut self) -> Result<f64> {
        let base = self.unary()?;
        if self.eat('^') {
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        if self.eat('+') {
            return self.nested(Self::unary);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64> {
        if self.eat('(') {
            let value = self.nested(Self::expr)?;
            if !self.eat(')') {
                bail!("Missing closing parenthesis");
            }
            return Ok(value);
        }

        if self.chars[self.pos..].starts_with(&['s', 'q', 'r', 't']) {
            self.pos += 4;
            if !self.eat('(') {
                bail!("Expected '(' after sqrt");
            }
            let value = self.nested(Self::expr)?;
            if !self.eat(')') {
                bail!("Missing closing parenthesis");
            }
            if value < 0.0 {
                bail!("Cannot calculate square root of negative number");
            }
            return Ok(value.sqrt());
        }

        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return match self.peek() {
                Some(c) => Err(anyhow!("Unexpected '{}' at position {}", c, self.pos)),
                None => Err(anyhow!("Unexpected end of expression")),
            };
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| anyhow!("Invalid number '{}'", literal))
    }
}
