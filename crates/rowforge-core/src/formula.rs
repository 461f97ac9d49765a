//! Arithmetic formula grammar for FORMULA transforms
//!
//! Formulas are small arithmetic expressions over `+ - * / ( )` with
//! `{fieldName}` placeholders, e.g. `({quantity} * {unitPrice}) - {discount}`.
//! Expressions are validated before storage and evaluated against numeric
//! field values at transform time. This is deliberately not a general
//! expression language: no function calls, no comparisons, no side effects.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Placeholder(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Placeholder(String),
    Negate(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

fn formula_error(expression: &str, message: impl Into<String>) -> Error {
    Error::InvalidFormula {
        expression: expression.to_string(),
        message: message.into(),
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
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
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '{' => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_alphanumeric() || c == '_' => name.push(c),
                        Some(c) => {
                            return Err(formula_error(
                                expression,
                                format!("invalid character '{}' in placeholder", c),
                            ));
                        }
                        None => {
                            return Err(formula_error(expression, "unterminated placeholder"));
                        }
                    }
                }
                if name.is_empty() {
                    return Err(formula_error(expression, "empty placeholder"));
                }
                if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                    return Err(formula_error(
                        expression,
                        format!("placeholder '{}' must not start with a digit", name),
                    ));
                }
                tokens.push(Token::Placeholder(name));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal.parse::<f64>().map_err(|_| {
                    formula_error(expression, format!("invalid number literal '{}'", literal))
                })?;
                tokens.push(Token::Number(value));
            }
            c => {
                return Err(formula_error(
                    expression,
                    format!("disallowed character '{}'", c),
                ));
            }
        }
    }

    Ok(tokens)
}

/// Recursive-descent parser over the token stream.
///
/// Grammar:
/// ```text
/// expr   := term (('+' | '-') term)*
/// term   := factor (('*' | '/') factor)*
/// factor := '-' factor | NUMBER | PLACEHOLDER | '(' expr ')'
/// ```
struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expression: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            expression,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse(mut self) -> Result<Expr> {
        if self.tokens.is_empty() {
            return Err(formula_error(self.expression, "empty expression"));
        }
        let expr = self.expr()?;
        if self.pos != self.tokens.len() {
            return Err(formula_error(
                self.expression,
                "unexpected trailing tokens (unbalanced parentheses?)",
            ));
        }
        Ok(expr)
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.advance();
                    let right = self.term()?;
                    left = Expr::Add(Box::new(left), Box::new(right));
                }
                Token::Minus => {
                    self.advance();
                    let right = self.term()?;
                    left = Expr::Sub(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.advance();
                    let right = self.factor()?;
                    left = Expr::Mul(Box::new(left), Box::new(right));
                }
                Token::Slash => {
                    self.advance();
                    let right = self.factor()?;
                    left = Expr::Div(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Minus) => Ok(Expr::Negate(Box::new(self.factor()?))),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Placeholder(name)) => Ok(Expr::Placeholder(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(formula_error(self.expression, "missing closing parenthesis")),
                }
            }
            Some(token) => Err(formula_error(
                self.expression,
                format!("unexpected token {:?}", token),
            )),
            None => Err(formula_error(self.expression, "unexpected end of expression")),
        }
    }
}

fn parse(expression: &str) -> Result<Expr> {
    let tokens = tokenize(expression)?;
    Parser::new(expression, tokens).parse()
}

/// Validate a formula expression without evaluating it.
///
/// Storage-time check: balanced parentheses, no disallowed characters,
/// well-formed placeholder names, parseable structure.
pub fn validate(expression: &str) -> Result<()> {
    parse(expression).map(|_| ())
}

/// Placeholder names referenced by the expression, in first-use order,
/// deduplicated.
pub fn placeholders(expression: &str) -> Result<Vec<String>> {
    let tokens = tokenize(expression)?;
    let mut names = Vec::new();
    for token in tokens {
        if let Token::Placeholder(name) = token {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Evaluate an expression against resolved placeholder values.
pub fn eval(expression: &str, vars: &HashMap<String, f64>) -> Result<f64> {
    let expr = parse(expression)?;
    eval_expr(expression, &expr, vars)
}

fn eval_expr(expression: &str, expr: &Expr, vars: &HashMap<String, f64>) -> Result<f64> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Placeholder(name) => vars.get(name).copied().ok_or_else(|| {
            formula_error(expression, format!("no value for placeholder '{}'", name))
        }),
        Expr::Negate(inner) => Ok(-eval_expr(expression, inner, vars)?),
        Expr::Add(l, r) => Ok(eval_expr(expression, l, vars)? + eval_expr(expression, r, vars)?),
        Expr::Sub(l, r) => Ok(eval_expr(expression, l, vars)? - eval_expr(expression, r, vars)?),
        Expr::Mul(l, r) => Ok(eval_expr(expression, l, vars)? * eval_expr(expression, r, vars)?),
        Expr::Div(l, r) => {
            let divisor = eval_expr(expression, r, vars)?;
            if divisor == 0.0 {
                return Err(formula_error(expression, "division by zero"));
            }
            Ok(eval_expr(expression, l, vars)? / divisor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vars(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[rstest]
    #[case("1 + 2", 3.0)]
    #[case("2 * 3 + 4", 10.0)]
    #[case("2 + 3 * 4", 14.0)]
    #[case("(2 + 3) * 4", 20.0)]
    #[case("10 / 4", 2.5)]
    #[case("-3 + 5", 2.0)]
    #[case("-(2 + 3)", -5.0)]
    #[case("1.5 * 2", 3.0)]
    fn test_eval_literals(#[case] expr: &str, #[case] expected: f64) {
        assert_eq!(eval(expr, &HashMap::new()).unwrap(), expected);
    }

    #[test]
    fn test_eval_with_placeholders() {
        let vars = vars(&[("quantity", 3.0), ("unitPrice", 9.5), ("discount", 2.5)]);
        let result = eval("({quantity} * {unitPrice}) - {discount}", &vars).unwrap();
        assert_eq!(result, 26.0);
    }

    #[test]
    fn test_eval_missing_placeholder() {
        let result = eval("{missing} + 1", &HashMap::new());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("missing"));
    }

    #[test]
    fn test_division_by_zero() {
        let result = eval("1 / 0", &HashMap::new());
        assert!(result.unwrap_err().to_string().contains("division by zero"));
    }

    #[rstest]
    #[case("(1 + 2")]
    #[case("1 + 2)")]
    #[case("1 +")]
    #[case("")]
    #[case("{bad name}")]
    #[case("{1abc}")]
    #[case("{}")]
    #[case("{unterminated")]
    #[case("1 & 2")]
    #[case("foo")]
    fn test_validate_rejects(#[case] expr: &str) {
        assert!(validate(expr).is_err(), "expected rejection: {:?}", expr);
    }

    #[rstest]
    #[case("{a} + {b}")]
    #[case("1")]
    #[case("-{x}")]
    #[case("((({deep})))")]
    fn test_validate_accepts(#[case] expr: &str) {
        assert!(validate(expr).is_ok(), "expected acceptance: {:?}", expr);
    }

    #[test]
    fn test_placeholders_in_order_deduplicated() {
        let names = placeholders("{b} + {a} * {b}").unwrap();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_error_carries_expression() {
        let err = validate("1 $ 2").unwrap_err();
        assert!(err.to_string().contains("1 $ 2"));
        assert_eq!(err.code(), "FORMULA_INVALID");
    }
}
