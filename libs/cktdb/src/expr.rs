//! Symbolic arithmetic expressions for parameter values.
//!
//! A parameter value is either a numeric literal (with an optional
//! engineering magnitude suffix, e.g. `0.1u` or `15meg`) or an arithmetic
//! expression over other parameter names, e.g. `"m*w*l*cga"`. Evaluation is
//! a pure function of the expression and a flat numeric namespace; all
//! arithmetic is IEEE double-precision.

use arcstr::ArcStr;
use thiserror::Error;

use crate::params::ParamContext;

/// An error evaluating a symbolic expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// The expression could not be parsed or evaluated structurally.
    #[error("malformed expression `{0}`")]
    Malformed(ArcStr),
    /// An identifier is not present in the evaluation namespace.
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(ArcStr),
    /// The right operand of a division evaluated to zero.
    #[error("division by zero in `{0}`")]
    DivisionByZero(ArcStr),
}

#[derive(Debug, Clone)]
enum ExprToken {
    Number(f64),
    Ident(ArcStr),
    Op(char),
    LParen,
    RParen,
}

/// Parses a numeric literal with an optional engineering magnitude suffix.
///
/// `meg` (1e6) and `mil` (25.4e-6) are matched before the single-letter
/// forms `t g k m u n p f`; any trailing unit letters after the magnitude
/// suffix are ignored, so `1fF` is one femtofarad and `20nm` is twenty
/// nanometers. Returns [`None`] for anything that is not a number.
pub fn parse_number(token: &str) -> Option<f64> {
    let s = token.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+' && c != 'e')
        .unwrap_or(s.len());
    if num_end == 0 {
        return None;
    }
    let (head, tail) = s.split_at(num_end);
    let value: f64 = head.parse().ok()?;
    if tail.is_empty() {
        return Some(value);
    }

    let (multiplier, rest) = if let Some(rest) = tail.strip_prefix("meg") {
        (1e6, rest)
    } else if let Some(rest) = tail.strip_prefix("mil") {
        (25.4e-6, rest)
    } else {
        let mult = match tail.as_bytes()[0] {
            b't' => 1e12,
            b'g' => 1e9,
            b'k' => 1e3,
            b'm' => 1e-3,
            b'u' => 1e-6,
            b'n' => 1e-9,
            b'p' => 1e-12,
            b'f' => 1e-15,
            _ => return None,
        };
        (mult, &tail[1..])
    };
    // trailing unit letters (`1fF`, `20nm`) carry no magnitude
    if !rest.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(value * multiplier)
}

fn unquote(s: &str) -> &str {
    let t = s.trim();
    if t.len() >= 2 && t.starts_with('"') && t.ends_with('"') {
        &t[1..t.len() - 1]
    } else {
        t
    }
}

/// Evaluates a symbolic value against a flat numeric namespace.
///
/// Double-quoted values are unquoted first; identifiers are looked up by
/// lowercase name. Evaluating the same expression against the same
/// namespace always yields the same result.
pub fn evaluate(expression: &str, ns: &ParamContext) -> Result<f64, ExprError> {
    let expr = unquote(expression);
    if let Some(v) = parse_number(expr) {
        return Ok(v);
    }
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(ExprError::Malformed(expression.into()));
    }
    let rpn = to_rpn(tokens).ok_or_else(|| ExprError::Malformed(expression.into()))?;
    eval_rpn(&rpn, ns, expression)
}

fn tokenize(expr: &str) -> Result<Vec<ExprToken>, ExprError> {
    let mut tokens = Vec::new();
    let mut buf = String::new();

    fn flush(buf: &mut String, tokens: &mut Vec<ExprToken>) {
        if buf.is_empty() {
            return;
        }
        if let Some(v) = parse_number(buf) {
            tokens.push(ExprToken::Number(v));
        } else {
            tokens.push(ExprToken::Ident(ArcStr::from(buf.to_ascii_lowercase())));
        }
        buf.clear();
    }

    for ch in expr.chars() {
        match ch {
            c if c.is_whitespace() => flush(&mut buf, &mut tokens),
            '+' | '-' => {
                // keep exponent signs attached: `1e-15`
                let exponent = (buf.ends_with('e') || buf.ends_with('E'))
                    && buf
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_digit() || c == '.');
                if exponent {
                    buf.push(ch);
                } else {
                    flush(&mut buf, &mut tokens);
                    tokens.push(ExprToken::Op(ch));
                }
            }
            '*' | '/' => {
                flush(&mut buf, &mut tokens);
                tokens.push(ExprToken::Op(ch));
            }
            '(' => {
                flush(&mut buf, &mut tokens);
                tokens.push(ExprToken::LParen);
            }
            ')' => {
                flush(&mut buf, &mut tokens);
                tokens.push(ExprToken::RParen);
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => buf.push(c),
            _ => return Err(ExprError::Malformed(expr.into())),
        }
    }
    flush(&mut buf, &mut tokens);
    Ok(tokens)
}

fn precedence(op: char) -> u8 {
    match op {
        '+' | '-' => 1,
        '*' | '/' => 2,
        _ => 0,
    }
}

fn to_rpn(tokens: Vec<ExprToken>) -> Option<Vec<ExprToken>> {
    let mut output = Vec::new();
    let mut ops: Vec<ExprToken> = Vec::new();
    let mut prev_was_value = false;

    for token in tokens {
        match token {
            ExprToken::Number(_) | ExprToken::Ident(_) => {
                output.push(token);
                prev_was_value = true;
            }
            ExprToken::Op(op) => {
                if !prev_was_value {
                    // unary sign: rewrite as `0 - x` / `0 + x`
                    output.push(ExprToken::Number(0.0));
                }
                loop {
                    match ops.last() {
                        Some(&ExprToken::Op(top)) if precedence(top) >= precedence(op) => {
                            let top = ops.pop().unwrap();
                            output.push(top);
                        }
                        _ => break,
                    }
                }
                ops.push(ExprToken::Op(op));
                prev_was_value = false;
            }
            ExprToken::LParen => {
                ops.push(ExprToken::LParen);
                prev_was_value = false;
            }
            ExprToken::RParen => {
                loop {
                    match ops.pop() {
                        Some(ExprToken::LParen) => break,
                        Some(t) => output.push(t),
                        None => return None,
                    }
                }
                prev_was_value = true;
            }
        }
    }

    while let Some(op) = ops.pop() {
        if matches!(op, ExprToken::LParen | ExprToken::RParen) {
            return None;
        }
        output.push(op);
    }
    Some(output)
}

fn eval_rpn(rpn: &[ExprToken], ns: &ParamContext, expression: &str) -> Result<f64, ExprError> {
    let mut stack: Vec<f64> = Vec::new();
    for token in rpn {
        match token {
            ExprToken::Number(v) => stack.push(*v),
            ExprToken::Ident(name) => {
                let v = ns
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| ExprError::UnknownIdentifier(name.clone()))?;
                stack.push(v);
            }
            ExprToken::Op(op) => {
                let b = stack
                    .pop()
                    .ok_or_else(|| ExprError::Malformed(expression.into()))?;
                let a = stack
                    .pop()
                    .ok_or_else(|| ExprError::Malformed(expression.into()))?;
                let v = match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => {
                        if b == 0.0 {
                            return Err(ExprError::DivisionByZero(expression.into()));
                        }
                        a / b
                    }
                    _ => return Err(ExprError::Malformed(expression.into())),
                };
                stack.push(v);
            }
            _ => return Err(ExprError::Malformed(expression.into())),
        }
    }
    if stack.len() == 1 {
        Ok(stack[0])
    } else {
        Err(ExprError::Malformed(expression.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ns(pairs: &[(&str, f64)]) -> ParamContext {
        pairs
            .iter()
            .map(|(k, v)| (ArcStr::from(*k), *v))
            .collect()
    }

    #[test]
    fn suffixed_numbers() {
        assert_relative_eq!(parse_number("1.5").unwrap(), 1.5);
        assert_relative_eq!(parse_number("4.7k").unwrap(), 4.7e3);
        assert_relative_eq!(parse_number("10M").unwrap(), 10e-3);
        assert_relative_eq!(parse_number("10MEG").unwrap(), 10e6);
        assert_relative_eq!(parse_number("100n").unwrap(), 100e-9);
        assert_relative_eq!(parse_number("1fF").unwrap(), 1e-15);
        assert_relative_eq!(parse_number("20nm").unwrap(), 20e-9);
        assert_relative_eq!(parse_number("1e-15").unwrap(), 1e-15);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n1"), None);
    }

    #[test]
    fn arithmetic() {
        let ns = ns(&[("w", 2.0), ("l", 1.0)]);
        assert_relative_eq!(evaluate("w*l", &ns).unwrap(), 2.0);
        assert_relative_eq!(evaluate("\"(w+l)/2\"", &ns).unwrap(), 1.5);
        assert_relative_eq!(evaluate("-w", &ns).unwrap(), -2.0);
        assert_relative_eq!(evaluate("W * 2u", &ns).unwrap(), 4e-6);
        assert_relative_eq!(evaluate("1fF/(1um*20nm)", &ns).unwrap(), 0.05);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let ns = ns(&[("a", 3.0), ("b", 4.0)]);
        let first = evaluate("a*b + b/a", &ns).unwrap();
        let second = evaluate("a*b + b/a", &ns).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn errors() {
        let ns = ns(&[("w", 2.0)]);
        assert!(matches!(
            evaluate("w*h", &ns),
            Err(ExprError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            evaluate("w/0", &ns),
            Err(ExprError::DivisionByZero(_))
        ));
        assert!(matches!(
            evaluate("w*(", &ns),
            Err(ExprError::Malformed(_))
        ));
        assert!(matches!(evaluate("", &ns), Err(ExprError::Malformed(_))));
    }
}
