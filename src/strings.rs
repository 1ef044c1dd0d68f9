// String interpolation and key matching

use regex::Regex;
use serde_json::Value as Json;

use crate::ast::{AmlString, StringPart};
use crate::context::Context;
use crate::error::{wrap_err, EvalError};
use crate::expression::evaluate_expression;
use crate::scope::Scope;

/// Outcome of the cheap key pre-match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouldBe {
    True,
    False,
    Maybe,
}

/// Evaluate a string: concatenate literal fragments with the materialized
/// value of each interpolation hole, then apply indent trimming.
pub fn evaluate_string(ctx: &Context, scope: &Scope, s: &AmlString) -> Result<String, EvalError> {
    let inner = || -> Result<String, EvalError> {
        let mut buf = String::new();
        for part in &s.parts {
            match part {
                StringPart::Literal(text) => buf.push_str(text),
                StringPart::Expression(expr) => {
                    let v = evaluate_expression(ctx, scope, expr)?;
                    buf.push_str(&render(&v.interface(ctx)?));
                }
            }
        }
        Ok(trim_indent(&buf))
    };
    inner().map_err(|e| wrap_err(&s.pos, e))
}

/// Render an interpolated value: scalars inline, composites as JSON text.
fn render(v: &Json) -> String {
    match v {
        Json::Null => "null".to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Strip the common indent of a multi-line string whose first line is blank.
/// The whitespace prefix of the second line (a run of tabs, else spaces) is
/// removed from every line; the leading blank line is dropped.
pub fn trim_indent(s: &str) -> String {
    let mut lines = s.split('\n');
    match lines.next() {
        Some("") => {}
        _ => return s.to_string(),
    }
    let Some(first) = lines.next() else {
        return s.to_string();
    };

    let mut prefix = "";
    for c in ['\t', ' '] {
        if prefix.is_empty() {
            let count = first.chars().take_while(|&b| b == c).count();
            prefix = &first[..count];
        }
    }
    if prefix.is_empty() {
        return s.to_string();
    }

    let mut result = first.strip_prefix(prefix).unwrap_or(first).to_string();
    for line in lines {
        result.push('\n');
        result.push_str(line.strip_prefix(prefix).unwrap_or(line));
    }
    result
}

/// Cheap match of a requested key against an interpolated key AST.
///
/// Single-literal keys compare directly. Otherwise the key pattern is
/// over-approximated as a regex with `.*` in place of each hole: a hit is
/// only `Maybe` and callers must fall back to full evaluation.
pub fn quick_match(s: &AmlString, val: &str) -> CouldBe {
    if let Some(literal) = s.as_literal() {
        if s.parts.is_empty() && !val.is_empty() {
            return CouldBe::False;
        }
        if literal == val {
            return CouldBe::True;
        }
        return CouldBe::False;
    }
    match Regex::new(&string_to_pattern(s)) {
        Ok(re) if re.is_match(val) => CouldBe::Maybe,
        Ok(_) => CouldBe::False,
        Err(_) => CouldBe::Maybe,
    }
}

fn string_to_pattern(s: &AmlString) -> String {
    let mut buf = String::from("^");
    for part in &s.parts {
        match part {
            StringPart::Literal(text) => buf.push_str(&regex::escape(text)),
            StringPart::Expression(_) => buf.push_str(".*"),
        }
    }
    buf.push('$');
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Position, Selector, SelectorBase};

    fn interp(parts: Vec<StringPart>) -> AmlString {
        AmlString {
            pos: Position::default(),
            parts,
            multiline: false,
        }
    }

    fn hole() -> StringPart {
        StringPart::Expression(Expression {
            pos: Position::default(),
            selector: Selector {
                pos: Position::default(),
                not: false,
                base: SelectorBase::Identifier("x".to_string()),
                lookups: Vec::new(),
            },
            operators: Vec::new(),
        })
    }

    #[test]
    fn test_trim_indent() {
        assert_eq!(trim_indent("plain"), "plain");
        assert_eq!(trim_indent("\n    a\n    b"), "a\nb");
        assert_eq!(trim_indent("\n\tx\n\t\ty"), "x\n\ty");
        // lines without the full prefix are left alone
        assert_eq!(trim_indent("\n  a\nb"), "a\nb");
        assert_eq!(trim_indent("\nno-indent"), "\nno-indent");
    }

    #[test]
    fn test_quick_match_literal() {
        let key = interp(vec![StringPart::Literal("name".to_string())]);
        assert_eq!(quick_match(&key, "name"), CouldBe::True);
        assert_eq!(quick_match(&key, "other"), CouldBe::False);
    }

    #[test]
    fn test_quick_match_empty() {
        let key = interp(vec![]);
        assert_eq!(quick_match(&key, ""), CouldBe::True);
        assert_eq!(quick_match(&key, "k"), CouldBe::False);
    }

    #[test]
    fn test_quick_match_interpolated() {
        let key = interp(vec![StringPart::Literal("pre-".to_string()), hole()]);
        assert_eq!(quick_match(&key, "pre-anything"), CouldBe::Maybe);
        assert_eq!(quick_match(&key, "nope"), CouldBe::False);
    }
}
