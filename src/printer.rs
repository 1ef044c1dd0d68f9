// Canonical AML rendering of an AST

use std::fmt::Write;

use crate::ast::{
    AmlString, Array, BinOp, Call, Expression, Field, For, If, Key, Lookup, LookupKind, Object,
    Selector, SelectorBase, StringPart, Value, ValueKind,
};

/// Render a parsed document back to AML text.
pub fn print(value: &Value) -> String {
    let mut out = String::new();
    let ctx = PrintContext {
        indent: String::new(),
        top: true,
    };
    print_value(&mut out, &ctx, value);
    out
}

#[derive(Clone)]
struct PrintContext {
    indent: String,
    top: bool,
}

impl PrintContext {
    fn nested(&self) -> PrintContext {
        PrintContext {
            indent: format!("{}\t", self.indent),
            top: false,
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn print_value(out: &mut String, ctx: &PrintContext, value: &Value) {
    match &value.kind {
        ValueKind::Null => out.push_str("null"),
        ValueKind::Bool(true) => out.push_str("true"),
        ValueKind::Bool(false) => out.push_str("false"),
        ValueKind::Number(n) => out.push_str(n.as_str()),
        ValueKind::String(s) => print_string(out, ctx, s),
        ValueKind::Array(a) => print_array(out, ctx, a),
        ValueKind::Object(o) => print_object(out, ctx, o),
        ValueKind::Expression(e) => print_expression(out, ctx, e),
        ValueKind::Comprehension(f) => {
            out.push_str("[ ");
            print_for(out, ctx, f);
            out.push(']');
        }
    }
}

fn print_object(out: &mut String, ctx: &PrintContext, object: &Object) {
    if object.fields.is_empty() {
        if !ctx.top {
            out.push_str("{}");
        }
        return;
    }

    // single-field objects written on the source line stay inline
    if !ctx.top && object.fields.len() == 1 && object.pos.line == object.fields[0].pos.line {
        out.push_str("{ ");
        print_field(out, ctx, &object.fields[0]);
        out.push_str(" }");
        return;
    }

    let nested = ctx.nested();
    if !ctx.top {
        out.push_str("{\n");
    }
    let field_ctx = if ctx.top { ctx.clone() } else { nested.clone() };
    for field in &object.fields {
        out.push_str(&field_ctx.indent);
        print_field(out, &field_ctx, field);
        out.push('\n');
    }
    if !ctx.top {
        out.push_str(&ctx.indent);
        out.push('}');
    }
}

fn print_field(out: &mut String, ctx: &PrintContext, field: &Field) {
    if let Some(if_field) = &field.if_field {
        print_if(out, ctx, if_field);
        return;
    }
    if let Some(for_field) = &field.for_field {
        print_for(out, ctx, for_field);
        return;
    }
    let Some(value) = &field.value else {
        return;
    };
    if field.let_ {
        out.push_str("let ");
    }
    if !field.embedded {
        print_key(out, ctx, &field.key);
    }
    print_value(out, ctx, value);
}

fn print_key(out: &mut String, ctx: &PrintContext, key: &Key) {
    let Some(name) = &key.name else {
        return;
    };
    if key.is_match {
        out.push_str("[~=");
    }
    match name.as_literal() {
        Some(literal) if !key.is_match && is_identifier(literal) => out.push_str(literal),
        _ => print_string(out, ctx, name),
    }
    if key.is_match {
        out.push(']');
    }
    out.push_str(": ");
}

fn print_string(out: &mut String, ctx: &PrintContext, s: &AmlString) {
    let quote = if s.multiline { "\"\"\"" } else { "\"" };
    out.push_str(quote);
    for part in &s.parts {
        match part {
            StringPart::Literal(text) => {
                if s.multiline {
                    out.push_str(text);
                } else {
                    for c in text.chars() {
                        match c {
                            '"' => out.push_str("\\\""),
                            '\\' => out.push_str("\\\\"),
                            '\n' => out.push_str("\\n"),
                            '\r' => out.push_str("\\r"),
                            '\t' => out.push_str("\\t"),
                            other => out.push(other),
                        }
                    }
                }
            }
            StringPart::Expression(expr) => {
                out.push_str("\\(");
                print_expression(out, ctx, expr);
                out.push(')');
            }
        }
    }
    out.push_str(quote);
}

fn print_array(out: &mut String, ctx: &PrintContext, array: &Array) {
    out.push('[');
    if array.values.len() == 1 {
        print_value(out, ctx, &array.values[0]);
    } else if !array.values.is_empty() {
        let nested = ctx.nested();
        for (i, value) in array.values.iter().enumerate() {
            out.push('\n');
            out.push_str(&nested.indent);
            print_value(out, &nested, value);
            if i + 1 < array.values.len() {
                out.push(',');
            }
        }
        out.push('\n');
        out.push_str(&ctx.indent);
    }
    out.push(']');
}

fn print_if(out: &mut String, ctx: &PrintContext, if_field: &If) {
    if let Some(condition) = &if_field.condition {
        out.push_str("if ");
        print_expression(out, ctx, condition);
        out.push(' ');
    }
    print_object_inline(out, ctx, &if_field.object);
    if let Some(else_field) = &if_field.else_field {
        out.push_str(" else ");
        print_if(out, ctx, else_field);
    }
}

fn print_for(out: &mut String, ctx: &PrintContext, for_field: &For) {
    out.push_str("for ");
    if let Some(index_var) = &for_field.index_var {
        out.push_str(index_var);
        out.push_str(", ");
    }
    out.push_str(&for_field.value_var);
    out.push_str(" in ");
    print_expression(out, ctx, &for_field.source);
    out.push(' ');
    print_object_inline(out, ctx, &for_field.object);
    if let Some(condition) = &for_field.condition {
        out.push_str(" if ");
        print_expression(out, ctx, condition);
    }
}

/// Objects inside `if`/`for` headers always print braced.
fn print_object_inline(out: &mut String, ctx: &PrintContext, object: &Object) {
    let inner = PrintContext {
        indent: ctx.indent.clone(),
        top: false,
    };
    print_object(out, &inner, object);
}

fn print_expression(out: &mut String, ctx: &PrintContext, expr: &Expression) {
    print_selector(out, ctx, &expr.selector);
    for op in &expr.operators {
        if is_math_op(op.op) && is_number(&op.selector) {
            let _ = write!(out, "{}", op.op);
        } else {
            let _ = write!(out, " {} ", op.op);
        }
        print_selector(out, ctx, &op.selector);
    }
}

fn is_math_op(op: BinOp) -> bool {
    matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
}

fn is_number(selector: &Selector) -> bool {
    matches!(
        &selector.base,
        SelectorBase::Value(v) if matches!(v.kind, ValueKind::Number(_))
    )
}

fn print_selector(out: &mut String, ctx: &PrintContext, selector: &Selector) {
    if selector.not {
        out.push('!');
    }
    match &selector.base {
        SelectorBase::Identifier(name) => out.push_str(name),
        SelectorBase::Value(value) => print_value(out, ctx, value),
        SelectorBase::Parens(value) => {
            out.push('(');
            print_value(out, ctx, value);
            out.push(')');
        }
    }
    for lookup in &selector.lookups {
        print_lookup(out, ctx, lookup);
    }
}

fn print_lookup(out: &mut String, ctx: &PrintContext, lookup: &Lookup) {
    match &lookup.kind {
        LookupKind::Dot(name) => {
            out.push('.');
            out.push_str(name);
        }
        LookupKind::Index(expr) => {
            out.push('[');
            print_expression(out, ctx, expr);
            out.push(']');
        }
        LookupKind::Slice(start, end) => {
            out.push('[');
            print_expression(out, ctx, start);
            out.push(':');
            print_expression(out, ctx, end);
            out.push(']');
        }
        LookupKind::Call(call) => print_call(out, ctx, call),
    }
}

fn print_call(out: &mut String, ctx: &PrintContext, call: &Call) {
    out.push('(');
    let mut first = true;
    if let Some(positional) = &call.positional {
        for value in &positional.values {
            if !first {
                out.push_str(", ");
            }
            print_value(out, ctx, value);
            first = false;
        }
    }
    if let Some(named) = &call.named {
        for field in &named.fields {
            if !first {
                out.push_str(", ");
            }
            print_field(out, ctx, field);
            first = false;
        }
    }
    out.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn round_trip(input: &str) -> String {
        print(&parse("test.aml", input).unwrap())
    }

    #[test]
    fn test_scalar_fields() {
        assert_eq!(round_trip("a: 1\nb: \"x\"\n"), "a: 1\nb: \"x\"\n");
    }

    #[test]
    fn test_nested_object_indents_with_tabs() {
        let out = round_trip("a: {\n\tb: 1\n\tc: 2\n}\n");
        assert_eq!(out, "a: {\n\tb: 1\n\tc: 2\n}\n");
    }

    #[test]
    fn test_single_field_object_stays_inline() {
        assert_eq!(round_trip("a: { b: 1 }\n"), "a: { b: 1 }\n");
    }

    #[test]
    fn test_expression_spacing() {
        assert_eq!(round_trip("x: a && b\n"), "x: a && b\n");
        // math against a number literal prints tight
        assert_eq!(round_trip("x: a * 2\n"), "x: a*2\n");
    }

    #[test]
    fn test_if_for_and_match_key() {
        let out = round_trip("if x { a: 1 } else { a: 2 }\n");
        assert_eq!(out, "if x { a: 1 } else { a: 2 }\n");
        // computed keys re-print as interpolated string keys
        let out = round_trip("for k, v in m { (k): v }\n");
        assert_eq!(out, "for k, v in m { \"\\(k)\": v }\n");
        let out = round_trip("[~=\"^a\"]: 1\n");
        assert_eq!(out, "[~=\"^a\"]: 1\n");
    }

    #[test]
    fn test_interpolated_string() {
        let out = round_trip("n: \"hi \\(name)!\"\n");
        assert_eq!(out, "n: \"hi \\(name)!\"\n");
    }

    #[test]
    fn test_stable_after_one_pass() {
        let source = "a: 1\nlist: [\n\t1,\n\t2\n]\nobj: { x: \"s\" }\n";
        let once = round_trip(source);
        let twice = print(&parse("test.aml", &once).unwrap());
        assert_eq!(once, twice);
    }
}
