// End-to-end tests: source text through the decoder to a resolved JSON tree

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn eval(input: &str) -> Result<serde_json::Value, aml::Error> {
    aml::Decoder::new(input.as_bytes())
        .with_filename("test.aml")
        .decode_value()
}

fn eval_ok(input: &str) -> serde_json::Value {
    match eval(input) {
        Ok(v) => v,
        Err(e) => panic!("eval failed for {input:?}: {e}"),
    }
}

fn eval_err(input: &str) -> String {
    match eval(input) {
        Ok(v) => panic!("expected error for {input:?}, got {v}"),
        Err(e) => e.to_string(),
    }
}

// ── Plain JSON subset ────────────────────────────────────────────────────────

#[test]
fn test_scalars() {
    assert_eq!(
        eval_ok("int: 4\nfloat: 4.5\nstr: \"hi\"\nyes: true\nno: false\nnothing: null"),
        json!({"int": 4, "float": 4.5, "str": "hi", "yes": true, "no": false, "nothing": null})
    );
}

#[test]
fn test_nested_structures() {
    assert_eq!(
        eval_ok("a: { b: [1, 2, { c: \"d\" }] }"),
        json!({"a": {"b": [1, 2, {"c": "d"}]}})
    );
}

#[test]
fn test_number_suffixes_and_separators() {
    assert_eq!(
        eval_ok("k: 1k\nki: 1ki\nmi: 2mi\nbig: 1_000_000\nfrac: 1.5k"),
        json!({"k": 1000, "ki": 1024, "mi": 2_097_152, "big": 1_000_000, "frac": 1500.0})
    );
}

// ── Expressions ──────────────────────────────────────────────────────────────

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval_ok("x: 1 + 2 * 3"), json!({"x": 7}));
    assert_eq!(eval_ok("x: (1 + 2) * 3"), json!({"x": 9}));
    assert_eq!(eval_ok("x: 7 / 2"), json!({"x": 3}));
    assert_eq!(eval_ok("x: 7.0 / 2"), json!({"x": 3.5}));
    assert_eq!(eval_ok("x: -2 + 5"), json!({"x": 3}));
}

#[test]
fn test_division_by_zero_is_an_error() {
    assert!(eval_err("x: 1 / 0").contains("division by zero"));
    assert!(eval_err("x: 1.0 / 0.0").contains("division by zero"));
}

#[test]
fn test_comparisons_and_logic() {
    assert_eq!(
        eval_ok("a: 1 < 2\nb: 2 <= 1\nc: 1 == 1.0\nd: \"x\" != \"y\"\ne: true && false\nf: true || false\ng: !false"),
        json!({"a": true, "b": false, "c": true, "d": true, "e": false, "f": true, "g": true})
    );
}

#[test]
fn test_null_equality_compares_types_only() {
    assert_eq!(
        eval_ok("a: null == null\nb: null == 1\nc: null != 1"),
        json!({"a": true, "b": false, "c": true})
    );
}

#[test]
fn test_type_mismatch_error_message() {
    assert!(eval_err("x: 1 + \"s\"")
        .contains("operator + is not compatible with types number and string"));
}

#[test]
fn test_string_concat_and_regex_operators() {
    assert_eq!(
        eval_ok("s: \"a\" + \"b\"\nm: \"abc42\" =~ \"^abc[0-9]+$\"\nn: \"abc\" !~ \"^z\""),
        json!({"s": "ab", "m": true, "n": true})
    );
}

#[test]
fn test_array_concat_index_slice() {
    assert_eq!(
        eval_ok("arr: [1, 2] + [3]\ni: arr[2]\ns: arr[0:2]"),
        json!({"arr": [1, 2, 3], "i": 3, "s": [1, 2]})
    );
    assert!(eval_err("a: [1][5]").contains("index out of bound"));
}

#[test]
fn test_object_index_and_dot_lookup() {
    assert_eq!(
        eval_ok("o: { a: 1 }\nbyname: o.a\nbyindex: o[\"a\"]"),
        json!({"o": {"a": 1}, "byname": 1, "byindex": 1})
    );
    assert!(eval_err("o: { a: 1 }\nx: o.missing").contains("key not found"));
}

#[test]
fn test_field_references_and_nesting() {
    assert_eq!(
        eval_ok("a: 1\nb: a + 1\nc: { d: b * 2 }"),
        json!({"a": 1, "b": 2, "c": {"d": 4}})
    );
}

// ── Strings ──────────────────────────────────────────────────────────────────

#[test]
fn test_interpolation() {
    assert_eq!(
        eval_ok("name: \"x\"\ncount: 3\nmsg: \"got \\(count) of \\(name)\""),
        json!({"name": "x", "count": 3, "msg": "got 3 of x"})
    );
}

#[test]
fn test_multiline_indent_trimming() {
    assert_eq!(
        eval_ok("text: \"\"\"\n\thello\n\tworld\n\t\"\"\""),
        json!({"text": "hello\nworld\n"})
    );
}

// ── Merge ────────────────────────────────────────────────────────────────────

#[test]
fn test_merge_with_override() {
    assert_eq!(
        eval_ok("a: { x: 1, y: { p: 1, q: 2 } } & { y: { q: 99, r: 3 } }"),
        json!({"a": {"x": 1, "y": {"p": 1, "q": 99, "r": 3}}})
    );
}

#[test]
fn test_merge_null_identity() {
    assert_eq!(
        eval_ok("a: null & 5\nb: 5 & null\nc: null & { x: 1 }"),
        json!({"a": 5, "b": 5, "c": {"x": 1}})
    );
}

#[test]
fn test_merge_associativity() {
    let left = eval_ok("r: ({ a: 1 } & { b: 2 }) & { a: 9, c: 3 }");
    let right = eval_ok("r: { a: 1 } & ({ b: 2 } & { a: 9, c: 3 })");
    assert_eq!(left, right);
    assert_eq!(left, json!({"r": {"a": 9, "b": 2, "c": 3}}));
}

#[test]
fn test_merge_preserves_left_key_order() {
    let v = eval_ok("r: { b: 1, a: 2 } & { c: 3, a: 9 }");
    assert_eq!(
        serde_json::to_string(&v).unwrap(),
        r#"{"r":{"b":1,"a":9,"c":3}}"#
    );
}

#[test]
fn test_merge_incompatible_types() {
    assert!(eval_err("x: 1 & \"s\"").contains("can not merge incompatible types"));
}

#[test]
fn test_abstract_type_placeholders() {
    assert_eq!(
        eval_ok("port: number & 8080\nname: string & \"svc\""),
        json!({"port": 8080, "name": "svc"})
    );
    assert!(eval_err("port: number").contains("abstract value 'number'"));
    assert!(eval_err("port: number & \"x\"").contains("incompatible types"));
}

// ── Conditional and iterated fields ──────────────────────────────────────────

#[test]
fn test_if_else_chain() {
    let program = "v: 2\nif v > 10 { size: \"big\" } else if v > 1 { size: \"medium\" } else { size: \"small\" }";
    assert_eq!(eval_ok(program), json!({"v": 2, "size": "medium"}));

    let program = "v: 0\nif v > 10 { size: \"big\" } else if v > 1 { size: \"medium\" } else { size: \"small\" }";
    assert_eq!(eval_ok(program), json!({"v": 0, "size": "small"}));
}

#[test]
fn test_if_condition_must_be_boolean() {
    assert!(eval_err("if 1 { a: 2 }").contains("expecting boolean"));
}

#[test]
fn test_for_field_over_object() {
    assert_eq!(
        eval_ok("m: { a: 1, b: 2 }\nout: { for k, v in m { (k): v * 10 } }"),
        json!({"m": {"a": 1, "b": 2}, "out": {"a": 10, "b": 20}})
    );
}

#[test]
fn test_comprehension_with_filter() {
    assert_eq!(
        eval_ok("xs: [for i, x in [\"a\", \"b\", \"c\"] { key: x, idx: i } if i > 0]"),
        json!({"xs": [{"key": "b", "idx": 1}, {"key": "c", "idx": 2}]})
    );
}

#[test]
fn test_comprehension_over_object_with_computed_keys() {
    // each entry becomes its own single-key object
    assert_eq!(
        eval_ok("m: { a: 1, b: 2 }\npairs: [for k, v in m { (k): v * 10 }]"),
        json!({"m": {"a": 1, "b": 2}, "pairs": [{"a": 10}, {"b": 20}]})
    );
}

#[test]
fn test_comprehension_last_binding() {
    assert_eq!(
        eval_ok("xs: [for x in [1, 2] { prev: len(last) }]"),
        json!({"xs": [{"prev": 0}, {"prev": 1}]})
    );
}

#[test]
fn test_comprehension_source_must_iterate() {
    assert!(eval_err("xs: [for x in 5 { v: x }]")
        .contains("must evaluate to an array or object"));
}

// ── let, embedded fields, match keys ─────────────────────────────────────────

#[test]
fn test_let_binds_without_exporting() {
    assert_eq!(eval_ok("let x: 5\ny: x + 1"), json!({"y": 6}));
}

#[test]
fn test_embedded_object() {
    assert_eq!(
        eval_ok("base: { a: 1 }\ncopy: { base }"),
        json!({"base": {"a": 1}, "copy": {"a": 1}})
    );
}

#[test]
fn test_embedded_objects_merge() {
    assert_eq!(
        eval_ok("x: { p: 1 }\ny: { q: 2 }\nm: { x, y }"),
        json!({"x": {"p": 1}, "y": {"q": 2}, "m": {"p": 1, "q": 2}})
    );
}

#[test]
fn test_embedded_mixed_with_fields_is_rejected() {
    assert!(eval_err("base: { a: 1 }\nbad: { base, b: 2 }")
        .contains("can not mix embedded objects with fields"));
}

#[test]
fn test_regex_field_and_interpolation() {
    // match keys resolve lookups but are never enumerated
    let program = "obj: { [~=\"^k[0-9]+$\"]: \"hit\", name: \"x\" }, v: obj.k42, n: \"hello, \\(obj.name)\"";
    assert_eq!(
        eval_ok(program),
        json!({"obj": {"name": "x"}, "v": "hit", "n": "hello, x"})
    );
}

#[test]
fn test_interpolated_keys() {
    assert_eq!(
        eval_ok("suffix: \"b\"\nobj: { \"a-\\(suffix)\": 1 }\nv: obj[\"a-b\"]"),
        json!({"suffix": "b", "obj": {"a-b": 1}, "v": 1})
    );
}

// ── Functions ────────────────────────────────────────────────────────────────

#[test]
fn test_function_call_with_named_args() {
    // positional arguments zip against declared keys; named override by name
    assert_eq!(
        eval_ok("f: { args: { a: 0, b: 0 }, _return: args.a + args.b }\nout: f(2, b: 40)"),
        json!({
            "f": {"args": {"a": 0, "b": 0}, "_return": 0},
            "out": 42
        })
    );
}

#[test]
fn test_function_defaults_apply() {
    assert_eq!(
        eval_ok("f: { args: { a: 1, b: 10 }, _return: args.a + args.b }\nout: f(5)"),
        json!({
            "f": {"args": {"a": 1, "b": 10}, "_return": 11},
            "out": 15
        })
    );
}

#[test]
fn test_function_returning_object() {
    assert_eq!(
        eval_ok("f: { args: { n: 0 }, _return: { double: args.n * 2 } }\nout: f(21).double"),
        json!({
            "f": {"args": {"n": 0}, "_return": {"double": 0}},
            "out": 42
        })
    );
}

#[test]
fn test_function_arity_error() {
    assert!(eval_err("f: { args: { a: 0 }, _return: args.a }\nbad: f(1, 2)")
        .contains("function accepts 1 args and received 2"));
}

#[test]
fn test_calling_a_non_function() {
    assert!(eval_err("o: { a: 1 }\nbad: o(1)").contains("missing return key"));
}

// ── Cycles and budget ────────────────────────────────────────────────────────

#[test]
fn test_cycle_detection_two_keys() {
    // mutually referential static keys must fail, not recurse
    assert!(eval_err("x: y\ny: x").contains("cycle detected"));
}

#[test]
fn test_cycle_detection_self_reference() {
    assert!(eval_err("x: x").contains("cycle detected"));
}

#[test]
fn test_errors_carry_positions() {
    let msg = eval_err("x: y\ny: x");
    assert!(msg.contains("[test.aml]:"), "missing position in: {msg}");
}

#[test]
fn test_execution_limit() {
    let err = aml::Decoder::new("xs: std.range(1000)".as_bytes())
        .with_ticks(50)
        .decode_value()
        .unwrap_err();
    assert!(err.to_string().contains("exceeded execution limit"));
}

#[test]
fn test_cancellation() {
    let flag = Arc::new(AtomicBool::new(true));
    let err = aml::Decoder::new("a: 1".as_bytes())
        .with_cancel(flag.clone())
        .decode_value()
        .unwrap_err();
    assert!(err.to_string().contains("cancelled"));
    flag.store(false, Ordering::Relaxed);
}

#[test]
fn test_evaluation_is_deterministic() {
    let program = "m: { a: 1, b: 2 }\npairs: [for k, v in m { (k): v }]\ns: std.sha256sum(\"x\")";
    assert_eq!(eval_ok(program), eval_ok(program));
}

// ── Standard library ─────────────────────────────────────────────────────────

#[test]
fn test_std_string_functions() {
    assert_eq!(
        eval_ok(concat!(
            "u: std.toUpper(\"abc\")\n",
            "l: std.toLower(\"ABC\")\n",
            "t: std.trim(\"  x  \")\n",
            "p: std.trimPrefix(\"pre-x\", \"pre-\")\n",
            "s: std.startsWith(\"abc\", \"ab\")\n",
            "title: std.toTitle(\"hello world\")"
        )),
        json!({"u": "ABC", "l": "abc", "t": "x", "p": "x", "s": true, "title": "Hello World"})
    );
}

#[test]
fn test_std_split_join_round_trip() {
    assert_eq!(
        eval_ok("parts: std.split(\"a-b-c\", \"-\")\nwhole: std.join(parts, \"-\")"),
        json!({"parts": ["a", "b", "c"], "whole": "a-b-c"})
    );
}

#[test]
fn test_std_encoding_round_trips() {
    assert_eq!(
        eval_ok(concat!(
            "b: std.base64(\"hello\")\n",
            "d: std.base64decode(b)\n",
            "h: std.toHex(\"ab\")\n",
            "u: std.fromHex(h)"
        )),
        json!({"b": "aGVsbG8=", "d": "hello", "h": "6162", "u": "ab"})
    );
}

#[test]
fn test_std_hashes() {
    assert_eq!(
        eval_ok("s: std.sha256sum(\"\")"),
        json!({"s": "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"})
    );
}

#[test]
fn test_std_json_round_trip() {
    assert_eq!(
        eval_ok("v: std.fromJSON(std.toJSON({ a: 1, b: [true] }))"),
        json!({"v": {"a": 1, "b": [true]}})
    );
}

#[test]
fn test_std_yaml_round_trip() {
    assert_eq!(
        eval_ok("v: std.fromYAML(std.toYAML({ a: 1 })).a"),
        json!({"v": 1})
    );
}

#[test]
fn test_std_paths() {
    assert_eq!(
        eval_ok(concat!(
            "b: std.basename(\"/a/b/c.txt\")\n",
            "d: std.dirname(\"/a/b/c.txt\")\n",
            "e: std.fileExt(\"/a/b/c.txt\")\n",
            "j: std.pathJoin([\"a\", \"b\", \"c\"])"
        )),
        json!({"b": "c.txt", "d": "/a/b", "e": ".txt", "j": "a/b/c"})
    );
}

#[test]
fn test_std_host_port() {
    assert_eq!(
        eval_ok("hp: std.splitHostPort(\"example.com:80\")\nj: std.joinHostPort(\"::1\", 8080)"),
        json!({"hp": ["example.com", "80"], "j": "[::1]:8080"})
    );
}

#[test]
fn test_std_range_and_atoi() {
    assert_eq!(
        eval_ok("r: std.range(3)\nr2: std.range(1, 7, 2)\nn: std.atoi(\"42\")"),
        json!({"r": [0, 1, 2], "r2": [1, 3, 5], "n": 42})
    );
}

#[test]
fn test_std_type_predicates() {
    assert_eq!(
        eval_ok("a: std.isString(\"x\")\nb: std.isNumber(1)\nc: std.isArray([1])\nd: std.isObject({ x: 1 })\ne: std.isBool(1)"),
        json!({"a": true, "b": true, "c": true, "d": true, "e": false})
    );
}

#[test]
fn test_std_sort_and_contains() {
    assert_eq!(
        eval_ok("s: std.sort([3, 1, 2])\nc: std.contains([1, 2], 2)\nn: std.contains([1, 2], 9)"),
        json!({"s": [1, 2, 3], "c": true, "n": false})
    );
}

#[test]
fn test_std_sort_with_comparator() {
    assert_eq!(
        eval_ok(concat!(
            "desc: { args: { a: 0, b: 0 }, _return: args.a > args.b }\n",
            "s: std._sort([1, 3, 2], desc)"
        )),
        json!({
            "desc": {"args": {"a": 0, "b": 0}, "_return": false},
            "s": [3, 2, 1]
        })
    );
}

#[test]
fn test_std_error_builtin() {
    assert!(eval_err("x: std.error(\"boom\")").contains("boom"));
}

#[test]
fn test_std_index_of() {
    assert_eq!(
        eval_ok("a: std.indexOf(\"abcd\", \"cd\")\nb: std.indexOf([10, 20], 20)\nc: std.indexOf([10], 99)"),
        json!({"a": 2, "b": 1, "c": -1})
    );
}

#[test]
fn test_len_builtin() {
    assert_eq!(
        eval_ok("a: len(\"abc\")\nb: len([1, 2])\nc: len({ x: 1 })"),
        json!({"a": 3, "b": 2, "c": 1})
    );
}
