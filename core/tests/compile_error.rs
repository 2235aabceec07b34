//! Integration tests for CTilde programs that are expected to fail to
//! compile. Each test asserts the exact diagnostic set, in display order.

use ctilde::{analyze_source, Compiler, Options};

/// Analyzes the source expecting diagnostics, and compares their compact
/// renderings against the expected list.
fn expect_compile_errors(src: &str, expected: &[&str]) {
    let failure = analyze_source("main.ct", src, Options::default())
        .err()
        .expect("program compiled but errors were expected");
    let actual: Vec<String> = failure
        .diagnostics()
        .iter()
        .map(|d| d.to_string())
        .collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_missing_semicolon_is_reported_and_recovered() {
    expect_compile_errors(
        "int first() { return 1 }\nint second() { return 2; }\n",
        &["Error: main.ct(1,24): Expected ';' but found '}'"],
    );
}

#[test]
fn test_private_member_access() {
    expect_compile_errors(
        "struct A { int x; };\n\
         struct B : A { };\n\
         int f(B* b) { return b->x; }\n",
        &["Error: main.ct(3,25): Member 'x' of struct 'A' is private"],
    );
}

#[test]
fn test_deref_of_non_pointer() {
    expect_compile_errors(
        "int main() {\n    int x;\n    *x;\n    return 0;\n}\n",
        &["Error: main.ct(3,5): Cannot dereference non-pointer type 'int'"],
    );
}

#[test]
fn test_unknown_type_and_resulting_unused_variable() {
    expect_compile_errors(
        "int main() { Foo x; return 0; }\n",
        &[
            "Error: main.ct(1,14): Unknown type 'Foo'",
            "Warning: main.ct(1,18): Unused variable 'x'",
        ],
    );
}

#[test]
fn test_multiple_errors_in_display_order() {
    expect_compile_errors(
        "int main() {\n\
         \x20   int x;\n\
         \x20   *x;\n\
         \x20   delete x;\n\
         \x20   return 0;\n\
         }\n",
        &[
            "Error: main.ct(3,5): Cannot dereference non-pointer type 'int'",
            "Error: main.ct(4,5): Cannot delete non-pointer type 'int'",
        ],
    );
}

#[test]
fn test_ambiguous_type_across_namespaces() {
    let files = vec![
        (
            "a.ct".to_string(),
            "namespace a;\nstruct T { public: int v; };\n".to_string(),
        ),
        (
            "b.ct".to_string(),
            "namespace b;\nstruct T { public: int v; };\n".to_string(),
        ),
        (
            "main.ct".to_string(),
            "using a;\nusing b;\nint main() { T t; return 0; }\n"
                .to_string(),
        ),
    ];
    let failure = Compiler::from_sources(files, Options::default())
        .parse()
        .and_then(|c| c.analyze())
        .err()
        .expect("ambiguity should be reported");
    let actual: Vec<String> = failure
        .diagnostics()
        .iter()
        .map(|d| d.to_string())
        .collect();
    assert_eq!(
        actual,
        vec![
            "Error: main.ct(3,14): Ambiguous type 'T' (could be a::T or b::T)",
            "Warning: main.ct(3,16): Unused variable 't'",
        ]
    );
}

#[test]
fn test_undefined_variable_does_not_cascade() {
    expect_compile_errors(
        "int main() { return missing + 1; }\n",
        &["Error: main.ct(1,21): Undefined variable 'missing'"],
    );
}

#[test]
fn test_rendered_form_points_into_source() {
    let failure = analyze_source(
        "main.ct",
        "int main() {\n    return missing;\n}\n",
        Options::default(),
    )
    .err()
    .expect("expected failure");
    let rendered = format!("{}", failure);
    assert_eq!(
        rendered,
        "Error: Undefined variable 'missing'\n\
         \x20 --> main.ct:2:12\n\
         \x20 |\n\
         2 |     return missing;\n\
         \x20 |            ^"
    );
}

#[test]
fn test_wrong_argument_count() {
    expect_compile_errors(
        "int add(int a, int b) { return a + b; }\n\
         int main() { return add(1); }\n",
        &["Error: main.ct(2,21): Function 'add' expects 2 argument(s), got 1"],
    );
}

#[test]
fn test_type_mismatch_in_declaration() {
    expect_compile_errors(
        "struct P { public: int x; };\n\
         int main() { P* p; int n = p; return n; }\n",
        &["Error: main.ct(2,28): Type mismatch: expected 'int', found 'P*'"],
    );
}
