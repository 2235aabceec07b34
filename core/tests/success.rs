//! Integration tests for CTilde programs that are expected to compile
//! cleanly, all the way to assembly text.

use ctilde::{analyze_source, compile_source, Compiler, Options};
use std::fs;

fn compile_clean(src: &str) -> String {
    match compile_source("main.ct", src, Options::default()) {
        Ok(asm) => asm,
        Err(failure) => panic!("expected success, got:\n{}", failure),
    }
}

#[test]
fn test_minimal_function() {
    let asm = compile_clean("int main() { return 0; }");
    assert!(asm.contains("global main"));
    assert!(asm.contains("main:"));
}

#[test]
fn test_inheritance_member_access_compiles() {
    compile_clean(
        "
        struct A { public: int x; };
        struct B : A { };
        int f(B* b) { return b->x; }
        int main() { return 0; }
        ",
    );
}

#[test]
fn test_generic_monomorphization_registers_one_instance() {
    let compiler = analyze_source(
        "main.ct",
        "
        struct List<T> {
        public:
            T value;
        };
        int first(List<int>* a) { return a->value; }
        int second(List<int>* b) { return b->value; }
        int main() { return 0; }
        ",
        Options::default(),
    )
    .expect("expected success");
    let repo = &compiler.services().repo;
    let instance = repo.find_struct("List$int").expect("instance");
    assert_eq!(instance.fqn(), "List$int");
}

#[test]
fn test_warnings_do_not_fail_the_build() {
    let compiler = analyze_source(
        "main.ct",
        "int main() { int unused_slot; return 0; }",
        Options::default(),
    )
    .expect("warnings are not errors");
    let diags = compiler.diagnostics();
    assert_eq!(diags.len(), 1);
    assert!(diags[0].message.contains("Unused variable"));
    compiler.generate().expect("generation succeeds");
}

#[test]
fn test_kitchen_sink_program() {
    let asm = match compile_source(
        "main.ct",
        r#"
        namespace app;

        enum Mode { IDLE, RUNNING = 5 };

        struct Shape {
        public:
            int sides;
            virtual int area() { return 0; }
            virtual ~Shape() { }
        };

        struct Square : Shape {
            int side;
        public:
            Square(int s) { side = s; }
            override int area() { return side * side; }
            int tag { get; set; };
        };

        int describe(Shape* s) { return s->area(); }

        int main() {
            Square* sq = new Square(4);
            sq->tag = app::Mode::RUNNING;
            int total = describe(sq) + sq->tag + sizeof(int);
            delete sq;
            return total;
        }
        "#,
        Options {
            fold_constants: true,
            peephole: true,
        },
    ) {
        Ok(asm) => asm,
        Err(failure) => panic!("expected success, got:\n{}", failure),
    };
    assert!(asm.contains("vt_app__Square"));
    assert!(asm.contains("call malloc"));
    assert!(asm.contains("call free"));
}

#[test]
fn test_constant_folding_collapses_literals() {
    let folded = compile_source(
        "main.ct",
        "int main() { return 2 + 3 * 4; }",
        Options {
            fold_constants: true,
            peephole: false,
        },
    )
    .expect("expected success");
    assert!(folded.contains("mov eax, 14"));
    assert!(!folded.contains("imul"));
}

#[test]
fn test_peephole_applies_to_output() {
    let options = Options {
        fold_constants: false,
        peephole: true,
    };
    let asm = compile_source(
        "main.ct",
        "int main() { return 1 + 2; }",
        options,
    )
    .expect("expected success");
    // Whatever the generator produced, no adjacent push/pop pair of the
    // same register survives the rewriter.
    let lines: Vec<&str> = asm.lines().map(str::trim).collect();
    for pair in lines.windows(2) {
        if let (Some(a), Some(b)) = (
            pair[0].strip_prefix("push "),
            pair[1].strip_prefix("pop "),
        ) {
            assert_ne!(a, b, "redundant pair survived: {:?}", pair);
        }
    }
}

#[test]
fn test_multi_file_pipeline_in_memory() {
    let files = vec![
        (
            "lib.ct".to_string(),
            "namespace geo;\nstruct Point { public: int x; int y; };\n"
                .to_string(),
        ),
        (
            "main.ct".to_string(),
            "using geo;\nint main() { Point p = { 1, 2 }; return p.x; }\n"
                .to_string(),
        ),
    ];
    Compiler::from_sources(files, Options::default())
        .parse()
        .and_then(|c| c.analyze())
        .expect("expected success")
        .generate()
        .expect("expected assembly");
}

#[test]
fn test_include_closure_from_disk() {
    let dir = std::env::temp_dir()
        .join(format!("ctilde_test_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    let lib = dir.join("shapes.ct");
    let entry = dir.join("main.ct");
    fs::write(&lib, "struct Point { public: int x; };\n")
        .expect("write lib");
    fs::write(
        &entry,
        "#include \"shapes.ct\"\nint main() { Point p; return p.x; }\n",
    )
    .expect("write entry");

    let asm = ctilde::compile_file(&entry, Options::default())
        .expect("expected success");
    assert!(asm.contains("main:"));
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_string_literals_and_externs() {
    let asm = compile_clean(
        "
        int puts(char* text);
        int main() {
            puts(\"hello\");
            return 0;
        }
        ",
    );
    assert!(asm.contains("extern puts"));
    assert!(asm.contains("section .data"));
}

#[test]
fn test_property_accessors_compile_to_functions() {
    let asm = compile_clean(
        "
        struct Circle {
            int r;
        public:
            int area {
                get { return r * r; }
            };
        };
        int f(Circle* c) { return c->area; }
        int main() { return 0; }
        ",
    );
    assert!(asm.contains("Circle__get_area:"));
    assert!(asm.contains("call Circle__get_area"));
}
