//! Core implementation of the CTilde language: a compiler front-end that
//! takes C-with-classes style source (namespaces, structs with single
//! inheritance, virtual methods, properties, generics, enums) through
//! lexing, parsing, semantic analysis and 32-bit x86 code generation.
//!
//! ```
//! use ctilde::{compile_source, Options};
//!
//! let source = "
//! int main() {
//!     return 0;
//! }
//! ";
//!
//! let asm = compile_source("main.ct", source, Options::default()).unwrap();
//! assert!(asm.contains("main:"));
//! ```
//!
//! Compilation runs in four strictly sequential stages (parse, analyze,
//! optimize, generate); between stages the pipeline short-circuits if any
//! error-severity diagnostic has been recorded. The stages are modeled on
//! the [Compiler] typestate struct, so a later stage cannot be invoked
//! before an earlier one has succeeded.

#![deny(clippy::all, unused_must_use, unused_imports)]

pub mod analyze;
pub mod ast;
pub mod codegen;
mod consts;
pub mod error;
pub mod fold;
pub mod functions;
pub mod layout;
pub mod lexer;
mod monomorph;
pub mod parse;
pub mod peephole;
pub mod preprocess;
pub mod repository;
pub mod resolve;
pub mod token;
pub mod ty;
pub mod vtable;

pub use error::{
    CompileFailure, Diagnostic, Diagnostics, ResolveError, Severity,
};
pub use ty::Ty;

use crate::analyze::Analyzer;
use crate::ast::{IdGen, Program};
use crate::functions::FunctionResolver;
use crate::layout::MemoryLayoutManager;
use crate::repository::TypeRepository;
use crate::resolve::Resolver;
use crate::vtable::VTableManager;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

/// Compilation options, populated from CLI flags.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Run the AST constant-folding pass after analysis.
    pub fold_constants: bool,
    /// Run the peephole rewriter over the generated assembly.
    pub peephole: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            fold_constants: false,
            peephole: true,
        }
    }
}

/// Everything the analysis stage constructs, handed to code generation.
pub struct Services {
    pub repo: Rc<TypeRepository>,
    pub resolver: Rc<Resolver>,
    pub functions: Rc<FunctionResolver>,
    pub layout: MemoryLayoutManager,
    pub vtables: VTableManager,
    pub analyzer: Analyzer,
}

/// Stage value: sources gathered, nothing parsed yet.
pub struct SourceSet {
    files: Vec<(String, String)>,
}

/// Stage value: every unit parsed and merged into a program.
pub struct Parsed {
    program: Program,
}

/// Stage value: analysis done, services available.
pub struct Analyzed {
    program: Program,
    services: Services,
}

struct Context {
    options: Options,
    diags: Rc<Diagnostics>,
    ids: Rc<IdGen>,
    sources: HashMap<String, String>,
}

impl Context {
    /// The between-stages gate: errors so far abort the pipeline with a
    /// renderable failure.
    fn gate(&self) -> Result<(), CompileFailure> {
        if self.diags.has_errors() {
            Err(self.failure())
        } else {
            Ok(())
        }
    }

    fn failure(&self) -> CompileFailure {
        CompileFailure::new(self.diags.sorted(), self.sources.clone())
    }
}

/// The compiler pipeline. `T` is the current stage value, which controls
/// which operations are available; each stage consumes the previous
/// compiler and returns the next one.
pub struct Compiler<T> {
    stage: T,
    ctx: Context,
}

impl Compiler<SourceSet> {
    /// Starts a pipeline from an entry file on disk; the preprocessor
    /// gathers the `#include` closure, dependencies first.
    pub fn from_entry(entry: &Path, options: Options) -> Self {
        let diags = Rc::new(Diagnostics::new());
        let mut read = |p: &Path| std::fs::read_to_string(p);
        let files = preprocess::gather_sources(entry, &mut read, &diags);
        let files: Vec<(String, String)> = files
            .into_iter()
            .map(|(path, text)| (path.display().to_string(), text))
            .collect();
        Self::build(files, options, diags)
    }

    /// Starts a pipeline from in-memory source, bypassing the filesystem.
    pub fn from_source(
        name: &str,
        source: &str,
        options: Options,
    ) -> Self {
        Self::from_sources(
            vec![(name.to_string(), source.to_string())],
            options,
        )
    }

    /// Starts a pipeline from several in-memory files, already in
    /// dependency order.
    pub fn from_sources(
        files: Vec<(String, String)>,
        options: Options,
    ) -> Self {
        Self::build(files, options, Rc::new(Diagnostics::new()))
    }

    fn build(
        files: Vec<(String, String)>,
        options: Options,
        diags: Rc<Diagnostics>,
    ) -> Self {
        let sources = files.iter().cloned().collect();
        Compiler {
            stage: SourceSet { files },
            ctx: Context {
                options,
                diags,
                ids: Rc::new(IdGen::new()),
                sources,
            },
        }
    }

    /// Stage 1: tokenize and parse every file, merge imports
    /// (union by library name), and link parent back-references.
    pub fn parse(self) -> Result<Compiler<Parsed>, CompileFailure> {
        let mut program = Program::default();
        for (path, source) in &self.stage.files {
            let tokens = lexer::tokenize(source);
            let unit = Rc::new(parse::parse_unit(
                path,
                &tokens,
                &self.ctx.diags,
                &self.ctx.ids,
            ));
            for import in &unit.imports {
                if !program.imports.contains(import) {
                    program.imports.push(import.clone());
                }
            }
            program.units.push(unit);
        }
        debug!("parsed {} unit(s)", program.units.len());
        self.ctx.gate()?;
        Ok(Compiler {
            stage: Parsed { program },
            ctx: self.ctx,
        })
    }
}

impl Compiler<Parsed> {
    /// Stage 2: register types, construct the analysis services and walk
    /// every function body.
    pub fn analyze(self) -> Result<Compiler<Analyzed>, CompileFailure> {
        let program = self.stage.program;
        let repo = Rc::new(TypeRepository::new());
        for unit in &program.units {
            repo.register_unit(unit, &self.ctx.diags);
        }
        let resolver = Rc::new(Resolver::new(
            Rc::clone(&repo),
            Rc::clone(&self.ctx.ids),
        ));
        let functions = Rc::new(FunctionResolver::new(
            Rc::clone(&repo),
            Rc::clone(&resolver),
            &program,
        ));
        let layout = MemoryLayoutManager::new(
            Rc::clone(&repo),
            Rc::clone(&resolver),
        );
        let vtables = VTableManager::new(Rc::clone(&resolver));
        let mut analyzer = Analyzer::new(
            Rc::clone(&repo),
            Rc::clone(&resolver),
            Rc::clone(&functions),
            Rc::clone(&self.ctx.diags),
        );
        analyzer.analyze_program(&program);
        self.ctx.gate()?;
        Ok(Compiler {
            stage: Analyzed {
                program,
                services: Services {
                    repo,
                    resolver,
                    functions,
                    layout,
                    vtables,
                    analyzer,
                },
            },
            ctx: self.ctx,
        })
    }
}

impl Compiler<Analyzed> {
    /// Stage 3 (optional): AST constant folding, controlled by
    /// [Options::fold_constants].
    pub fn fold(self) -> Self {
        if self.ctx.options.fold_constants {
            fold::fold_program(
                &self.stage.program,
                &self.stage.services.repo,
                &self.ctx.ids,
            );
        }
        self
    }

    /// Stage 4: hand the analyzed program to the code generator, then run
    /// the peephole rewriter over the result.
    pub fn generate(self) -> Result<String, CompileFailure> {
        self.ctx.gate()?;
        // The reporting stages are over; seal the list so a late
        // resolution inside codegen cannot append unobservable entries.
        let _sealed = self.ctx.diags.silence();
        let services = &self.stage.services;
        let asm = codegen::generate(
            &self.stage.program,
            Rc::clone(&services.repo),
            Rc::clone(&services.resolver),
            &services.analyzer,
            &services.layout,
            &services.vtables,
        );
        if self.ctx.options.peephole {
            Ok(peephole::optimize(&asm))
        } else {
            Ok(asm)
        }
    }

    pub fn program(&self) -> &Program {
        &self.stage.program
    }

    pub fn services(&self) -> &Services {
        &self.stage.services
    }

    /// All diagnostics recorded so far (warnings included), in display
    /// order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.ctx.diags.sorted()
    }
}

/// Compiles one in-memory source file all the way to assembly text.
pub fn compile_source(
    name: &str,
    source: &str,
    options: Options,
) -> Result<String, CompileFailure> {
    Compiler::from_source(name, source, options)
        .parse()?
        .analyze()?
        .fold()
        .generate()
}

/// Parses and analyzes one in-memory source file, returning the analyzed
/// compiler for inspection. Used by tests and tools that stop before code
/// generation.
pub fn analyze_source(
    name: &str,
    source: &str,
    options: Options,
) -> Result<Compiler<Analyzed>, CompileFailure> {
    Compiler::from_source(name, source, options)
        .parse()?
        .analyze()
}

/// Compiles an entry file (and its include closure) from disk.
pub fn compile_file(
    entry: &Path,
    options: Options,
) -> Result<String, CompileFailure> {
    Compiler::from_entry(entry, options)
        .parse()?
        .analyze()?
        .fold()
        .generate()
}
