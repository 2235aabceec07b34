#![deny(clippy::all)]

use anyhow::Context;
use ctilde::{CompileFailure, Compiler, Options};
use std::path::{Path, PathBuf};
use std::{fs, process};
use structopt::StructOpt;

/// The sub-command to execute.
#[derive(Debug, StructOpt)]
enum Command {
    /// Compile source code to x86 assembly.
    #[structopt(name = "compile")]
    Compile {
        /// Path to the entry source file; its #include closure is
        /// compiled with it.
        #[structopt(parse(from_os_str), long = "source", short = "s")]
        source_path: PathBuf,
        /// Where to write the assembly. Defaults to the source path with
        /// an .asm extension.
        #[structopt(parse(from_os_str), long = "out", short = "o")]
        out_path: Option<PathBuf>,
        /// Enable the AST constant-folding pass.
        #[structopt(long = "fold")]
        fold: bool,
        /// Disable the peephole rewriter.
        #[structopt(long = "no-peephole")]
        no_peephole: bool,
        /// Print diagnostics as JSON on stdout instead of rendering them.
        #[structopt(long = "json")]
        json: bool,
    },

    /// Compile and assemble into an object file (requires nasm).
    #[structopt(name = "build")]
    Build {
        /// Path to the entry source file
        #[structopt(parse(from_os_str), long = "source", short = "s")]
        source_path: PathBuf,
        /// Where to write the object file. Defaults to the source path
        /// with an .o extension.
        #[structopt(parse(from_os_str), long = "out", short = "o")]
        out_path: Option<PathBuf>,
        /// Enable the AST constant-folding pass.
        #[structopt(long = "fold")]
        fold: bool,
        /// Disable the peephole rewriter.
        #[structopt(long = "no-peephole")]
        no_peephole: bool,
    },
}

/// CTilde executable, for compiling CTilde programs to 32-bit x86.
#[derive(Debug, StructOpt)]
#[structopt(name = "ctilde")]
struct Opt {
    #[structopt(subcommand)]
    cmd: Command,
}

fn report(failure: &CompileFailure, json: bool) {
    if json {
        match serde_json::to_string_pretty(failure.diagnostics()) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => eprintln!("Failed to encode diagnostics: {}", err),
        }
    } else {
        eprintln!("{}", failure);
    }
}

/// Runs the pipeline and writes the assembly file. A diagnostic failure is
/// reported and mapped to a nonzero exit code.
fn compile(
    source_path: &Path,
    options: Options,
    json: bool,
) -> anyhow::Result<Result<String, i32>> {
    let staged = Compiler::from_entry(source_path, options)
        .parse()
        .and_then(|c| c.analyze());
    let compiler = match staged {
        Ok(compiler) => compiler.fold(),
        Err(failure) => {
            report(&failure, json);
            return Ok(Err(1));
        }
    };
    // Warnings survive a successful compile; show them compactly.
    for diagnostic in compiler.diagnostics() {
        eprintln!("{}", diagnostic);
    }
    match compiler.generate() {
        Ok(asm) => Ok(Ok(asm)),
        Err(failure) => {
            report(&failure, json);
            Ok(Err(1))
        }
    }
}

/// Invokes the external assembler on an emitted file.
fn assemble(asm_path: &Path, obj_path: &Path) -> anyhow::Result<()> {
    let status = process::Command::new("nasm")
        .arg("-f")
        .arg("elf32")
        .arg(asm_path)
        .arg("-o")
        .arg(obj_path)
        .status()
        .with_context(|| "Failed to launch nasm; is it installed?")?;
    if !status.success() {
        anyhow::bail!("nasm exited with status {}", status);
    }
    Ok(())
}

fn run(opt: Opt) -> anyhow::Result<i32> {
    match opt.cmd {
        Command::Compile {
            source_path,
            out_path,
            fold,
            no_peephole,
            json,
        } => {
            let options = Options {
                fold_constants: fold,
                peephole: !no_peephole,
            };
            let asm = match compile(&source_path, options, json)? {
                Ok(asm) => asm,
                Err(code) => return Ok(code),
            };
            let out_path = out_path
                .unwrap_or_else(|| source_path.with_extension("asm"));
            fs::write(&out_path, asm).with_context(|| {
                format!("Failed to write {:?}", out_path)
            })?;
            Ok(0)
        }

        Command::Build {
            source_path,
            out_path,
            fold,
            no_peephole,
        } => {
            let options = Options {
                fold_constants: fold,
                peephole: !no_peephole,
            };
            let asm = match compile(&source_path, options, false)? {
                Ok(asm) => asm,
                Err(code) => return Ok(code),
            };
            let asm_path = source_path.with_extension("asm");
            fs::write(&asm_path, asm).with_context(|| {
                format!("Failed to write {:?}", asm_path)
            })?;
            let obj_path =
                out_path.unwrap_or_else(|| source_path.with_extension("o"));
            assemble(&asm_path, &obj_path)?;
            Ok(0)
        }
    }
}

fn main() {
    env_logger::init();
    let exit_code = match run(Opt::from_args()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    };
    process::exit(exit_code);
}
