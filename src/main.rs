// tantrums - Batch-mode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The `tantrums` command-line driver.
//!
//! `run` compiles a `.42AHH` source to a `.42ass` bytecode file next to it
//! and executes the result; `compile` stops after writing the file; `exec`
//! rehydrates an existing bytecode file and executes it. Directives in the
//! source (`#mode`, `#autoFree`, `#allowMemoryLeaks`) are stripped here,
//! with line positions preserved, before the lexer ever sees the text.
//!
//! Exit codes: 0 success, 65 compile error, 70 runtime error, 1 I/O or
//! usage error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser as ClapParser, Subcommand};

use tantrums_core::object::Function;
use tantrums_parser::{Lexer, Parser};
use tantrums_vm::compiler::{compile, CompileMode, CompileOptions};
use tantrums_vm::vm::InterpretResult;
use tantrums_vm::{bytecode, Vm};

const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_USAGE: u8 = 1;

#[derive(ClapParser)]
#[command(name = "tantrums", version, about = "The Tantrums language toolchain")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source file to bytecode and run it.
    Run {
        /// The .42AHH source file.
        source: PathBuf,
        /// Suppress the auto-free diagnostic stream.
        #[arg(long)]
        no_autofree_notes: bool,
    },
    /// Compile a source file to bytecode only.
    Compile {
        /// The .42AHH source file.
        source: PathBuf,
        /// Suppress the auto-free diagnostic stream.
        #[arg(long)]
        no_autofree_notes: bool,
    },
    /// Run an existing bytecode file.
    Exec {
        /// The .42ass bytecode file.
        bytecode: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            source,
            no_autofree_notes,
        } => cmd_run(&source, no_autofree_notes, true),
        Command::Compile {
            source,
            no_autofree_notes,
        } => cmd_run(&source, no_autofree_notes, false),
        Command::Exec { bytecode } => cmd_exec(&bytecode),
    }
}

/// Settings gathered from source directives.
struct Directives {
    mode: CompileMode,
    autofree: bool,
    allow_leaks: bool,
}

/// Strip `#mode`, `#autoFree` and `#allowMemoryLeaks` lines, blanking them
/// in place so line numbers in diagnostics stay accurate.
fn strip_directives(source: &str) -> (String, Directives) {
    let mut directives = Directives {
        mode: CompileMode::Both,
        autofree: true,
        allow_leaks: false,
    };
    let mut out = String::with_capacity(source.len());

    for line in source.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let mut strip = false;
        if let Some(rest) = trimmed.strip_prefix("#mode") {
            strip = true;
            match rest.trim() {
                "static" => {
                    directives.mode = CompileMode::Static;
                    println!("[Tantrums] Mode: static (all variables must have types)");
                }
                "dynamic" => {
                    directives.mode = CompileMode::Dynamic;
                    println!("[Tantrums] Mode: dynamic (no type checking)");
                }
                "both" => {
                    directives.mode = CompileMode::Both;
                    println!("[Tantrums] Mode: both (typed + dynamic)");
                }
                other => {
                    eprintln!("[Tantrums] Warning: unknown #mode '{}', using 'both'.", other)
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix("#autoFree") {
            strip = true;
            directives.autofree = rest.trim() != "false";
        } else if let Some(rest) = trimmed.strip_prefix("#allowMemoryLeaks") {
            strip = true;
            directives.allow_leaks = rest.trim() == "true";
        }

        if strip {
            if line.ends_with('\n') {
                out.push('\n');
            }
        } else {
            out.push_str(line);
        }
    }

    (out, directives)
}

/// Replace the source extension with `.42ass`, next to the source.
fn bytecode_path_for(source: &Path) -> PathBuf {
    source.with_extension("42ass")
}

fn compile_file(source_path: &Path, suppress_notes: bool) -> Result<(Function, Directives), ExitCode> {
    let source = match std::fs::read_to_string(source_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Could not open file '{}': {}", source_path.display(), e);
            return Err(ExitCode::from(EXIT_USAGE));
        }
    };

    let (clean, directives) = strip_directives(&source);

    let tokens = match Lexer::new(&clean).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("{}", e);
            return Err(ExitCode::from(EXIT_COMPILE_ERROR));
        }
    };

    let program = match Parser::new(tokens).parse() {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}", e);
            return Err(ExitCode::from(EXIT_COMPILE_ERROR));
        }
    };

    let options = CompileOptions {
        mode: directives.mode,
        autofree_default: directives.autofree,
        allow_leaks: directives.allow_leaks,
        suppress_autofree_notes: suppress_notes,
    };
    let output = compile(&program, &options);

    for warning in &output.diagnostics.warnings {
        eprintln!("{}", warning);
    }
    for note in &output.diagnostics.notes {
        println!("{}", note);
    }

    match output.script {
        Some(script) => Ok((script, directives)),
        None => {
            for error in &output.diagnostics.errors {
                eprintln!("{}", error);
            }
            eprintln!("Compilation aborted due to type errors.");
            Err(ExitCode::from(EXIT_COMPILE_ERROR))
        }
    }
}

fn cmd_run(source: &Path, no_autofree_notes: bool, execute: bool) -> ExitCode {
    let (script, directives) = match compile_file(source, no_autofree_notes) {
        Ok(compiled) => compiled,
        Err(code) => return code,
    };

    let out_path = bytecode_path_for(source);
    if let Err(e) = bytecode::save(&out_path, &script) {
        eprintln!(
            "Could not write bytecode file '{}': {}",
            out_path.display(),
            e
        );
        return ExitCode::from(EXIT_USAGE);
    }

    if !execute {
        println!("Compiled successfully to '{}'.", out_path.display());
        return ExitCode::SUCCESS;
    }
    println!("[Tantrums] Compiled -> {}", out_path.display());

    run_script(script, &out_path, directives.autofree)
}

fn cmd_exec(path: &Path) -> ExitCode {
    let script = match bytecode::load(path) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Failed to load bytecode file '{}': {}", path.display(), e);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    run_script(script, path, true)
}

fn run_script(script: Function, bytecode_path: &Path, autofree_default: bool) -> ExitCode {
    let mut vm = Vm::new();
    vm.autofree_default = autofree_default;
    let result = vm.interpret(script);
    vm.finish(Some(bytecode_path));
    match result {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(EXIT_COMPILE_ERROR),
        InterpretResult::RuntimeError => ExitCode::from(EXIT_RUNTIME_ERROR),
    }
}
