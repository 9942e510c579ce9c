//! `seraphimc` — the Celestial IR middle-end driver.
//!
//! Reads a type-checked AST as JSON (the lexer, parser, and
//! type/effect checker are external collaborators this crate does not
//! implement), lowers it to Celestial IR, verifies and optimizes the
//! result, and prints either the IR's textual form or its
//! diagnostics.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use seraphim::ast::Program;
use seraphim::diag::Severity;
use seraphim::lower::Lowerer;
use seraphim::optimize::Optimizer;
use seraphim::printer::Printer;
use seraphim::verify::verify_module;

/// Celestial IR middle-end: AST lowering, verification, and optimization.
#[derive(Parser, Debug)]
#[command(name = "seraphimc")]
#[command(author = "Z1529")]
#[command(version = "0.1.0")]
#[command(about = "Seraphim middle end - lowers a type-checked AST to Celestial IR")]
struct Cli {
    /// Type-checked AST, serialized as JSON.
    #[arg(value_name = "AST_JSON")]
    input: PathBuf,

    /// Module name to assign the lowered IR.
    #[arg(long, default_value = "main")]
    module_name: String,

    /// Skip the constant-folding / dead-code-elimination passes.
    #[arg(long)]
    no_optimize: bool,

    /// Write textual IR here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(had_errors) => {
            if had_errors {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("seraphimc: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` if diagnostics of error severity were reported;
/// the process exits non-zero in that case.
fn run(cli: &Cli) -> Result<bool> {
    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let program: Program = serde_json::from_str(&source)
        .with_context(|| format!("parsing AST JSON from {}", cli.input.display()))?;

    let mut lowerer = Lowerer::new(&cli.module_name);
    lowerer.lower_program(&program);

    for diag in lowerer.diagnostics.diagnostics() {
        print_diagnostic(diag);
    }
    if lowerer.is_errored() {
        return Ok(true);
    }

    let mut module = lowerer.builder.module;

    if let Err(err) = verify_module(&module) {
        eprintln!("error: {err}");
        return Ok(true);
    }

    if !cli.no_optimize {
        Optimizer::new().optimize(&mut module);
    }

    let ir_text = Printer::new().print_module(&module);
    match &cli.output {
        Some(path) => fs::write(path, ir_text).with_context(|| format!("writing {}", path.display()))?,
        None => print!("{ir_text}"),
    }

    Ok(false)
}

fn print_diagnostic(diag: &seraphim::diag::Diagnostic) {
    let level = match diag.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    match &diag.span {
        Some(span) => eprintln!("{level}: {} ({span})", diag.message),
        None => eprintln!("{level}: {}", diag.message),
    }
}
