use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use snafu::ResultExt;

use rminic::error::IoSnafu;
use rminic::{CompileResult, codegen, parser, semantic, tokenizer};

/// Compile a program into x86-64 NASM assembly.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
  /// Source file to compile
  input: PathBuf,
  /// Write the assembly here instead of stdout
  #[arg(short, long)]
  output: Option<PathBuf>,
  /// Dump tokens, AST and scope tree to stderr
  #[arg(short, long)]
  debug: bool,
}

fn run(args: &Args) -> CompileResult<()> {
  let source = fs::read_to_string(&args.input).context(IoSnafu {
    action: "read",
    path: &args.input,
  })?;

  let tokens = tokenizer::tokenize(&source)?;
  if args.debug {
    eprintln!("tokens: {tokens:?}");
  }
  let program = parser::parse(tokens, &source)?;
  if args.debug {
    eprintln!("ast: {program:#?}");
  }
  let mut scopes = semantic::analyze(&program, &source)?;
  let asm = codegen::generate(&program, &mut scopes)?;
  if args.debug {
    eprint!("scopes:\n{scopes}");
  }

  match &args.output {
    Some(path) => fs::write(path, asm).context(IoSnafu {
      action: "write",
      path,
    })?,
    None => print!("{asm}"),
  }
  Ok(())
}

fn main() {
  let args = Args::parse();
  if let Err(err) = run(&args) {
    eprintln!("{}: {err}", args.input.display());
    process::exit(err.exit_code());
  }
}
