//! `gotsc`: the command-line driver for the GoTS JIT (spec.md §6 "Process
//! lifecycle"). Compiles a JSON-encoded AST, runs its `main` function, and
//! waits for every goroutine/timer the program scheduled before exiting.

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;
use gots_jit::compiler::CompilationManager;
use gots_jit::runtime::abi::runtime_symbol_address;
use gots_jit::runtime::EventLoop;
use gots_jit::{load_program, GotsConfig};
use std::path::PathBuf;
use std::time::Instant;

#[derive(ClapParser)]
#[command(name = "gotsc", about = "JIT compiler and runtime for GoTS")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a program's `main` function to completion.
    Run {
        /// JSON-encoded AST produced by a GoTS front end.
        file: PathBuf,
    },
    /// Compile and run `main`, reporting JIT and execution wall time.
    Bench {
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { file } => run(&file, false),
        Commands::Bench { file } => run(&file, true),
    }
}

fn run(file: &PathBuf, bench: bool) -> anyhow::Result<()> {
    let dir = file.parent().unwrap_or_else(|| std::path::Path::new("."));
    let _config: GotsConfig = GotsConfig::load_from_dir(dir)?;

    let program = load_program(file)?;

    let mut manager = CompilationManager::new();
    let compile_start = Instant::now();
    manager.compile(&program, runtime_symbol_address)?;
    let compile_elapsed = compile_start.elapsed();

    let main_addr = manager.registry.resolve_name("main").ok_or_else(|| {
        anyhow::anyhow!("program has no 'main' function")
    })?;
    let main_fn: extern "C" fn() -> i64 = unsafe { std::mem::transmute(main_addr) };

    let run_start = Instant::now();
    let exit_value = main_fn();
    EventLoop::global().wait_for_completion();
    let run_elapsed = run_start.elapsed();

    if bench {
        println!("{}", "gotsc bench".bold());
        println!("  compile: {:?}", compile_elapsed);
        println!("  run:     {:?}", run_elapsed);
        println!("  main() = {}", exit_value);
    }

    EventLoop::global().shutdown();
    Ok(())
}
