use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use wasm_loader::wasm::{WasmExecutionLimits, WASM_ABI_ENTRY_EXPORT, WASM_ABI_MEMORY_EXPORT};
use wasm_loader::{FileByteSource, RunError, Runner, RunnerConfig, StdoutSink};

#[derive(Parser, Debug)]
#[command(
    name = "wasm-loader",
    about = "Run a wasm module that prints through the core.write import"
)]
struct Args {
    /// Module file to run, relative to --root
    module: String,
    /// Directory modules are read from
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Export invoked as the entry point
    #[arg(long, default_value = WASM_ABI_ENTRY_EXPORT)]
    entry: String,
    /// Exported memory that core.write reads from
    #[arg(long, default_value = WASM_ABI_MEMORY_EXPORT)]
    memory_export: String,
    /// Fuel budget for the run; unlimited when omitted
    #[arg(long)]
    fuel: Option<u64>,
}

impl Args {
    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            entry_point: self.entry.clone(),
            memory_export: self.memory_export.clone(),
            limits: WasmExecutionLimits {
                max_fuel: self.fuel,
            },
        }
    }
}

/// Process status for a failed run: the module's own exit code when it fits in
/// `1..=255`, otherwise 1.
fn exit_status_for(error: &RunError) -> u8 {
    match error.exit_code().and_then(|code| u8::try_from(code).ok()) {
        Some(code) if code != 0 => code,
        _ => 1,
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let source = FileByteSource::new(&args.root);
    let runner = match Runner::new(source, args.runner_config()) {
        Ok(runner) => runner,
        Err(error) => {
            eprintln!("failed to initialize wasm runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runner.run(&args.module, StdoutSink).into_result() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}: {error}", args.module);
            ExitCode::from(exit_status_for(&error))
        }
    }
}
