use std::fs;
use std::io::stdout;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use winterp::runtime::host::init_spectest;
use winterp::runtime::{code, read_binary, Environment, Func, Module, Thread, ThreadOptions};
use winterp::spec::run_spec_script;
use winterp::types::ExternalKind;

#[derive(Parser)]
#[command(name = "winterp")]
#[command(about = "Read a file in the wasm binary format and run it in a stack-based interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a binary module, run its start function, and optionally run
    /// its exports
    Run {
        /// Path to the WebAssembly module
        file: PathBuf,

        /// Run all exported functions, in order
        #[arg(long)]
        run_all_exports: bool,

        /// Trace execution to stdout
        #[arg(long, short = 't')]
        trace: bool,

        /// Size in elements of the value stack
        #[arg(long, short = 'V', value_name = "SIZE")]
        value_stack_size: Option<usize>,

        /// Size in frames of the call stack
        #[arg(long, short = 'C', value_name = "SIZE")]
        call_stack_size: Option<usize>,
    },

    /// Run a JSON spec test script
    Spec {
        /// Path to the script (as produced by the text-to-binary compiler)
        file: PathBuf,

        /// Size in elements of the value stack
        #[arg(long, short = 'V', value_name = "SIZE")]
        value_stack_size: Option<usize>,

        /// Size in frames of the call stack
        #[arg(long, short = 'C', value_name = "SIZE")]
        call_stack_size: Option<usize>,
    },

    /// Print a module summary
    Dump {
        /// Path to the WebAssembly module
        file: PathBuf,

        /// Show the compiled instruction stream of each function
        #[arg(long, short = 'd')]
        disassemble: bool,
    },
}

fn thread_options(value_stack_size: Option<usize>, call_stack_size: Option<usize>) -> ThreadOptions {
    let mut options = ThreadOptions::default();
    if let Some(size) = value_stack_size {
        options.value_stack_size = size;
    }
    if let Some(size) = call_stack_size {
        options.call_stack_size = size;
    }
    options
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            run_all_exports,
            trace,
            value_stack_size,
            call_stack_size,
        } => run_module(
            &file,
            run_all_exports,
            trace,
            thread_options(value_stack_size, call_stack_size),
        ),
        Commands::Spec {
            file,
            value_stack_size,
            call_stack_size,
        } => match run_spec_script(&file, thread_options(value_stack_size, call_stack_size)) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("error reading {}: {e}", file.display());
                ExitCode::FAILURE
            }
        },
        Commands::Dump { file, disassemble } => dump_module(&file, disassemble),
    }
}

fn load(env: &mut Environment, file: &PathBuf) -> Result<usize, ExitCode> {
    let bytes = match fs::read(file) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error reading {}: {e}", file.display());
            return Err(ExitCode::FAILURE);
        }
    };
    read_binary(env, None, &bytes).map_err(|e| {
        eprintln!("{}: {e}", file.display());
        ExitCode::FAILURE
    })
}

fn run_module(
    file: &PathBuf,
    run_all_exports: bool,
    trace: bool,
    options: ThreadOptions,
) -> ExitCode {
    let mut env = Environment::new();
    init_spectest(&mut env);

    let module_index = match load(&mut env, file) {
        Ok(index) => index,
        Err(code) => return code,
    };

    let mut thread = Thread::new(options);
    if let Err(trap) = thread.run_start(&mut env, module_index) {
        eprintln!("error running start function: {trap}");
        return ExitCode::FAILURE;
    }

    if run_all_exports {
        let exports: Vec<_> = env
            .module(module_index)
            .exports()
            .iter()
            .filter(|e| e.kind == ExternalKind::Func)
            .map(|e| (e.name.clone(), e.index))
            .collect();
        for (name, func_index) in exports {
            let result = if trace {
                println!(">>> running export \"{name}\":");
                thread.trace_function(&mut env, func_index, &mut stdout(), &[])
            } else {
                thread.run_function(&mut env, func_index, &[])
            };
            match result {
                Ok(results) => {
                    let rendered: Vec<String> = results.iter().map(|v| v.to_string()).collect();
                    println!("{name}() => {}", rendered.join(", "));
                }
                Err(trap) => println!("{name}() => error: {trap}"),
            }
        }
    }

    ExitCode::SUCCESS
}

fn dump_module(file: &PathBuf, disassemble: bool) -> ExitCode {
    let mut env = Environment::new();
    init_spectest(&mut env);

    let module_index = match load(&mut env, file) {
        Ok(index) => index,
        Err(code) => return code,
    };

    let module = match env.module(module_index) {
        Module::Defined(module) => module,
        Module::Host(_) => unreachable!("read_binary produces defined modules"),
    };

    println!("functions: {}", module.func_indices.len());
    println!("globals:   {}", module.global_indices.len());
    if let Some(index) = module.memory_index {
        println!("memory:    {} pages {}", env.memory(index).pages(), env.memory(index).limits());
    }
    if let Some(index) = module.table_index {
        println!("table:     {} entries {}", env.table(index).size(), env.table(index).limits());
    }
    for export in &module.exports {
        println!("export:    {} \"{}\" -> ${}", export.kind, export.name, export.index);
    }

    if disassemble {
        for func_index in &module.func_indices {
            if let Func::Defined(func) = env.func(*func_index) {
                println!("\nfunc ${func_index} {}:", func.sig);
                print!("{}", code::disassemble(&func.code));
            }
        }
    }

    ExitCode::SUCCESS
}
