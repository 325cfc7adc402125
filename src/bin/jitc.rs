//! Compile a C snippet from the command line and optionally run it.
//!
//! Usage:
//!   jitc 'return x*x;' --param double:x                  # Compile only
//!   jitc 'return x*x;' --param double:x --emit           # Print the translation unit
//!   jitc 'return x*x;' --param double:x --values 0,1,2,3 # Apply serially
//!   jitc 'a+b' --param int:a --param int:b --ret int \
//!        --values 1,2 --values 3,4 --threads 2 --mode chunk
//!   jitc --help                                           # Show help

use std::env;
use std::process;

use generic_jit::buffers::{Buffers, Column};
use generic_jit::compiler::Compiler;
use generic_jit::config::{CompilerConfig, PoolConfig};
use generic_jit::dispatch::{self, PartitionMode};
use generic_jit::error::Result;
use generic_jit::types::{Param, ScalarType, Signature};
use generic_jit::utils::{WorkerPool, C_COMPILER_NAME};

struct Options {
    snippet: Option<String>,
    params: Vec<(String, String)>,
    ret: String,
    values: Vec<String>,
    len: Option<usize>,
    threads: Option<usize>,
    mode: PartitionMode,
    cache_dir: Option<String>,
    emit: bool,
}

fn print_help() {
    println!("jitc {}", env!("CARGO_PKG_VERSION"));
    println!("Compile a scalar C snippet and apply it element-wise.\n");
    println!("Usage: jitc <SNIPPET> [OPTIONS]\n");
    println!("Options:");
    println!("  --param TYPE:NAME   Declare the next parameter (repeatable, in order)");
    println!("  --ret TYPE          Return type (default: double)");
    println!("  --values A,B,...    Column for the next parameter (repeatable)");
    println!("  --len N             Output length when the function takes no parameters");
    println!("  --threads N         Run on N pool tasks instead of the calling thread");
    println!("  --mode stride|chunk Partition mode for --threads (default: chunk)");
    println!("  --cache-dir DIR     Persist compiled artifacts in DIR");
    println!("  --emit              Print the generated C translation unit");
    println!("  -h, --help          Show this help");
    println!("  -V, --version       Show version and detected C compiler\n");
    println!("Types: int, int32_t, long, int64_t, float, double");
    println!("Set RUST_LOG=debug to trace compilation and dispatch.");
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    process::exit(1);
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    match args.get(*i) {
        Some(value) => value.clone(),
        None => fail(format!("{flag} needs a value")),
    }
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options {
        snippet: None,
        params: Vec::new(),
        ret: "double".to_string(),
        values: Vec::new(),
        len: None,
        threads: None,
        mode: PartitionMode::Chunked,
        cache_dir: None,
        emit: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--version" | "-V" => {
                println!(
                    "jitc {} (C compiler: {})",
                    env!("CARGO_PKG_VERSION"),
                    C_COMPILER_NAME.unwrap_or("not detected")
                );
                process::exit(0);
            }
            "--param" => {
                let spec = next_value(args, &mut i, "--param");
                match spec.split_once(':') {
                    Some((ty, name)) => options.params.push((ty.to_string(), name.to_string())),
                    None => fail(format!("--param expects TYPE:NAME, got `{spec}`")),
                }
            }
            "--ret" => options.ret = next_value(args, &mut i, "--ret"),
            "--values" => options.values.push(next_value(args, &mut i, "--values")),
            "--len" => {
                let value = next_value(args, &mut i, "--len");
                options.len = Some(value.parse().unwrap_or_else(|_| fail(format!("bad --len `{value}`"))));
            }
            "--threads" => {
                let value = next_value(args, &mut i, "--threads");
                options.threads = Some(value.parse().unwrap_or_else(|_| fail(format!("bad --threads `{value}`"))));
            }
            "--mode" => {
                let value = next_value(args, &mut i, "--mode");
                options.mode = value.parse().unwrap_or_else(|e| fail(e));
            }
            "--cache-dir" => options.cache_dir = Some(next_value(args, &mut i, "--cache-dir")),
            "--emit" => options.emit = true,
            arg if !arg.starts_with('-') && options.snippet.is_none() => {
                options.snippet = Some(arg.to_string());
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }
    options
}

/// Bind `--values` columns to the parameters, in order.
fn build_buffers(signature: &Signature, options: &Options) -> Result<Buffers> {
    let mut inputs = Vec::with_capacity(options.values.len());
    for (param, text) in signature.params().iter().zip(&options.values) {
        inputs.push(Column::parse(param.ty, text)?);
    }
    let len = inputs
        .first()
        .map(Column::len)
        .or(options.len)
        .unwrap_or(0);

    let mut buffers = Buffers::new(Column::zeros(signature.ret(), len));
    for column in inputs {
        buffers = buffers.with_input(column);
    }
    Ok(buffers)
}

fn run(options: Options) -> Result<()> {
    let Some(snippet) = options.snippet.as_deref() else {
        fail("missing snippet (see --help)");
    };

    let params = options
        .params
        .iter()
        .map(|(ty, name)| Param::parse(ty, name))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let ret: ScalarType = options.ret.parse()?;
    let signature = Signature::new(params, ret)?;

    let mut config = CompilerConfig::from_env()?;
    if let Some(dir) = &options.cache_dir {
        config.cache_dir = Some(dir.into());
    }
    let compiler = Compiler::new(config)?;

    if options.emit {
        print!("{}", compiler.emit_source(snippet, &signature)?);
    }

    let handle = compiler.compile(snippet, &signature)?;
    log::info!("compiled {} as {}", signature, handle.key().short_hex());

    let runnable = !options.values.is_empty() || options.len.is_some();
    if !runnable {
        if !options.emit {
            println!("ok: {signature}");
        }
        return Ok(());
    }
    if options.values.len() != signature.arity() {
        fail(format!(
            "{} parameter(s) declared but {} --values given",
            signature.arity(),
            options.values.len()
        ));
    }

    let mut buffers = build_buffers(&signature, &options)?;
    let len = buffers.len();
    if let Some(threads) = options.threads {
        let pool = WorkerPool::new(PoolConfig {
            threads: threads.max(1),
            ..PoolConfig::from_env()?
        })?;
        let batch = dispatch::dispatch_parallel(&pool, &handle, buffers, 0, len, threads, options.mode)?;
        buffers = dispatch::join(batch)?;
    } else {
        dispatch::apply(&handle, &mut buffers, 0, len)?;
    }

    let output = buffers.output();
    let rendered: Vec<String> = (0..len).filter_map(|i| output.display_at(i)).collect();
    println!("{}", rendered.join(","));
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    let options = parse_args(&args);
    if let Err(e) = run(options) {
        fail(e);
    }
}
