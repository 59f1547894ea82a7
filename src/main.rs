//! guestbox CLI entry point.
//!
//! Runs a guest module through the full startup protocol, optionally calls
//! one export, and prints whatever the guest wrote to captured stdio.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guestbox_common::{ConfigFile, RuntimeConfig};
use guestbox_core::{GuestModule, Runtime, WasmEngine};
use guestbox_host::standard_imports;

#[derive(Debug, Parser)]
#[command(name = "guestbox", version, about = "Run WebAssembly guests in a WASI sandbox")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true, env = "GUESTBOX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Instantiate a module and optionally call one export.
    Run {
        /// Module to run (`.wasm`, `.wat` or `.cwasm`). Defaults to the
        /// module named in the configuration file.
        module: Option<PathBuf>,

        /// Export to call once startup finishes.
        #[arg(long)]
        invoke: Option<String>,

        /// Capture guest stdout and stderr instead of inheriting them.
        #[arg(long)]
        capture: bool,

        /// Integer arguments for `--invoke`.
        #[arg(allow_negative_numbers = true)]
        args: Vec<i32>,
    },

    /// Compile a module ahead of time.
    Compile {
        /// Module to compile (`.wasm` or `.wat`).
        module: PathBuf,

        /// Where to write the compiled artifact.
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,guestbox=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_file = match cli.config {
        Some(ref path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigFile::default(),
    };

    match cli.command {
        Command::Run {
            module,
            invoke,
            capture,
            args,
        } => {
            let (module, name) = match module {
                Some(path) => (path, None),
                None => {
                    let entry = config_file
                        .module
                        .as_ref()
                        .context("No module given and none configured")?;
                    (PathBuf::from(&entry.path), entry.name.clone())
                }
            };

            let mut runtime_config = config_file.runtime;
            if capture {
                runtime_config.wasi = runtime_config.wasi.capture_stdio();
            }

            run(
                &module,
                name.as_deref(),
                &runtime_config,
                invoke.as_deref(),
                &args,
            )
        }
        Command::Compile { module, output } => {
            compile(&module, &output, &config_file.runtime)
        }
    }
}

fn run(
    path: &Path,
    name: Option<&str>,
    config: &RuntimeConfig,
    invoke: Option<&str>,
    args: &[i32],
) -> anyhow::Result<()> {
    if invoke.is_none() && !args.is_empty() {
        bail!("Arguments given without --invoke");
    }

    let engine = WasmEngine::new(&config.engine)?;
    let (imports, logging) = standard_imports();
    let runtime = match name {
        Some(name) => Runtime::from_file_named(&engine, path, name, config, imports),
        None => Runtime::from_file(&engine, path, config, imports),
    }
    .with_context(|| format!("Failed to load {}", path.display()))?;

    let handle = runtime.new_instance()?;
    let mut instance = handle.lock();

    info!(
        instance_id = %handle.id(),
        entrypoints = ?instance.entrypoints(),
        "Guest started"
    );

    let outcome = invoke.map(|export| (export, instance.call(export, args)));

    print!("{}", instance.stdout()?);
    eprint!("{}", instance.stderr()?);

    if let Some((export, result)) = outcome {
        match result? {
            Some(value) => println!("{value}"),
            None => info!(export, "Export returned no value"),
        }
    }

    let guest_logs = logging.take_for(handle.id());
    info!(guest_logs = guest_logs.len(), "Guest finished");

    instance.close()?;
    Ok(())
}

fn compile(path: &Path, output: &Path, config: &RuntimeConfig) -> anyhow::Result<()> {
    let engine = WasmEngine::new(&config.engine)?;
    let source =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_stem()
        .map_or_else(|| "guest".to_string(), |s| s.to_string_lossy().into_owned());

    let module = GuestModule::from_source(engine.inner(), name, &source)?;
    let artifact = module.serialize()?;
    std::fs::write(output, &artifact)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        module = %module.name(),
        output = %output.display(),
        bytes = artifact.len(),
        "Module compiled ahead of time"
    );

    Ok(())
}
