//! WASI environment construction.
//!
//! A [`WasiEnvironment`] is built once per runtime from a [`WasiConfig`] and
//! validated eagerly, so an unusable configuration fails runtime
//! construction. Wasmtime contexts cannot be shared between stores, so every
//! instance gets its own [`WasiContext`] materialized from the same recipe.

use std::path::{Path, PathBuf};

use tracing::debug;
use wasmtime_wasi::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use guestbox_common::{WasiConfig, WasiError};

/// Guest path the working directory is pre-opened under.
pub const WORKDIR_GUEST_PATH: &str = ".";

/// One step of environment construction.
///
/// Steps are applied in the order produced by [`WasiEnvironment::steps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStep {
    /// `argv[0]`.
    ProgramName(String),
    /// One argument after the program name.
    Arg(String),
    /// One environment variable.
    Env(String, String),
    /// A host directory exposed under a guest name.
    MapDirectory {
        /// Guest-visible name.
        guest: String,
        /// Host path.
        host: PathBuf,
    },
    /// Capture guest stdout.
    CaptureStdout,
    /// Capture guest stderr.
    CaptureStderr,
    /// Pre-open the working directory.
    PreopenWorkdir(PathBuf),
}

/// A validated recipe for the WASI sandbox of every instance of one runtime.
#[derive(Debug, Clone)]
pub struct WasiEnvironment {
    program_name: String,
    config: WasiConfig,
}

/// The per-instance product of a [`WasiEnvironment`].
pub struct WasiContext {
    /// The preview1 context consumed by the engine.
    pub ctx: WasiP1Ctx,
    /// Captured stdout, if capture was requested.
    pub stdout: Option<MemoryOutputPipe>,
    /// Captured stderr, if capture was requested.
    pub stderr: Option<MemoryOutputPipe>,
}

impl WasiEnvironment {
    /// Create an environment for a module named `base_name`.
    ///
    /// The configured program name wins over `base_name`. The environment is
    /// built once here and discarded, so invalid paths fail now rather than
    /// at the first instantiation.
    ///
    /// # Errors
    ///
    /// Returns an error if any build step is rejected.
    pub fn new(base_name: &str, config: WasiConfig) -> Result<Self, WasiError> {
        let program_name = config
            .program_name
            .clone()
            .unwrap_or_else(|| base_name.to_string());

        if config.capture_limit_bytes == 0
            && (config.capture_stdout || config.capture_stderr)
        {
            return Err(WasiError::EnvironmentError {
                reason: "capture_limit_bytes must be greater than zero".into(),
            });
        }

        let env = Self {
            program_name,
            config,
        };
        env.build()?;

        debug!(
            program_name = %env.program_name,
            args = env.config.args.len(),
            env_vars = env.config.env.len(),
            directories = env.config.directories.len(),
            "WASI environment validated"
        );

        Ok(env)
    }

    /// The program name exposed as `argv[0]`.
    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// The configuration this environment was built from.
    pub fn config(&self) -> &WasiConfig {
        &self.config
    }

    /// The build steps, in application order.
    ///
    /// Program name, then arguments, then environment variables, then
    /// directory mappings, then stdio capture, then the working directory.
    pub fn steps(&self) -> Vec<BuildStep> {
        let config = &self.config;
        let mut steps = vec![BuildStep::ProgramName(self.program_name.clone())];

        steps.extend(config.args.iter().cloned().map(BuildStep::Arg));
        steps.extend(
            config
                .env
                .iter()
                .map(|(k, v)| BuildStep::Env(k.clone(), v.clone())),
        );
        steps.extend(
            config
                .directories
                .iter()
                .map(|(guest, host)| BuildStep::MapDirectory {
                    guest: guest.clone(),
                    host: host.clone(),
                }),
        );
        if config.capture_stdout {
            steps.push(BuildStep::CaptureStdout);
        }
        if config.capture_stderr {
            steps.push(BuildStep::CaptureStderr);
        }
        if let Some(ref workdir) = config.workdir {
            steps.push(BuildStep::PreopenWorkdir(workdir.clone()));
        }

        steps
    }

    /// Materialize a fresh context for one instance.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be pre-opened.
    pub fn build(&self) -> Result<WasiContext, WasiError> {
        let mut builder = WasiCtxBuilder::new();
        let mut stdout = None;
        let mut stderr = None;

        for step in self.steps() {
            match step {
                BuildStep::ProgramName(name) => {
                    builder.arg(name);
                }
                BuildStep::Arg(arg) => {
                    builder.arg(arg);
                }
                BuildStep::Env(key, value) => {
                    builder.env(key, value);
                }
                BuildStep::MapDirectory { guest, host } => {
                    preopen(&mut builder, &host, &guest)?;
                }
                BuildStep::CaptureStdout => {
                    let pipe = MemoryOutputPipe::new(self.config.capture_limit_bytes);
                    builder.stdout(pipe.clone());
                    stdout = Some(pipe);
                }
                BuildStep::CaptureStderr => {
                    let pipe = MemoryOutputPipe::new(self.config.capture_limit_bytes);
                    builder.stderr(pipe.clone());
                    stderr = Some(pipe);
                }
                BuildStep::PreopenWorkdir(path) => {
                    preopen(&mut builder, &path, WORKDIR_GUEST_PATH)?;
                }
            }
        }

        if stdout.is_none() {
            builder.inherit_stdout();
        }
        if stderr.is_none() {
            builder.inherit_stderr();
        }

        Ok(WasiContext {
            ctx: builder.build_p1(),
            stdout,
            stderr,
        })
    }
}

fn preopen(builder: &mut WasiCtxBuilder, host: &Path, guest: &str) -> Result<(), WasiError> {
    builder
        .preopened_dir(host, guest, DirPerms::all(), FilePerms::all())
        .map_err(|e| WasiError::DirectoryMapping {
            guest: guest.to_string(),
            host: host.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

impl std::fmt::Debug for WasiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiContext")
            .field("capture_stdout", &self.stdout.is_some())
            .field("capture_stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}
