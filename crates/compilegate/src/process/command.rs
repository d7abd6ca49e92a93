//! Command builder for the compiler CLI
//!
//! Builds command-line arguments for the external Facto compiler.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::types::CompileOptions;

/// Maps a job's files and options to a compiler argument vector
pub trait CommandBuilder: Send + Sync {
    /// Full argument vector, program first
    fn build(&self, input: &Path, output: &Path, options: &CompileOptions) -> Vec<String>;
}

/// Builder for compiler command-line arguments
#[derive(Debug)]
pub struct CompilerCommand {
    /// Path to the compiler executable
    compiler_path: PathBuf,
    /// Launcher arguments placed before the input file
    prefix_args: Vec<String>,
    /// Positional source file
    input: Option<PathBuf>,
    /// -o
    output: Option<PathBuf>,
    options: CompileOptions,
}

impl CompilerCommand {
    /// Create a new compiler command builder
    pub fn new(compiler_path: impl Into<PathBuf>) -> Self {
        Self {
            compiler_path: compiler_path.into(),
            prefix_args: Vec::new(),
            input: None,
            output: None,
            options: CompileOptions::default(),
        }
    }

    /// Add arguments between the executable and the input file
    pub fn prefix_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.prefix_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the source file
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    /// Set the blueprint output file
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Set compilation options
    pub fn options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the argument vectors.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.compiler_path.to_string_lossy().into_owned()];
        args.extend(self.prefix_args);

        if let Some(ref input) = self.input {
            args.push(input.to_string_lossy().into_owned());
        }
        if let Some(ref output) = self.output {
            args.push("-o".to_string());
            args.push(output.to_string_lossy().into_owned());
        }

        if let Some(poles) = self.options.power_poles.as_arg() {
            args.push("--power-poles".to_string());
            args.push(poles.to_string());
        }
        if let Some(name) = self.options.name() {
            args.push("--name".to_string());
            args.push(name.to_string());
        }
        if self.options.no_optimize {
            args.push("--no-optimize".to_string());
        }
        if self.options.json_output {
            args.push("--json".to_string());
        }
        args.push("--log-level".to_string());
        args.push(self.options.log_level.as_str().to_string());

        args
    }

    /// Get the compiler executable path
    pub fn compiler_path(&self) -> &Path {
        &self.compiler_path
    }
}

/// [`CommandBuilder`] for `factompile`
#[derive(Debug, Clone)]
pub struct FactoCommandBuilder {
    compiler_path: PathBuf,
    compiler_args: Vec<String>,
}

impl FactoCommandBuilder {
    pub fn new(compiler_path: impl Into<PathBuf>) -> Self {
        Self {
            compiler_path: compiler_path.into(),
            compiler_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.compiler_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.compiler_path).with_args(config.compiler_args.iter().cloned())
    }
}

impl CommandBuilder for FactoCommandBuilder {
    fn build(&self, input: &Path, output: &Path, options: &CompileOptions) -> Vec<String> {
        CompilerCommand::new(&self.compiler_path)
            .prefix_args(self.compiler_args.iter().cloned())
            .input(input)
            .output(output)
            .options(options.clone())
            .build()
    }
}
