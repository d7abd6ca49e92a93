//! Compilegate CLI
//!
//! Runs Facto sources through the queued compiler front end.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use compilegate::{CompileOptions, Compiler, Config, EXAMPLE_CONFIG, OutputEvent, Stats};
use tokio::task::JoinSet;
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compilegate")]
#[command(about = "Queued, supervised compilation of untrusted Facto source")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: compilegate.toml)
        #[arg(short, long, default_value = "compilegate.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Compile a source file to a blueprint
    Compile {
        /// Source file to compile
        #[arg(value_name = "FILE")]
        source: PathBuf,

        #[command(flatten)]
        options: OptionArgs,

        /// Print every event as a JSON line instead of plain text
        #[arg(long)]
        events_json: bool,

        /// Write the blueprint to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Submit many copies of a source at once and report queue behavior
    Stress {
        /// Source file to compile
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Number of concurrent submissions
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Show effective configuration
    ShowConfig,

    /// Show persisted compilation statistics
    Stats,
}

#[derive(clap::Args)]
struct OptionArgs {
    /// Power pole size (none, small, medium, big, substation)
    #[arg(long, default_value = "none")]
    power_poles: String,

    /// Blueprint display name
    #[arg(long)]
    name: Option<String>,

    /// Disable compiler optimizations
    #[arg(long)]
    no_optimize: bool,

    /// Ask the compiler for JSON output
    #[arg(long)]
    json: bool,

    /// Compiler log level (debug, info, warning, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl OptionArgs {
    fn to_options(&self) -> CompileOptions {
        let options = CompileOptions::new()
            .with_power_poles(&self.power_poles)
            .with_no_optimize(self.no_optimize)
            .with_json_output(self.json)
            .with_log_level(&self.log_level);
        match self.name {
            Some(ref name) => options.with_name(name),
            None => options,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using defaults and environment overrides");
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Compile {
            source,
            options,
            events_json,
            output,
        } => {
            run_compile(
                config,
                &source,
                options.to_options(),
                events_json,
                output.as_deref(),
            )
            .await
        }
        Commands::Stress {
            source,
            count,
            options,
        } => run_stress(config, &source, count, options.to_options()).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Stats => show_stats(&config),
    }
}

async fn run_compile(
    config: Config,
    source: &Path,
    options: CompileOptions,
    events_json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let text = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let compiler = Compiler::new(config).context("failed to set up compiler")?;
    let mut events = compiler.submit(text, options);
    info!(job_id = %events.job_id(), "submitted");

    let mut artifact = None;
    let mut failed = false;
    while let Some(event) = events.recv().await {
        if events_json {
            println!("{}", serde_json::to_string(&event)?);
        }
        match event {
            OutputEvent::Artifact(blueprint) => artifact = Some(blueprint),
            OutputEvent::Error(message) => {
                failed = true;
                if !events_json {
                    eprintln!("error: {message}");
                }
            }
            OutputEvent::Log(line) if !events_json => eprintln!("{line}"),
            OutputEvent::Status(status) if !events_json => eprintln!("[{status}]"),
            _ => {}
        }
    }

    match artifact {
        Some(blueprint) if !failed => {
            if let Some(path) = output {
                tokio::fs::write(path, &blueprint)
                    .await
                    .context("failed to write blueprint")?;
                eprintln!("Blueprint written to '{}'", path.display());
            } else if !events_json {
                println!("{blueprint}");
            }
            Ok(())
        }
        _ => std::process::exit(1),
    }
}

#[derive(Debug)]
struct StressResult {
    success: bool,
    elapsed: Duration,
    max_position: usize,
    error: Option<String>,
}

async fn run_stress(
    config: Config,
    source: &Path,
    count: usize,
    options: CompileOptions,
) -> Result<()> {
    let text = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let compiler = Compiler::new(config).context("failed to set up compiler")?;
    println!(
        "Submitting {count} concurrent jobs (queue capacity {})",
        compiler.queue().capacity()
    );

    let started = Instant::now();
    let mut jobs = JoinSet::new();
    for index in 0..count {
        let stream = compiler.submit(text.clone(), options.clone());
        jobs.spawn(async move {
            let submitted = Instant::now();
            let events = stream.collect().await;
            let max_position = events
                .iter()
                .filter_map(|event| match event {
                    OutputEvent::QueuePosition(position) => Some(*position),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            let error = events.iter().find_map(|event| match event {
                OutputEvent::Error(message) => Some(message.clone()),
                _ => None,
            });
            let result = StressResult {
                success: events.iter().any(OutputEvent::is_artifact),
                elapsed: submitted.elapsed(),
                max_position,
                error,
            };
            (index, result)
        });
    }

    let mut results = Vec::with_capacity(count);
    while let Some(joined) = jobs.join_next().await {
        results.push(joined.context("stress job panicked")?);
    }
    results.sort_by_key(|(index, _)| *index);

    for (index, result) in &results {
        let outcome = if result.success { "ok" } else { "FAILED" };
        println!(
            "  job {:>3}: {:<6} {:>8.2}s  max position {}{}",
            index + 1,
            outcome,
            result.elapsed.as_secs_f64(),
            result.max_position,
            result
                .error
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }

    let succeeded = results.iter().filter(|(_, r)| r.success).count();
    let times: Vec<f64> = results.iter().map(|(_, r)| r.elapsed.as_secs_f64()).collect();
    let max_position = results.iter().map(|(_, r)| r.max_position).max().unwrap_or(0);
    println!();
    println!("Succeeded: {succeeded}/{count}");
    println!("Max queue position observed: {max_position}");
    if !times.is_empty() {
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(0.0, f64::max);
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        println!("Job time: min {min:.2}s, avg {avg:.2}s, max {max:.2}s");
    }
    println!("Total wall time: {:.2}s", started.elapsed().as_secs_f64());

    Ok(())
}

fn show_config(config: &Config) {
    let args = if config.compiler_args.is_empty() {
        String::new()
    } else {
        format!(" {}", config.compiler_args.join(" "))
    };
    println!("Compiler: {}{}", config.compiler_path.display(), args);
    println!("Work directory: {}", config.work_dir().display());
    println!();
    println!("Limits:");
    println!("  Max source length: {} chars", config.max_source_length);
    println!("  Compilation timeout: {}s", config.compilation_timeout);
    println!();
    println!("Queue:");
    println!("  Capacity: {}", config.queue_capacity);
    println!("  Wait timeout: {}s", config.queue_wait_timeout);
    println!("  Poll interval: {}s", config.queue_poll_interval);
    println!();
    match config.deny_patterns {
        Some(ref patterns) => println!("Deny patterns: {} custom", patterns.len()),
        None => println!("Deny patterns: built-in"),
    }
    match config.stats_file {
        Some(ref path) => println!("Stats file: {}", path.display()),
        None => println!("Stats file: (in-memory)"),
    }
    println!("Debug: {}", config.debug);
}

fn show_stats(config: &Config) -> Result<()> {
    let Some(ref path) = config.stats_file else {
        anyhow::bail!("no stats_file configured; statistics are kept in memory only");
    };
    let snapshot = Stats::load(path).snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
