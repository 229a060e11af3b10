//! The `callgrind-index` binary
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use callgrind_index::{Preprocessor, ProxyFunctions, Reader};
use clap::{Parser, Subcommand};
use colored::{control, Colorize};
use env_logger::Env;
use log::{debug, info, warn};

const LOG_ENV: &str = "CALLGRIND_INDEX_LOG";
const PROXIES_ENV: &str = "CALLGRIND_INDEX_PROXIES";

/// Preprocessor and random-access reader for Callgrind-format profiler traces
#[derive(Parser, Debug)]
#[command(author, version, about, max_term_width = 100)]
struct CommandLineArgs {
    #[command(subcommand)]
    command: Cli,
}

#[derive(Subcommand, Debug)]
enum Cli {
    /// Stream a Callgrind-format trace into a compact binary index
    Preprocess {
        /// The Callgrind-dialect trace file to read
        #[arg(long)]
        input: PathBuf,
        /// Where to write the binary index
        #[arg(long)]
        output: PathBuf,
        /// A function name to treat as a transparent proxy; may be repeated
        #[arg(long = "proxy")]
        proxies: Vec<String>,
        /// An external preprocessor binary to try first
        ///
        /// Invoked as `<path> <input> <output> <comma-separated proxies>`. If it exits
        /// successfully the in-process preprocessor is skipped; on a non-zero exit or a launch
        /// failure this falls back to the in-process path.
        #[arg(long)]
        external_preprocessor: Option<PathBuf>,
    },
    /// Query an already-built binary index for one function
    Query {
        /// The binary index file to read
        #[arg(long)]
        index: PathBuf,
        /// The function's dense index
        #[arg(long)]
        function: u32,
        /// How to present cost values
        #[arg(long, value_enum, default_value = "usec")]
        format: callgrind_index::CostFormat,
    },
}

fn proxy_names_from_env() -> Vec<String> {
    std::env::var(PROXIES_ENV)
        .ok()
        .map(|value| value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect())
        .unwrap_or_default()
}

fn resolve_proxies(flag_proxies: Vec<String>) -> ProxyFunctions {
    let mut names = flag_proxies;
    names.extend(proxy_names_from_env());
    ProxyFunctions::from_names(names)
}

/// Resolve the external preprocessor's path via `PATH` if it's a bare name, matching the way
/// external tool binaries are resolved elsewhere in this ecosystem
fn resolve_external_preprocessor(path: &std::path::Path) -> Option<PathBuf> {
    match which::which(path) {
        Ok(resolved) => {
            debug!("Found external preprocessor '{}': '{}'", path.display(), resolved.display());
            Some(resolved)
        }
        Err(error) => {
            warn!(
                "External preprocessor '{}' could not be resolved: {error}, falling back to the \
                 built-in preprocessor",
                path.display()
            );
            None
        }
    }
}

/// Try the external preprocessor if one was given; returns `true` if it ran successfully
fn try_external_preprocessor(
    external: &Option<PathBuf>,
    input: &PathBuf,
    output: &PathBuf,
    proxies: &[String],
) -> bool {
    let Some(path) = external else {
        return false;
    };
    let Some(path) = resolve_external_preprocessor(path) else {
        return false;
    };
    let path = &path;

    let status = Command::new(path)
        .arg(input)
        .arg(output)
        .arg(proxies.join(","))
        .status();

    match status {
        Ok(status) if status.success() => {
            info!("External preprocessor '{}' succeeded", path.display());
            true
        }
        Ok(status) => {
            warn!(
                "External preprocessor '{}' exited with {status}, falling back to the built-in \
                 preprocessor",
                path.display()
            );
            false
        }
        Err(error) => {
            warn!(
                "Failed to launch external preprocessor '{}': {error}, falling back to the \
                 built-in preprocessor",
                path.display()
            );
            false
        }
    }
}

fn run_preprocess(
    input: PathBuf,
    output: PathBuf,
    proxies: Vec<String>,
    external_preprocessor: Option<PathBuf>,
) -> Result<()> {
    let flag_proxies: Vec<String> = proxies.clone();

    if try_external_preprocessor(&external_preprocessor, &input, &output, &flag_proxies) {
        return Ok(());
    }

    let proxy_set = resolve_proxies(proxies);
    debug!("Preprocessing '{}' -> '{}'", input.display(), output.display());
    Preprocessor::new(proxy_set)
        .preprocess(&input, &output)
        .with_context(|| format!("Failed to preprocess '{}'", input.display()))
}

fn run_query(index: PathBuf, function: u32, format: callgrind_index::CostFormat) -> Result<()> {
    let mut reader =
        Reader::open(&index, format).with_context(|| format!("Failed to open index '{}'", index.display()))?;

    if function >= reader.function_count() {
        return Err(anyhow!(
            "Function index {function} is out of range: index has {} functions",
            reader.function_count()
        ));
    }

    let info = reader.function_info(function, None)?;
    println!(
        "{} ({}:{})  self={}  incl={}  invocations={}",
        info.function_name, info.file, info.line, info.summed_self_cost, info.summed_inclusive_cost,
        info.invocation_count
    );

    for j in 0..info.called_from_info_count {
        let edge = reader.called_from_info(function, j, None)?;
        println!(
            "  calledFrom #{} at line {}: calls={} cost={}",
            edge.function_nr, edge.line, edge.call_count, edge.summed_call_cost
        );
    }
    for j in 0..info.sub_call_info_count {
        let edge = reader.sub_call_info(function, j, None)?;
        println!(
            "  subCall #{} at line {}: calls={} cost={}",
            edge.function_nr, edge.line, edge.call_count, edge.summed_call_cost
        );
    }

    Ok(())
}

fn main() {
    if let Ok(var) = std::env::var("CARGO_TERM_COLOR") {
        if var == "never" {
            control::set_override(false);
        } else if var == "always" {
            control::set_override(true);
        }
    }

    env_logger::Builder::from_env(Env::default().filter_or(LOG_ENV, "warn"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{}: {:<5}: {}",
                record.module_path().unwrap_or("???"),
                match record.level() {
                    log::Level::Error => "Error".red().bold(),
                    log::Level::Warn => "Warn".yellow().bold(),
                    log::Level::Info => "Info".green().bold(),
                    log::Level::Debug => "Debug".blue().bold(),
                    log::Level::Trace => "Trace".cyan().bold(),
                },
                record.args()
            )
        })
        .init();

    let args = CommandLineArgs::parse();
    let result = match args.command {
        Cli::Preprocess { input, output, proxies, external_preprocessor } => {
            run_preprocess(input, output, proxies, external_preprocessor)
        }
        Cli::Query { index, function, format } => run_query(index, function, format),
    };

    if let Err(error) = result {
        log::error!("{error:#}");
        let code = match error.downcast_ref::<callgrind_index::Error>() {
            Some(callgrind_index::Error::VersionMismatch { .. }) => 2,
            Some(callgrind_index::Error::OutOfRange { .. }) => 3,
            _ => 1,
        };
        std::process::exit(code);
    }
}
