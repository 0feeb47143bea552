use crate::access::graph::PermissionGraph;
use crate::access::key::SymbolKey;
use crate::access::signature::MethodSignature;
use crate::bytecode::ClassFile;
use crate::config::config::SandboxConfig;
use crate::config::types::{EvaluationStatus, SandboxError};
use crate::config::validator::validate_config;
use crate::core::environment::ForkedExecutionEnvironment;
use crate::exec::evaluation::{Evaluation, EvaluationComponent, EvaluationReport};
use crate::kernel::signal::SignalHandler;
use crate::store::{CodeStore, CompiledUnit, SandboxCodeStore};
use crate::verdict::classify;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Policy file, overrides the one named in the config
    #[arg(long, global = true)]
    policy: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the policy whether symbols are permitted
    Check {
        /// Symbols such as `java.lang.String` or `java.lang.Math#max(int,int):int`
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Validate class files against the policy without running them
    Scan {
        /// Class files, validated as one batch
        #[arg(required = true)]
        classes: Vec<PathBuf>,
    },
    /// Install class files into a child runtime and run an entry point
    Run {
        #[arg(required = true)]
        classes: Vec<PathBuf>,
        /// Entry point as `Class#method`
        #[arg(long)]
        entry: Option<String>,
        /// Execution timeout in milliseconds, overrides the config
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Validate the configuration and print problems
    CheckConfig,
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SandboxConfig::load_from_file(path)?,
        None => SandboxConfig::default(),
    };
    if let Some(policy) = &cli.policy {
        config.sandbox.policy_file = Some(policy.clone());
    }

    match cli.command {
        Commands::Check { symbols } => check_symbols(&config, &symbols),
        Commands::Scan { classes } => scan_classes(&config, &classes),
        Commands::Run {
            classes,
            entry,
            timeout_ms,
        } => {
            if let Some(timeout_ms) = timeout_ms {
                config.timeouts.execution_ms = timeout_ms;
            }
            run_classes(&config, &classes, entry.as_deref())
        }
        Commands::CheckConfig => check_config(&config),
    }
}

fn check_symbols(config: &SandboxConfig, symbols: &[String]) -> Result<()> {
    let graph = config.policy_graph()?;
    let mut all_permitted = true;
    for symbol in symbols {
        let permitted = is_symbol_permitted(&graph, symbol)?;
        all_permitted &= permitted;
        println!(
            "{}\t{}",
            if permitted { "PERMITTED" } else { "DENIED" },
            symbol
        );
    }
    if !all_permitted {
        std::process::exit(1);
    }
    Ok(())
}

/// Full method signatures go through overload matching, everything else is
/// looked up as a path
fn is_symbol_permitted(graph: &PermissionGraph, symbol: &str) -> Result<bool> {
    let key = SymbolKey::infer(symbol);
    if key.denotes_method() && (symbol.contains('(') || symbol.contains(':')) {
        let signature = MethodSignature::parse(symbol)
            .with_context(|| format!("invalid method signature {}", symbol))?;
        return Ok(graph.is_method_permitted(&signature));
    }
    Ok(graph.is_permitted(&key))
}

fn read_units(paths: &[PathBuf]) -> Result<Vec<CompiledUnit>> {
    paths.iter().map(|path| read_unit(path)).collect()
}

fn read_unit(path: &Path) -> Result<CompiledUnit> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = ClassFile::parse(&bytes)
        .map(|class| class.dotted_name())
        .with_context(|| format!("{} is not a class file", path.display()))?;
    Ok(CompiledUnit::new(name, bytes))
}

fn scan_classes(config: &SandboxConfig, paths: &[PathBuf]) -> Result<()> {
    let units = read_units(paths)?;
    let store = SandboxCodeStore::for_graph(config.policy_graph()?);
    match store.load(&units) {
        Ok(outcomes) => {
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
            Ok(())
        }
        Err(e @ SandboxError::InstallRejected(_)) => {
            let (_, errors) = classify(&e, "scan");
            println!("{}", serde_json::to_string_pretty(&errors)?);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn run_classes(config: &SandboxConfig, paths: &[PathBuf], entry: Option<&str>) -> Result<()> {
    let signals = SignalHandler::init().map_err(|e| anyhow::anyhow!(e))?;
    let validation = validate_config(config)?;
    for warning in &validation.warnings {
        log::warn!("{}", warning);
    }
    if !validation.is_valid() {
        for error in &validation.errors {
            eprintln!("config error: {}", error);
        }
        std::process::exit(2);
    }

    let units = read_units(paths)?;
    let mut component = EvaluationComponent::new("main", units);
    if let Some(entry) = entry {
        let (class_name, method) = entry
            .split_once('#')
            .ok_or_else(|| anyhow::anyhow!("entry point must be Class#method: {}", entry))?;
        component = component.with_entry_point(class_name, method);
    }

    let environment = ForkedExecutionEnvironment::from_config(config)?;
    let evaluation = Evaluation::start(&environment)?;

    let finished = Arc::new(AtomicBool::new(false));
    let watcher = {
        let finished = Arc::clone(&finished);
        let stop = evaluation.stop_handle();
        std::thread::spawn(move || {
            while !finished.load(Ordering::SeqCst) {
                if signals.wait_for_signal(Duration::from_millis(100)) {
                    log::warn!("Signal {} received, stopping evaluation", signals.get_signal());
                    stop.stop();
                    return;
                }
            }
        })
    };

    let reports = evaluation.evaluate_all(std::slice::from_ref(&component));
    finished.store(true, Ordering::SeqCst);
    let _ = watcher.join();
    evaluation.close();

    println!("{}", serde_json::to_string_pretty(&reports)?);
    if !all_completed(&reports) {
        std::process::exit(1);
    }
    Ok(())
}

fn all_completed(reports: &[EvaluationReport]) -> bool {
    reports
        .iter()
        .all(|report| report.status == EvaluationStatus::Completed)
}

fn check_config(config: &SandboxConfig) -> Result<()> {
    let result = validate_config(config)?;
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &result.errors {
        println!("error: {}", error);
    }
    if !result.is_valid() {
        std::process::exit(2);
    }
    println!("config OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_symbol_lookup_forms() {
        let graph = PermissionGraph::of([
            "java.lang",
            "!java.lang.System#exit",
            "java.lang.Math#max(int,int):int",
        ])
        .unwrap();
        assert!(is_symbol_permitted(&graph, "java.lang.String").unwrap());
        assert!(!is_symbol_permitted(&graph, "java.lang.System#exit").unwrap());
        assert!(is_symbol_permitted(&graph, "java.lang.Math#max(int,int):int").unwrap());
        assert!(is_symbol_permitted(&graph, "java.lang.Math#max(int,int").is_err());
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "snipbox",
            "--policy",
            "policy.txt",
            "run",
            "A.class",
            "--entry",
            "A#run",
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        assert_eq!(cli.policy, Some(PathBuf::from("policy.txt")));
        assert!(matches!(
            cli.command,
            Commands::Run { ref classes, ref entry, timeout_ms: Some(500) }
                if classes.len() == 1 && entry.as_deref() == Some("A#run")
        ));
    }
}
