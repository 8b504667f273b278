use std::path::Path;

use anyhow::Context;
use colored::Colorize;

use pmobj_cache::CacheConfig;

use crate::cli::*;
use crate::workload::{self, WorkloadConfig, WorkloadReport};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Config(args) => cmd_config(args, cli.format),
        Command::Check(args) => cmd_check(args),
        Command::Bench(args) => cmd_bench(args, cli.format),
    }
}

fn load_cache_config(path: Option<&Path>) -> anyhow::Result<CacheConfig> {
    match path {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("loading cache config {}", path.display())),
        None => Ok(CacheConfig::default()),
    }
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_cache_config(args.file.as_deref())?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Toml => print!("{}", toml::to_string_pretty(&config)?),
        OutputFormat::Text => {
            println!("{} = {}", "capacity_bits".bold(), config.capacity_bits);
            println!("{} = {}", "capacity".bold(), config.capacity());
            println!("{} = {}", "evict_on_failure".bold(), config.evict_on_failure);
        }
    }
    Ok(())
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let source = args
        .file
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".into());
    match load_cache_config(args.file.as_deref()) {
        Ok(config) => {
            println!(
                "{} {} is valid ({} objects)",
                "✓".green().bold(),
                source.bold(),
                config.capacity()
            );
            Ok(())
        }
        Err(err) => {
            println!("{} {}: {:#}", "✗".red().bold(), source.bold(), err);
            Err(err)
        }
    }
}

fn cmd_bench(args: BenchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let cache_config = load_cache_config(args.config.as_deref())?;
    let mut workload = match args.workload.as_deref() {
        Some(path) => WorkloadConfig::load(path)?,
        None => WorkloadConfig::default(),
    };
    if let Some(threads) = args.threads {
        workload.threads = threads;
    }
    if let Some(ops) = args.ops {
        workload.operations = ops;
    }
    if let Some(objects) = args.objects {
        workload.objects = objects;
    }
    if let Some(seed) = args.seed {
        workload.seed = seed;
    }

    let report = workload::run(&cache_config, &workload)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Toml => print!("{}", toml::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&workload, &report),
    }
    Ok(())
}

fn print_report(workload: &WorkloadConfig, report: &WorkloadReport) {
    println!(
        "{} {} ops on {} threads in {:.2?} ({:.0} ops/s)",
        "✓".green().bold(),
        report.total_ops().to_string().bold(),
        workload.threads,
        report.elapsed,
        report.ops_per_sec()
    );
    println!("  holds:       {}", report.holds.to_string().green());
    println!("  not exist:   {}", report.not_exist);
    println!("  conflicts:   {}", report.conflicts.to_string().yellow());
    println!("  restarts:    {}", report.restarts.to_string().yellow());
    println!("  uncertain:   {}", report.uncertain);
    println!("  exhausted:   {}", report.exhausted.to_string().red());
    if report.other_errors > 0 {
        println!("  other:       {}", report.other_errors.to_string().red().bold());
    }
    println!("  discarded:   {} ilog events", report.discarded_events);
    let cache = &report.cache;
    println!(
        "  cache:       {}/{} entries, {} hits, {} misses, {} evictions",
        cache.entries, cache.capacity, cache.hits, cache.misses, cache.evictions
    );
}
