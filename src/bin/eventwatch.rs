//! Filesystem monitor (eventwatch) - Main binary entry point

use eventwatch::cli::args::{CheckArgs, Command, OnceArgs, parse_args};
use eventwatch::cli::output::{format_json, format_text};
use eventwatch::config::load_watch_groups;
use eventwatch::{
    LogDiagnostics, MemoryStore, Monitor, ParquetStore, RuleEngine, SampleStore, SystemClock,
    run_groups,
};
use std::io::IsTerminal;
use std::process;
use std::sync::Arc;

fn main() {
    // Initialize logger (controlled by RUST_LOG environment variable)
    // Example: RUST_LOG=debug eventwatch once groups.json
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "--help" | "-h" => {
            print_help();
            return;
        }
        "--version" | "-v" => {
            print_version();
            return;
        }
        _ => {}
    }

    let cli_args = match parse_args(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Use --help for usage information");
            process::exit(2);
        }
    };

    let exit_code = match &cli_args.command {
        Command::Once(once_args) => handle_once(once_args),
        Command::Check(check_args) => handle_check(check_args),
    };

    process::exit(exit_code);
}

fn handle_once(args: &OnceArgs) -> i32 {
    let groups = match load_watch_groups(&args.config) {
        Ok(groups) => groups,
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };
    if groups.is_empty() {
        eprintln!("Error: no watch groups defined in {}", args.config);
        return 2;
    }

    let store: Box<dyn SampleStore> = match &args.store {
        Some(dir) => Box::new(ParquetStore::new(dir)),
        None => Box::new(MemoryStore::new()),
    };

    let clock = Arc::new(SystemClock);
    let mut monitors = Vec::with_capacity(groups.len());
    for group in groups {
        let name = group.name.clone();
        let mut monitor = match Monitor::new(group, clock.clone()) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Error: watch group '{name}': {e}");
                return 2;
            }
        };
        if let Err(e) = monitor.restore(store.as_ref()) {
            eprintln!("Warning: cannot restore '{name}', starting from baseline: {e}");
        }
        monitors.push(monitor);
    }

    if !args.quiet {
        eprintln!("Running one cycle for {} watch group(s)", monitors.len());
    }

    let results = run_groups(&mut monitors, store.as_ref(), &LogDiagnostics);

    let mut reports = Vec::with_capacity(results.len());
    let mut failed = 0;
    for (monitor, result) in monitors.iter().zip(results) {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                eprintln!("Error: cycle for '{}' failed: {e}", monitor.name());
                failed += 1;
            }
        }
    }

    if args.json {
        println!("{}", format_json(&reports));
    } else {
        let color = std::io::stdout().is_terminal();
        for report in &reports {
            format_text(report, color);
        }
    }

    if failed == 0 {
        0 // Success
    } else {
        3 // Partial failure
    }
}

fn handle_check(args: &CheckArgs) -> i32 {
    let groups = match load_watch_groups(&args.config) {
        Ok(groups) => groups,
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };

    let mut rejected = 0;
    for group in &groups {
        let engine = RuleEngine::new(&group.rules);
        println!(
            "{}: {} item(s), {} rule(s) compiled",
            group.name,
            group.watch_items.len(),
            engine.rules().len()
        );
        for diagnostic in engine.compile_diagnostics() {
            println!("  ! {diagnostic}");
            rejected += 1;
        }
    }

    if rejected == 0 { 0 } else { 1 }
}

fn print_help() {
    println!("eventwatch - Sample files and directories, diff snapshots, and raise rule events");
    println!();
    println!("USAGE:");
    println!("    eventwatch once <CONFIG> [OPTIONS]");
    println!("    eventwatch check <CONFIG>");
    println!();
    println!("COMMANDS:");
    println!("    once      Run one monitoring cycle per watch group and print events");
    println!("    check     Validate configuration and compile every rule");
    println!();
    println!("GLOBAL OPTIONS:");
    println!("    -h, --help                 Show this help message");
    println!("    -v, --version              Show version information");
    println!();
    println!("ONCE OPTIONS:");
    println!("    --store <DIR>             Persist Parquet snapshots and events under DIR");
    println!("    --json                    Emit machine-readable output");
    println!("    --quiet                   Suppress non-error output");
    println!();
    println!("CONFIG:");
    println!("    A JSON file {{\"watch_groups\": [...]}} or a directory of such files.");
    println!();
    println!("EXAMPLES:");
    println!("    eventwatch check groups.json");
    println!("    eventwatch once groups.json --store /var/lib/eventwatch");
    println!("    RUST_LOG=debug eventwatch once conf.d/ --json");
}

fn print_version() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const GIT_DATE: &str = env!("GIT_DATE");
    const BUILD_TARGET: &str = env!("BUILD_TARGET");

    println!("eventwatch {VERSION}");
    println!("Commit: {GIT_HASH} ({GIT_DATE})");
    println!("Target: {BUILD_TARGET}");

    #[cfg(debug_assertions)]
    println!("Build: debug");
    #[cfg(not(debug_assertions))]
    println!("Build: release");
}
