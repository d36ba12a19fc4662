//! DistLaunch CLI - one training process per local accelerator device

use clap::Parser;
use distlaunch::config::{CliArgs, Commands, LaunchConfig, StopSignal, USAGE};
use distlaunch::core::{LaunchManifest, Launcher};
use distlaunch::error::{LaunchError, Result};
use distlaunch::progress::LaunchProgress;
use distlaunch::system::HostInfo;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = match args.verbose {
        0 if args.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Handle result
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(LaunchError::Usage(count)) => {
            tracing::debug!(count, "bad positional argument count");
            println!("{}", USAGE);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_preflight() {
                eprintln!("No workspace was staged and no worker was started.");
            } else {
                let mut cause = std::error::Error::source(&e);
                while let Some(inner) = cause {
                    eprintln!("  caused by: {}", inner);
                    cause = std::error::Error::source(inner);
                }
            }
            std::process::exit(1);
        }
    }
}

fn run(args: CliArgs) -> Result<i32> {
    // Handle subcommands
    if let Some(command) = &args.command {
        return handle_command(command).map(|_| 0);
    }

    let cwd = std::env::current_dir().map_err(|e| LaunchError::io(".", e))?;
    let config = LaunchConfig::from_cli(&args, &cwd)?;

    // Print configuration if verbose
    if args.verbose > 0 && !args.quiet {
        HostInfo::collect().print_summary();
        print_config(&config);
    }

    let progress = if args.quiet || config.dry_run {
        LaunchProgress::disabled()
    } else {
        LaunchProgress::new()
    };
    let launcher = Launcher::new(config).with_progress(progress);

    if launcher.config().dry_run {
        println!("=== Dry Run Mode ===");
        println!("No workspaces will be created and no workers started.");
        println!();
        launcher.plan()?.print();
        return Ok(0);
    }

    let launch = launcher.launch()?;

    if !args.quiet {
        launch.print_summary();
    }

    if !launcher.config().wait {
        let pids = launch.group.detach();
        if !args.quiet {
            let pids: Vec<String> = pids.iter().map(|pid| pid.to_string()).collect();
            println!("Detached workers: {}", pids.join(" "));
        }
        return Ok(0);
    }

    let report = launch.group.wait_all(launcher.progress());
    if !args.quiet {
        report.print_summary();
    }

    Ok(if report.is_success() { 0 } else { 1 })
}

fn handle_command(command: &Commands) -> Result<()> {
    match command {
        Commands::Status { manifest } => cmd_status(manifest),
        Commands::Stop { manifest, signal } => cmd_stop(manifest, *signal),
    }
}

fn cmd_status(manifest_path: &Path) -> Result<()> {
    let manifest = LaunchManifest::load(manifest_path)?;
    manifest.print_status();
    Ok(())
}

fn cmd_stop(manifest_path: &Path, signal: StopSignal) -> Result<()> {
    let manifest = LaunchManifest::load(manifest_path)?;
    let signalled = manifest.signal_all(signal)?;
    println!(
        "Signalled {} of {} workers ({:?})",
        signalled,
        manifest.workers.len(),
        signal
    );
    Ok(())
}

fn print_config(config: &LaunchConfig) {
    println!("=== Configuration ===");
    println!("Config:      {}", config.paths.config.display());
    println!("Data:        {}", config.paths.data.display());
    println!("Hyp:         {}", config.paths.hyp.display());
    println!("Rank table:  {}", config.paths.rank_table.display());
    println!("Source root: {}", config.source_root.display());
    println!("Work root:   {}", config.work_root.display());
    println!("Devices:     {}", config.device_num);
    println!("Program:     {} {}", config.program, config.script);
    match config.cpus {
        Some(cpus) => println!("CPUs:        {} (override)", cpus),
        None => println!("CPUs:        auto"),
    }
    println!("CPU policy:  {:?}", config.cpu_policy);
    println!("Pin CPUs:    {}", config.pin_cpus);
    println!("Wait:        {}", config.wait);
    println!();
}
