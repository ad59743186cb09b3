use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nix::unistd::Uid;

use voltflow::access::{MappedRegion, MsrIo};
use voltflow::report::Reporter;
use voltflow::{tune, TuneConfig};
use voltflow_raw::msr::MsrHandle;
use voltflow_raw::rapl::{PowerDomain, POWER_DOMAINS};

#[derive(Parser, Debug)]
#[command(name = "voltflow")]
#[command(about = "Voltage offset and power limit tuning for Intel CPUs")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/voltflow.json",
        help = "Path to the tuning configuration"
    )]
    config: PathBuf,

    #[arg(
        long,
        global = true,
        default_value_t = 0,
        help = "CPU whose MSR device carries the register transactions"
    )]
    cpu: u32,

    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging (shows register transactions)"
    )]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report the current voltage offsets, power limits and thermal offset
    Read,

    /// Apply the configured values, then report what the hardware accepted
    Apply {
        #[arg(short, long, help = "Only print failures, skip value reports")]
        quiet: bool,
    },
}

fn check_permissions() {
    if !Uid::effective().is_root() {
        eprintln!("voltflow must run as root to access MSRs");
        process::exit(1);
    }

    let msr_path = "/dev/cpu/0/msr";
    if std::fs::metadata(msr_path).is_err() {
        eprintln!(
            "Cannot access {msr_path}\n\nThe MSR kernel module may not be loaded.\nRun: modprobe msr"
        );
        process::exit(1);
    }
}

/// Map the memory-mirror page of a domain, degrading to register-file
/// access when `/dev/mem` is restricted.
fn map_domain_mirror(domain: &PowerDomain) -> Option<MappedRegion> {
    if domain.mem_addr == 0 {
        return None;
    }
    match MappedRegion::open_phys(domain.mem_addr) {
        Ok(region) => Some(region),
        Err(e) => {
            tracing::warn!(
                "Memory-mapped mirror for the {} domain is unavailable: {e}",
                domain.name
            );
            None
        }
    }
}

fn run(msr: &dyn MsrIo, config: &TuneConfig, write: bool, reporter: &mut Reporter<'_>) -> bool {
    let mut ok = tune::apply_voltage_offsets(msr, &config.undervolt, write, reporter);

    for domain in &POWER_DOMAINS {
        let Some(request) = config.power.for_domain(domain.name) else {
            continue;
        };
        let mirror = map_domain_mirror(domain);
        ok &= tune::apply_power_limit(msr, domain, request, mirror.as_ref(), write, reporter);
    }

    if let Some(degrees) = config.tjoffset {
        ok &= tune::apply_thermal_offset(msr, degrees, write, reporter);
    }

    ok
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .init();

    check_permissions();

    let config = TuneConfig::load(&args.config)
        .with_context(|| format!("Cannot load configuration from {}", args.config.display()))?;

    let (write, show_values) = match args.command {
        Command::Read => (false, true),
        Command::Apply { quiet } => (true, !quiet),
    };

    let msr = MsrHandle::new(args.cpu).context("Cannot open the MSR device")?;
    tracing::debug!("Using the MSR device of CPU {}", msr.cpu());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut reporter = Reporter::new(&mut out, show_values);

    let ok = run(&msr, &config, write, &mut reporter);
    let _ = out.flush();

    if !ok {
        process::exit(1);
    }
    Ok(())
}
