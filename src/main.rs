use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cpu_hogs::config::{self, RunOptions};
use cpu_hogs::frequency::{self, CoreTarget};
use cpu_hogs::{Driver, LoadPlan, RunReport};

/// Keeps the given cores busy for a fixed share of wall time until
/// interrupted (SIGINT/SIGTERM) or until --duration elapses.
#[derive(Parser, Debug)]
#[command(name = "cpu-hogs", version, about = "Inject controllable per-core CPU load")]
struct Cli {
    /// Per-core targets: CORE:RATIO (busy share, 0.0-1.0) or CORE@KHZ (emulated
    /// frequency). A frequency is never written as CORE:FREQ
    #[arg(required_unless_present = "plan")]
    targets: Vec<CoreTarget>,

    /// Wake-up interval in seconds
    #[arg(short, long, default_value = "0.01")]
    interval: f64,

    /// Do not use cpufreq to look up maximum frequencies
    #[arg(short = 'p', long = "no-cpufreq")]
    no_cpufreq: bool,

    /// Let workers run their cycles independently instead of in lock-step
    #[arg(long)]
    no_sync: bool,

    /// Calibration target in seconds (default 2.0, or CPUHOGS_CALIBRATION_SECONDS)
    #[arg(long = "calibrate", value_name = "SECONDS")]
    calibration: Option<f64>,

    /// Keep workers in the normal scheduling class
    #[arg(long)]
    no_realtime: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    duration: Option<f64>,

    /// Read the load plan from a JSON file instead of targets
    #[arg(long, conflicts_with = "targets")]
    plan: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "cpu_hogs=debug" } else { "cpu_hogs=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let options = options(cli)?;
    let plan = match &cli.plan {
        Some(path) => load_plan(path)?,
        None => {
            let interval = config::seconds(cli.interval, "--interval")?;
            frequency::resolve(&cli.targets, interval, !cli.no_cpufreq)?
        }
    };

    let report = Driver::new(options).run(&plan)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn options(cli: &Cli) -> anyhow::Result<RunOptions> {
    let mut options = RunOptions::from_env()?;
    if cli.no_sync {
        options.sync = false;
    }
    if let Some(secs) = cli.calibration {
        options.calibration_target = config::seconds(secs, "--calibrate")?;
    }
    options.realtime = !cli.no_realtime;
    options.duration = cli
        .duration
        .map(|secs| config::seconds(secs, "--duration"))
        .transpose()?;
    Ok(options)
}

fn load_plan(path: &Path) -> anyhow::Result<LoadPlan> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read plan {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid plan {}", path.display()))
}

fn print_summary(report: &RunReport) {
    println!("loops per second = {}", report.loops_per_second);
    println!("ran for {:.2}s ({:?})", report.elapsed.as_secs_f64(), report.cause);
    for worker in &report.workers {
        println!(
            "CPU {}: {} cycles, busy {:.3}s, realized ratio {:.3}",
            worker.core,
            worker.cycles,
            worker.busy.as_secs_f64(),
            worker.realized_ratio()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "cpu-hogs",
            "--no-sync",
            "--no-realtime",
            "--calibrate",
            "0.5",
            "--duration",
            "3",
            "0:0.25",
        ]);
        let options = options(&cli).unwrap();
        assert!(!options.sync);
        assert!(!options.realtime);
        assert_eq!(options.calibration_target.as_millis(), 500);
        assert_eq!(options.duration.map(|d| d.as_secs()), Some(3));
        assert_eq!(cli.targets, vec![CoreTarget::Ratio { core: 0, ratio: 0.25 }]);
    }

    #[test]
    fn targets_or_plan_are_required() {
        assert!(Cli::try_parse_from(["cpu-hogs"]).is_err());
        assert!(Cli::try_parse_from(["cpu-hogs", "--plan", "plan.json"]).is_ok());
        assert!(Cli::try_parse_from(["cpu-hogs", "0:bogus"]).is_err());
    }
}
