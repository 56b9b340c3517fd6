use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use headfit::batch::{self, FailurePolicy, JobOutcome};
use headfit::config::OptionOverrides;
use headfit::{EngineKind, InterpolationMode, MeasurementInput, RescaleJob, RescaleOptions, Rescaler};

/// Rescale a brain template to individual head measurements.
#[derive(Debug, Parser)]
#[command(name = "headfit", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log intermediate values.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    overrides: Overrides,
}

/// Options that override the loaded configuration.
#[derive(Debug, Args)]
struct Overrides {
    /// Template volume (.nii or .nii.gz).
    #[arg(long, global = true)]
    template: Option<PathBuf>,

    /// Root directory for per-subject outputs.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// nearest, linear or spline.
    #[arg(long, global = true)]
    interpolation: Option<InterpolationMode>,

    /// command (external program) or header (in-process).
    #[arg(long, global = true)]
    engine: Option<EngineKind>,

    /// External reslicing program.
    #[arg(long, global = true)]
    resampler: Option<PathBuf>,

    /// Reslice time limit in seconds; 0 disables it.
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rescale the template for one subject.
    Rescale {
        /// Subject identifier; names the output directory.
        #[arg(long)]
        subject: String,
        /// Ear-to-ear width in cm.
        #[arg(long)]
        width: Option<f64>,
        /// Front-to-back depth in cm.
        #[arg(long)]
        depth: Option<f64>,
        /// Ear-to-vertex height in cm.
        #[arg(long)]
        height: Option<f64>,
    },
    /// Rescale the template for every subject in a JSON manifest.
    Batch {
        /// Array of {subject_id, width, depth, height} objects.
        manifest: PathBuf,
        /// Keep going after a subject fails.
        #[arg(long)]
        continue_on_error: bool,
    },
}

impl Overrides {
    fn apply(&self, options: &mut RescaleOptions) {
        options.apply_overrides(OptionOverrides {
            template_path: self.template.clone(),
            output_dir: self.output_dir.clone(),
            interpolation: self.interpolation,
            engine: self.engine,
            resampler_location: self.resampler.clone(),
            resample_timeout_secs: self.timeout,
        });
    }
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(error) => {
            eprintln!("headfit error: {error:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let mut options = RescaleOptions::load().context("failed to load configuration")?;
    cli.overrides.apply(&mut options);
    tracing::debug!(?options, "effective options");

    match cli.command {
        Commands::Rescale {
            subject,
            width,
            depth,
            height,
        } => {
            let job = RescaleJob::new(
                subject,
                MeasurementInput {
                    width,
                    depth,
                    height,
                },
                &options,
            );
            job.validate()?;
            let rescaler = Rescaler::from_options(&options)?;
            let report = rescaler
                .run(&job)
                .with_context(|| format!("failed to rescale template for {}", job.subject_id))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{}: factors {} -> {}",
                    report.subject_id,
                    report.factors,
                    report.artifact.path.display()
                );
            }
            Ok(true)
        }
        Commands::Batch {
            manifest,
            continue_on_error,
        } => {
            let entries = batch::load_manifest(&manifest)
                .with_context(|| format!("failed to read {}", manifest.display()))?;
            let policy = if continue_on_error {
                FailurePolicy::Continue
            } else {
                FailurePolicy::Abort
            };
            let rescaler = Rescaler::from_options(&options)?;
            let result = batch::run_batch(&rescaler, &entries, &options, policy);

            if cli.json {
                let rows: Vec<_> = result
                    .outcomes
                    .iter()
                    .map(|(subject, outcome)| match outcome {
                        JobOutcome::Done(report) => serde_json::json!({
                            "subject_id": subject,
                            "status": "done",
                            "factors": report.factors,
                            "output": report.artifact.path,
                        }),
                        JobOutcome::Failed(e) => serde_json::json!({
                            "subject_id": subject,
                            "status": "failed",
                            "error": e.to_string(),
                        }),
                        JobOutcome::Skipped => serde_json::json!({
                            "subject_id": subject,
                            "status": "skipped",
                        }),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for (subject, outcome) in &result.outcomes {
                    match outcome {
                        JobOutcome::Done(report) => println!(
                            "{subject}: factors {} -> {}",
                            report.factors,
                            report.artifact.path.display()
                        ),
                        JobOutcome::Failed(e) => println!("{subject}: failed: {e}"),
                        JobOutcome::Skipped => println!("{subject}: skipped"),
                    }
                }
                println!(
                    "{} done, {} failed, {} skipped",
                    result.succeeded(),
                    result.failed(),
                    result.skipped()
                );
            }
            Ok(result.is_success())
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("HEADFIT_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn rescale_args_override_config() {
        let cli = Cli::try_parse_from([
            "headfit",
            "rescale",
            "--subject",
            "sub001",
            "--width",
            "14.5",
            "--depth",
            "19.2",
            "--height",
            "13.8",
            "--engine",
            "header",
            "--interpolation",
            "spline",
            "--output-dir",
            "/tmp/out",
        ])
        .unwrap();

        let mut options = RescaleOptions::default();
        cli.overrides.apply(&mut options);
        assert_eq!(options.engine, EngineKind::Header);
        assert_eq!(options.interpolation, InterpolationMode::Spline);
        assert_eq!(options.output_dir, PathBuf::from("/tmp/out"));
        assert!(matches!(cli.command, Commands::Rescale { depth: Some(_), .. }));
    }

    #[test]
    fn missing_measurement_parses_as_none() {
        let cli = Cli::try_parse_from([
            "headfit", "rescale", "--subject", "sub001", "--width", "14.5", "--height", "13.8",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Rescale { depth: None, .. }));
    }

    #[test]
    fn batch_flags() {
        let cli =
            Cli::try_parse_from(["headfit", "batch", "subjects.json", "--continue-on-error"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Batch {
                continue_on_error: true,
                ..
            }
        ));
    }
}
