#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

use dualreg::batch::{ConsoleBatchProgress, Hemisphere, RunConfigFile, run_batch};

#[derive(Clone, Copy, ValueEnum)]
pub enum HemisphereCli {
    #[value(name = "L")]
    L,
    #[value(name = "R")]
    R,
}

impl From<HemisphereCli> for Hemisphere {
    fn from(value: HemisphereCli) -> Self {
        match value {
            HemisphereCli::L => Hemisphere::L,
            HemisphereCli::R => Hemisphere::R,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Text file with one subject identifier per line
    #[arg(long)]
    pub subject_list: Option<PathBuf>,

    /// Directory holding each subject's time series as <subject><extension>
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// TSV file of group ICA components (locations x components)
    #[arg(long)]
    pub group_components: Option<PathBuf>,

    /// Suffix appended to each subject identifier to locate its time series
    #[arg(long)]
    pub extension: Option<String>,

    /// Directory to write subject outputs and the run manifest into
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Base name inserted into every output file name
    #[arg(long)]
    pub out_base: Option<String>,

    /// Hemisphere the surface data belongs to
    #[arg(long, value_enum)]
    pub hemisphere: Option<HemisphereCli>,

    /// Zero spatial betas whose confidence interval includes zero
    #[arg(long)]
    pub confidence: bool,

    /// Significance level for --confidence (default 0.05)
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Number of worker threads (default: all logical CPUs)
    #[arg(long)]
    pub threads: Option<usize>,

    /// TOML file supplying any of the settings above; command-line values win
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    fn into_overrides(self) -> (Option<PathBuf>, RunConfigFile) {
        let overrides = RunConfigFile {
            subject_list: self.subject_list,
            data_dir: self.data_dir,
            group_components: self.group_components,
            extension: self.extension,
            out_dir: self.out_dir,
            out_base: self.out_base,
            hemisphere: self.hemisphere.map(Hemisphere::from),
            // An absent flag must not override `confidence = true` in a config file.
            confidence: self.confidence.then_some(true),
            alpha: self.alpha,
            threads: self.threads,
        };
        (self.config, overrides)
    }
}

#[derive(Parser)]
#[command(
    name = "dualreg",
    about = "Dual regression of group ICA components onto subject fMRI time series",
    long_about = "Estimates subject-specific time courses and spatial maps for every \
                 subject in a list by regressing their time series against a shared \
                 set of group ICA components, optionally thresholding the maps by \
                 confidence interval."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run dual regression over a list of subjects
    #[command(about = "Run dual regression (outputs: *.Spatial.tsv, *.Time.tsv, run manifest)")]
    Run(RunArgs),

    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
                process::exit(1);
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, overrides) = args.into_overrides();
    let base = match config_path {
        Some(path) => {
            log::info!("Reading settings from '{}'", path.display());
            RunConfigFile::load(&path)?
        }
        None => RunConfigFile::default(),
    };
    let config = base.overlay(overrides).resolve()?;

    let progress = ConsoleBatchProgress::new();
    let report = run_batch(&config, &progress)?;

    println!(
        "Processed {} subjects: {} completed, {} skipped, {} failed.",
        report.outcomes.len(),
        report.completed(),
        report.skipped(),
        report.failed()
    );
    println!("Outputs written to '{}'.", config.out_dir.display());

    report.into_result()?;
    Ok(())
}

fn print_version_info() {
    println!("dualreg {}", env!("CARGO_PKG_VERSION"));
}
