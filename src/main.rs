//! doe-navigator CLI
//!
//! One subcommand per step of a campaign round.
//!
//! # Usage
//!
//! ```bash
//! # Build the pool from a design
//! doe-navigator --experiment-dir exp init design.yaml
//!
//! # Run a cycle
//! doe-navigator --experiment-dir exp cycle cycle_0.yaml
//!
//! # Register the cycle's points, fold in lab results, extract for the next cycle
//! doe-navigator --experiment-dir exp append cycle_0.yaml
//! doe-navigator --experiment-dir exp update cycle_0.yaml
//! doe-navigator --experiment-dir exp extract cycle_0.yaml --mapping phases.json
//!
//! # Entropy shifts over cycles 1..=4
//! doe-navigator --experiment-dir exp convergence robot001 --last 4
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use doe_navigator::campaign::Campaign;
use doe_navigator::config::{CampaignPaths, CycleConfig, PhaseMapping};
use doe_navigator::convergence::{consecutive_shifts, load_cycle_entropies, DEFAULT_BAND};
use doe_navigator::cycle::CycleController;
use doe_navigator::design::{build_pool, DesignSpec};
use doe_navigator::search_space::SearchSpace;

#[derive(Parser, Debug)]
#[command(name = "doe-navigator", version, about = "Active-learning cycles for DoE campaigns")]
struct Cli {
    /// Campaign root (holds `dataset/` and `cycles/`)
    #[arg(long, global = true, default_value = ".")]
    experiment_dir: PathBuf,

    /// Ledger directory [default: <experiment-dir>/master]
    #[arg(long, global = true)]
    master_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the pool from a design file
    Init {
        /// Design (YAML or JSON)
        design: PathBuf,
        /// Pool with existing evidence to put first
        #[arg(long)]
        existing: Option<PathBuf>,
    },
    /// Run one cycle
    Cycle {
        /// Cycle config (YAML or JSON)
        config: PathBuf,
    },
    /// Append a cycle's selected points to a new ledger version
    Append {
        /// Cycle config (YAML or JSON)
        config: PathBuf,
        /// Value for every empty ledger cell
        #[arg(long)]
        fill_value: Option<String>,
    },
    /// Fold a cycle's lab results into the latest ledger version
    Update {
        /// Cycle config (YAML or JSON)
        config: PathBuf,
    },
    /// Extract a cycle's validated points for the next cycle
    Extract {
        /// Cycle config (YAML or JSON)
        config: PathBuf,
        /// JSON object mapping raw result codes to class indices
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Entropy shifts between consecutive cycles
    Convergence {
        /// Campaign identifier
        experiment_id: String,
        /// Last cycle to include (cycles 1..=last are read)
        #[arg(long)]
        last: u32,
        /// Half-width of the no-change band
        #[arg(long, default_value_t = DEFAULT_BAND)]
        band: f64,
        /// Round entropies to this many decimals
        #[arg(long, default_value_t = 2)]
        decimals: u32,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let master_dir = cli
        .master_dir
        .clone()
        .unwrap_or_else(|| cli.experiment_dir.join("master"));
    let paths = CampaignPaths::new(&cli.experiment_dir, master_dir);

    match cli.command {
        Command::Init { design, existing } => {
            let spec = DesignSpec::from_path(&design)
                .with_context(|| format!("reading design {}", design.display()))?;
            let existing = existing
                .map(|path| SearchSpace::load(path, spec.labels.clone()))
                .transpose()?;
            let pool = build_pool(&spec, existing.as_ref())?;
            let dataset = paths.dataset_dir();
            std::fs::create_dir_all(&dataset)?;
            let out = dataset.join(spec.pool_file_name());
            pool.save(&out)?;
            info!(path = %out.display(), points = pool.len(), "wrote pool");
        }
        Command::Cycle { config } => {
            let config = load_config(&config)?;
            let outcome = CycleController::new(config, paths)?.run()?;
            for (index, barcode) in outcome
                .selection
                .acquisition
                .indices
                .iter()
                .zip(&outcome.barcodes)
            {
                println!("{index}\t{barcode}");
            }
        }
        Command::Append { config, fill_value } => {
            let config = load_config(&config)?;
            let version = campaign(&config, paths).append_cycle(config.cycle, fill_value.as_deref())?;
            println!("ledger version {version}");
        }
        Command::Update { config } => {
            let config = load_config(&config)?;
            let (version, report) = campaign(&config, paths).update_from_lab(config.cycle)?;
            println!(
                "ledger version {version}: {} rows updated, {} unmatched",
                report.updated.len(),
                report.unmatched.len()
            );
        }
        Command::Extract { config, mapping } => {
            let config = load_config(&config)?;
            let mapping = mapping
                .map(|path| PhaseMapping::from_path(&path))
                .transpose()
                .context("reading phase mapping")?
                .unwrap_or_default();
            let pool = SearchSpace::load(paths.search_space(&config), config.labels.clone())?;
            let out = campaign(&config, paths.clone()).extract_cycle_validated(
                config.cycle,
                pool.feature_names(),
                &config.labels.target,
                &mapping,
            )?;
            println!("{}", out.display());
        }
        Command::Convergence {
            experiment_id,
            last,
            band,
            decimals,
        } => {
            let cycles: Vec<u32> = (1..=last).collect();
            let entropies = load_cycle_entropies(&paths, &experiment_id, &cycles, Some(decimals))?;
            for shift in consecutive_shifts(&entropies, band)? {
                println!(
                    "{} -> {}\tdecreased {:.3}\tincreased {:.3}",
                    shift.from, shift.to, shift.decreased, shift.increased
                );
            }
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<CycleConfig> {
    CycleConfig::from_path(path).with_context(|| format!("reading cycle config {}", path.display()))
}

fn campaign(config: &CycleConfig, paths: CampaignPaths) -> Campaign {
    Campaign::new(paths, &config.experiment_id, &config.identifier_column)
}
