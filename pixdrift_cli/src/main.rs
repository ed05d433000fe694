use pixdrift_core::campaign::{Campaign, CampaignStats, seeded_rng};
use pixdrift_core::config::PixdriftConfig;
use pixdrift_core::format::FormatTag;
use pixdrift_core::mutator::{ModeMutator, MutationMode};
use pixdrift_core::oracle::OracleStrength;
use pixdrift_core::population::Population;
use pixdrift_core::seed::{SeedConstraints, provider_for, write_seed_files};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing::subscriber::set_global_default;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "pixdrift.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration. Defaults to ./pixdrift.toml when present.
    #[clap(short, long, value_parser, global = true)]
    config: Option<PathBuf>,
    /// Oracle strength: open or verify. Defaults to open for bit mode and
    /// verify for byte mode.
    #[clap(long, global = true)]
    oracle: Option<OracleStrength>,
    /// Fixed generator seed for a reproducible run.
    #[clap(long, global = true)]
    rng_seed: Option<u64>,
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[clap(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate seed images, then run a campaign seeded with them.
    Generate {
        /// bmp or png
        format: FormatTag,
        #[clap(value_parser = clap::value_parser!(u64).range(1..))]
        num_files: u64,
        output_dir: Option<PathBuf>,
        /// bit or byte
        mutation_mode: Option<MutationMode>,
        num_mutations: Option<u64>,
    },
    /// Run a campaign against existing seed files or directories of seeds.
    Fuzz {
        /// bit or byte
        mutation_mode: MutationMode,
        num_mutations: u64,
        output_dir: PathBuf,
        #[clap(required = true)]
        seeds: Vec<PathBuf>,
        /// Format of the seeds. Taken from the first seed's extension if omitted.
        #[clap(long)]
        format: Option<FormatTag>,
    },
}

fn init_tracing(verbose: u8) -> Result<(), anyhow::Error> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber_builder =
        tracing_subscriber::fmt::Subscriber::builder().with_env_filter(env_filter);
    let subscriber = subscriber_builder.with_writer(std::io::stderr).finish();
    set_global_default(subscriber).context("Failed to set subscriber")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PixdriftConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            info!("Loading configuration from {}", config_path.display());
            Ok(PixdriftConfig::load_from_file(config_path)?)
        }
        None => {
            let default_config_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!("Loading default configuration {DEFAULT_CONFIG_FILE}");
                Ok(PixdriftConfig::load_from_file(default_config_path)?)
            } else {
                info!("No {DEFAULT_CONFIG_FILE} found, using built-in defaults");
                Ok(PixdriftConfig::default())
            }
        }
    }
}

/// Command line beats configuration; with neither, the mode decides.
fn effective_oracle(
    requested: Option<OracleStrength>,
    config: &PixdriftConfig,
    mode: MutationMode,
) -> OracleStrength {
    requested.unwrap_or_else(|| config.fuzzer.oracle_for(mode))
}

struct CampaignPlan {
    format: FormatTag,
    mode: MutationMode,
    oracle: OracleStrength,
    iterations: u64,
    working_dir: PathBuf,
}

fn run_campaign(
    plan: &CampaignPlan,
    config: &PixdriftConfig,
    seeds: &[PathBuf],
    rng: ChaCha8Rng,
) -> Result<CampaignStats, anyhow::Error> {
    let population = Population::new(&plan.working_dir, plan.format, seeds)
        .context("Failed to set up the population")?;
    let oracle = plan.oracle.build(population.format(), config.limits);
    info!(
        "Fuzzing {} in {} mode with the {} oracle",
        population.format(),
        plan.mode,
        plan.oracle
    );
    let mut campaign = Campaign::new(population, ModeMutator::new(plan.mode), oracle, rng);

    let start_time = Instant::now();
    let stats = campaign.run(plan.iterations);
    let population = campaign.into_population();
    println!(
        "Campaign finished in {:.2?}: {} iterations, {} accepted, {} rejected, {} skipped.",
        start_time.elapsed(),
        stats.iterations,
        stats.accepted,
        stats.rejected,
        stats.skipped
    );
    println!(
        "Population: {} members ({} seeds) in {}",
        population.len(),
        population.seed_count(),
        population.working_dir().display()
    );
    Ok(stats)
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let config = load_config(cli.config.as_deref())?;
    let rng_seed = cli.rng_seed.or(config.fuzzer.rng_seed);

    match cli.command {
        Command::Generate {
            format,
            num_files,
            output_dir,
            mutation_mode,
            num_mutations,
        } => {
            let constraints = config
                .seeds
                .apply_to(SeedConstraints::for_format(format))?;
            let count = usize::try_from(num_files).context("NUM_FILES is too large")?;
            let mode = mutation_mode.unwrap_or(config.fuzzer.mode);
            let plan = CampaignPlan {
                format,
                mode,
                oracle: effective_oracle(cli.oracle, &config, mode),
                iterations: num_mutations.unwrap_or(config.fuzzer.iterations),
                working_dir: output_dir.unwrap_or_else(|| config.fuzzer.working_dir.clone()),
            };

            let mut rng = seeded_rng(rng_seed);
            let provider = provider_for(format);
            let seeds = write_seed_files(
                provider.as_ref(),
                &constraints,
                count,
                &plan.working_dir,
                &mut rng,
            )?;
            run_campaign(&plan, &config, &seeds, rng)?;
        }
        Command::Fuzz {
            mutation_mode,
            num_mutations,
            output_dir,
            seeds,
            format,
        } => {
            let format = match (format, seeds.first()) {
                (Some(format), _) => format,
                (None, Some(first)) => FormatTag::from_path(first)?,
                (None, None) => return Err(pixdrift_core::config::ConfigError::NoSeeds.into()),
            };
            let plan = CampaignPlan {
                format,
                mode: mutation_mode,
                oracle: effective_oracle(cli.oracle, &config, mutation_mode),
                iterations: num_mutations,
                working_dir: output_dir,
            };
            run_campaign(&plan, &config, &seeds, seeded_rng(rng_seed))?;
        }
    }
    Ok(())
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
    fn generate_arguments_parse_in_order() {
        let cli = Cli::try_parse_from([
            "pixdrift", "generate", "png", "3", "out", "byte", "250", "--oracle", "verify",
        ])
        .unwrap();
        assert_eq!(cli.oracle, Some(OracleStrength::Verify));
        match cli.command {
            Command::Generate {
                format,
                num_files,
                output_dir,
                mutation_mode,
                num_mutations,
            } => {
                assert_eq!(format, FormatTag::Png);
                assert_eq!(num_files, 3);
                assert_eq!(output_dir, Some(PathBuf::from("out")));
                assert_eq!(mutation_mode, Some(MutationMode::Byte));
                assert_eq!(num_mutations, Some(250));
            }
            other => panic!("Expected Generate, got {other:?}"),
        }
    }

    #[test]
    fn fuzz_accepts_several_seeds() {
        let cli = Cli::try_parse_from([
            "pixdrift", "fuzz", "bit", "10", "out", "a.bmp", "b.bmp", "--rng-seed", "7",
        ])
        .unwrap();
        assert_eq!(cli.rng_seed, Some(7));
        match cli.command {
            Command::Fuzz { seeds, format, .. } => {
                assert_eq!(seeds, [PathBuf::from("a.bmp"), PathBuf::from("b.bmp")]);
                assert_eq!(format, None);
            }
            other => panic!("Expected Fuzz, got {other:?}"),
        }
    }

    #[test]
    fn oracle_defaults_to_the_mode_unless_chosen() {
        let config = PixdriftConfig::default();
        assert_eq!(
            effective_oracle(None, &config, MutationMode::Byte),
            OracleStrength::Verify
        );
        assert_eq!(
            effective_oracle(None, &config, MutationMode::Bit),
            OracleStrength::Open
        );

        let config = PixdriftConfig::from_toml_str("[fuzzer]\noracle = \"open\"").unwrap();
        assert_eq!(
            effective_oracle(None, &config, MutationMode::Byte),
            OracleStrength::Open
        );
        assert_eq!(
            effective_oracle(Some(OracleStrength::Verify), &config, MutationMode::Bit),
            OracleStrength::Verify
        );
    }

    #[test]
    fn malformed_arguments_are_usage_errors() {
        assert!(Cli::try_parse_from(["pixdrift", "generate", "gif", "3"]).is_err());
        assert!(Cli::try_parse_from(["pixdrift", "generate", "png", "0"]).is_err());
        assert!(Cli::try_parse_from(["pixdrift", "fuzz", "nibble", "10", "out", "a.png"]).is_err());
        assert!(Cli::try_parse_from(["pixdrift", "fuzz", "bit", "10", "out"]).is_err());
    }
}
