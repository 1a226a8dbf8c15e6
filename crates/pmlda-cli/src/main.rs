//! `pmlda` command line entry point

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use pmlda_cli::commands::print_summary;
use pmlda_cli::{check_config, init_tracing, run, simulation_config, RunOptions};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("pmlda")
        .version(pmlda_core::VERSION)
        .about("Prefetching multilevel delayed-acceptance MCMC")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("run")
                .about("Sample the problem described by a configuration file")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON-lines chain output, overriding run.output"),
                )
                .arg(
                    Arg::new("resume")
                        .long("resume")
                        .value_parser(value_parser!(PathBuf))
                        .help("Start from the last state of a previous chain output"),
                )
                .arg(
                    Arg::new("chains")
                        .long("chains")
                        .value_parser(value_parser!(usize))
                        .help("Number of independent chains, overriding run.chains"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Sample a built-in synthetic problem")
                .arg(
                    Arg::new("levels")
                        .long("levels")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Number of fidelity levels"),
                )
                .arg(
                    Arg::new("samples")
                        .long("samples")
                        .default_value("1000")
                        .value_parser(value_parser!(usize))
                        .help("Chain length"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Evaluation workers"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON-lines chain output"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a configuration file and print it with defaults filled in")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                ),
        )
}

fn value<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => {
            let path: PathBuf = value(args, "config")?;
            let config = check_config(&path)?;
            let options = RunOptions {
                output: args.get_one::<PathBuf>("output").cloned(),
                resume: args.get_one::<PathBuf>("resume").cloned(),
                chains: args.get_one::<usize>("chains").copied(),
            };
            let summary = run(config, options).await?;
            print_summary(&summary);
        }
        Some(("simulate", args)) => {
            let levels: usize = value(args, "levels")?;
            let samples: usize = value(args, "samples")?;
            let workers: usize = value(args, "workers")?;
            let seed: u64 = value(args, "seed")?;

            println!("Levels: {levels}");
            println!("Samples: {samples}");
            println!("Workers: {workers}");
            println!("Seed: {seed}");
            println!();

            let config = simulation_config(levels, samples, workers, seed)?;
            let options = RunOptions {
                output: args.get_one::<PathBuf>("output").cloned(),
                ..RunOptions::default()
            };
            let summary = run(config, options).await?;
            print_summary(&summary);
        }
        Some(("check-config", args)) => {
            let path: PathBuf = value(args, "config")?;
            let config = check_config(&path)?;
            let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{rendered}");
        }
        _ => {
            cli().print_help()?;
        }
    }

    Ok(())
}
