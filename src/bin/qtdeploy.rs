extern crate deploy_runner;

use anyhow::Context;
use clap::Parser;
use deploy_runner::{DeployError, DeployQuery, Deployer, OperatingSystem, PathList};
use fs_err as fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bundle Qt applications with their libraries, plugins and translations
#[derive(Parser, Debug)]
#[command(name = "qtdeploy", version, about)]
struct Cli {
    /// Binaries to deploy (executables or libraries)
    #[arg(value_name = "BINARY_FILE", required = true)]
    binary_files: Vec<PathBuf>,

    /// Destination directory (default: directory of the first binary)
    #[arg(short = 'd', long = "destination")]
    destination: Option<PathBuf>,

    /// Directories to search before the system ones, separated by ';'
    #[arg(short = 'p', long = "search-first-path-list")]
    search_first_path_list: Option<String>,

    /// Suffixes appended to each search-first path (e.g. "lib;qt5/lib"), separated by ';'
    #[arg(short = 's', long = "path-suffixes")]
    path_suffixes: Option<String>,

    /// Languages to ship (e.g. "fr;de"), separated by ';'
    #[arg(short = 'l', long = "languages")]
    languages: Option<String>,

    /// Directories with the application's .qm files, separated by ';'
    #[arg(short = 't', long = "translations-dir")]
    translations_dir: Option<String>,

    /// Read the settings from a JSON file; other flags override them
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path for the report in JSON format
    #[arg(short = 'j', long = "output-json-path")]
    output_json_path: Option<PathBuf>,

    /// Leave the RPATH of the deployed binaries untouched
    #[arg(long = "no-rpath")]
    no_rpath: bool,

    /// Verbosity level (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(';')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_owned)
        .collect()
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deploy_runner={0},qtdeploy={0}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_query(cli: &Cli) -> Result<DeployQuery, DeployError> {
    let mut query = match &cli.config {
        Some(config) => {
            let mut query = DeployQuery::from_json_file(config)?;
            query.binaries = cli.binary_files.clone();
            if query.destination.as_os_str().is_empty() {
                query.destination = DeployQuery::deduce_from_binaries(&cli.binary_files)?.destination;
            }
            query
        }
        None => DeployQuery::deduce_from_binaries(&cli.binary_files)?,
    };

    // overrides (must be last)

    if let Some(destination) = &cli.destination {
        query.destination = destination.clone();
    }
    if let Some(paths) = &cli.search_first_path_list {
        query.search_first_path_list = PathList::from_separated(paths);
    }
    if let Some(suffixes) = &cli.path_suffixes {
        query.path_suffixes = split_list(suffixes);
    }
    if let Some(languages) = &cli.languages {
        query.language_suffixes = split_list(languages);
    }
    if let Some(dirs) = &cli.translations_dir {
        query.translation_dirs = split_list(dirs).into_iter().map(PathBuf::from).collect();
    }
    if cli.no_rpath {
        query.patch_rpath = false;
    }
    if query.operating_system.is_none() {
        query.operating_system = Some(query.target_operating_system());
    }
    Ok(query)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let query = build_query(&cli)?;
    tracing::debug!(
        "deploying {} binaries for {:?} to {}",
        query.binaries.len(),
        query.operating_system.unwrap_or_else(OperatingSystem::current),
        query.destination.display()
    );

    let report = match Deployer::new().run(&query) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", e);
            let mut source = std::error::Error::source(&e);
            while let Some(s) = source {
                eprintln!("  caused by: {}", s);
                source = s.source();
            }
            std::process::exit(1);
        }
    };

    println!(
        "Deployed {} binaries, {} libraries, {} plugins and {} translations to {}",
        report.binaries.len(),
        report.libraries.len(),
        report.plugins.len(),
        report.translations.len(),
        report.destination.display()
    );

    if let Some(output_json_path) = &cli.output_json_path {
        let js = serde_json::to_string_pretty(&report)?;
        fs::write(output_json_path, js).context("writing the JSON report")?;
    }

    Ok(())
}
