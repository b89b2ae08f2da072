mod chart;
mod cmd;
mod config;
mod enrich;
mod logging;
mod progress;
mod runtime;
mod scanner;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use crate::chart::Source;
use crate::config::CliSettings;

const LOGO: &str = "
\t╔═══════════╗
\t║ helm-scan ║
\t╚═══════════╝
";

const LONG_ABOUT: &str = "\
Scans a Helm chart, identifies the container images it uses, and reports
the size and number of layers of each image.

Each image is pulled through the local container runtime only long enough to
be measured, then removed again.

Usage examples:
  helm-scan scan-from-link [CHART_LINK]
  helm-scan scan-from-repo -r [REPO_NAME] -c [CHART_NAME]
  helm-scan scan-from-file [FILE_PATH]";

#[derive(Parser)]
#[command(name = "helm-scan")]
#[command(about = "Inventory the container images a Helm chart will pull")]
#[command(long_about = LONG_ABOUT)]
#[command(version)]
struct Cli {
    /// Output as JSON (optionally to a file)
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "-")]
    json: Option<String>,

    /// Number of images measured at the same time
    #[arg(short, long, global = true, env = "HELM_SCAN_JOBS", default_value_t = 4)]
    jobs: usize,

    /// Helm repositories file used by scan-from-repo
    #[arg(long, global = true, env = "HELM_REPOSITORY_CONFIG")]
    repository_config: Option<PathBuf>,

    /// Helm repository index cache used by scan-from-repo
    #[arg(long, global = true, env = "HELM_REPOSITORY_CACHE")]
    repository_cache: Option<PathBuf>,

    /// Log more (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a packaged chart downloaded from a URL
    ScanFromLink {
        /// URL (or local path) of a packaged chart
        chart_link: String,
    },

    /// Scan a chart from a repository added with `helm repo add`
    ScanFromRepo {
        /// Repository name
        #[arg(short, long)]
        repo: String,

        /// Chart name
        #[arg(short, long)]
        chart: String,

        /// Chart version (newest stable when omitted)
        #[arg(long = "chart-version")]
        version: Option<String>,
    },

    /// Scan a chart directory, a packaged chart, or a single manifest
    ScanFromFile {
        /// Path to the chart
        file_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let Some(command) = cli.command else {
        print!("{LOGO}");
        Cli::command().print_long_help()?;
        return Ok(());
    };

    config::init_from_cli(CliSettings {
        jobs: cli.jobs,
        json: cli.json,
        repository_config: cli.repository_config,
        repository_cache: cli.repository_cache,
    })?;

    let source = match command {
        Commands::ScanFromLink { chart_link } => Source::Link(chart_link),
        Commands::ScanFromRepo {
            repo,
            chart,
            version,
        } => Source::Repo {
            repo,
            chart,
            version,
        },
        Commands::ScanFromFile { file_path } => Source::File(file_path),
    };

    cmd::scan::run(source).await
}
