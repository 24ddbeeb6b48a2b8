use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, error};

use xspec_runner::cli::{Cli, VerbosityLevel};
use xspec_runner::config::{Config, ConfigManager};
use xspec_runner::file_discovery::FileDiscovery;
use xspec_runner::output::Output;
use xspec_runner::runner::{ProgressCallback, RunPhase, RunProgress, SpecRunner};

fn verbosity(config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}

/// `RUST_LOG` wins; otherwise the level follows -v/-q
fn init_logging(verbosity: VerbosityLevel) {
    let default_level = match verbosity {
        VerbosityLevel::Quiet => "error",
        VerbosityLevel::Normal => "warn",
        VerbosityLevel::Verbose => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    let verbosity = verbosity(&config);
    init_logging(verbosity);
    debug!("Effective configuration: {:?}", config);

    let discovery =
        FileDiscovery::from_config(&config.runner).context("Invalid discovery settings")?;
    let runner = SpecRunner::from_config(&config).context("Failed to set up the runner")?;

    let progress: ProgressCallback = Arc::new(|progress: RunProgress| match progress.phase {
        RunPhase::Discovery => debug!("Discovering specification files"),
        RunPhase::Running => {
            if let Some(file) = &progress.current_file {
                debug!("[{}/{}] {}", progress.completed + 1, progress.total, file.display());
            }
        }
        RunPhase::Complete => debug!("Processed {} file(s)", progress.total),
    });

    let results = runner
        .run_path(&cli.path, &discovery, Some(progress))
        .await
        .with_context(|| format!("Failed to run {}", cli.path.display()))?;

    let output = Output::new(verbosity, config.output.format);
    print!("{}", output.format_results(&results)?);

    if let Err(e) = results.ensure_success() {
        error!("{}", e);
        return Ok(false);
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
