// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, set up logging, hand off to `app::run`.
// - Every failure is printed by `ui::report_failure` and exits with code 1.

use clap::Parser;
use std::process::ExitCode;
use video_uploader::{app, cli::Cli, ui};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match app::run(&cli) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            log::debug!("run failed: {err:?}");
            ui::report_failure(&err);
            ExitCode::FAILURE
        }
    }
}
